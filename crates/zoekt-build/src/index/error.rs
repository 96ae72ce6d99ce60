use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::options::HashOptions;
use crate::types::RepositoryBranch;

/// Typed errors returned by the builder.
///
/// `Clone` so `Builder::finish` can hand out the same result on every call.
#[derive(Debug, Clone)]
pub enum BuildError {
    /// The repository description has no name.
    MissingName,
    /// Symbol extraction failed while ctags was required to succeed.
    Ctags(String),
    /// Writing, renaming or removing index files failed.
    Io(Arc<io::Error>),
    /// A delta build requested a different list of branch names than the
    /// existing shards were built with.
    DeltaBranchSet {
        shard: PathBuf,
        old: Vec<RepositoryBranch>,
        new: Vec<RepositoryBranch>,
    },
    /// A delta build runs with options whose hash differs from the shard's.
    DeltaIndexOptionsMismatch {
        shard: PathBuf,
        new_options: HashOptions,
    },
    DeltaCompoundShard(PathBuf),
    DeltaEmptyShard(PathBuf),
    DeltaRepositoryMismatch {
        shard: PathBuf,
        id: u32,
        name: String,
    },
    /// Fallback for collaborator failures.
    Other(String),
}

fn branch_list(branches: &[RepositoryBranch]) -> String {
    let items: Vec<String> = branches.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(" "))
}

impl Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MissingName => write!(f, "builder: must set Name"),
            BuildError::Ctags(s) => write!(f, "ctags: {}", s),
            BuildError::Io(e) => write!(f, "io error: {}", e),
            BuildError::DeltaBranchSet { shard, old, new } => write!(
                f,
                "repository metadata in shard {:?} contains a different set of branch names than \
                 what was requested, which is unsupported in a delta shard build. old: {}, new: {}",
                shard,
                branch_list(old),
                branch_list(new)
            ),
            BuildError::DeltaIndexOptionsMismatch { shard, new_options } => write!(
                f,
                "one or more index options for shard {:?} do not match the builder's index \
                 options, which is unsupported in a delta shard build. new options: {:?}",
                shard, new_options
            ),
            BuildError::DeltaCompoundShard(shard) => write!(
                f,
                "delta shard builds don't support repositories contained in compound shards (shard {:?})",
                shard
            ),
            BuildError::DeltaEmptyShard(shard) => write!(
                f,
                "failed to update repository metadata for shard {:?}: shard contains no repositories",
                shard
            ),
            BuildError::DeltaRepositoryMismatch { shard, id, name } => write!(
                f,
                "shard {:?} doesn't contain repository ID {} ({:?})",
                shard, id, name
            ),
            BuildError::Other(s) => write!(f, "error: {}", s),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BuildError::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for BuildError {
    fn from(e: io::Error) -> Self {
        BuildError::Io(Arc::new(e))
    }
}

impl From<anyhow::Error> for BuildError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<io::Error>() {
            Ok(io) => BuildError::Io(Arc::new(io)),
            Err(e) => BuildError::Other(format!("{:#}", e)),
        }
    }
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        BuildError::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_io_errors_stay_io() {
        let e = anyhow::Error::new(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(BuildError::from(e), BuildError::Io(_)));

        let e = anyhow::anyhow!("inner").context("outer");
        assert_eq!(BuildError::from(e).to_string(), "error: outer: inner");
    }

    #[test]
    fn branch_set_message_lists_both_sides() {
        let e = BuildError::DeltaBranchSet {
            shard: "r_v16.00000.zoekt".into(),
            old: vec![RepositoryBranch::new("main", "a")],
            new: vec![RepositoryBranch::new("dev", "b")],
        };
        let msg = e.to_string();
        assert!(msg.contains("old: [main@a]"));
        assert!(msg.contains("new: [dev@b]"));
    }
}
