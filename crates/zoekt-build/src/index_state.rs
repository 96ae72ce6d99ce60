//! Comparing the shards on disk with the options of a new build.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::options::Options;
use crate::shard::{read_metadata_path_alive, COMPOUND_PREFIX, READ_VERSIONS, SHARD_EXT};
use crate::types::{IndexMetadata, Repository};

/// How the index on disk relates to the requested build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexState {
    Missing,
    Corrupt,
    VersionMismatch,
    OptionMismatch,
    MetaMismatch,
    ContentMismatch,
    Equal,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Missing => "missing",
            IndexState::Corrupt => "corrupt",
            IndexState::VersionMismatch => "version-mismatch",
            IndexState::OptionMismatch => "option-mismatch",
            IndexState::MetaMismatch => "meta-mismatch",
            IndexState::ContentMismatch => "content-mismatch",
            IndexState::Equal => "equal",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .map(|io| io.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

impl Options {
    /// True when the index on disk already matches these options.
    pub fn incremental_skip_indexing(&self) -> bool {
        self.index_state().0 == IndexState::Equal
    }

    /// Classify the index on disk. Also returns the shard that was inspected.
    pub fn index_state(&self) -> (IndexState, Option<PathBuf>) {
        let Some(shard) = self.find_shard() else {
            return (IndexState::Missing, None);
        };

        let (repos, md) = match read_metadata_path_alive(&shard) {
            Ok(v) => v,
            Err(e) if is_not_found(&e) => return (IndexState::Missing, Some(shard)),
            Err(e) => {
                tracing::debug!(shard = %shard.display(), error = %format!("{:#}", e), "unreadable shard");
                return (IndexState::Corrupt, Some(shard));
            }
        };

        for (format, feature) in READ_VERSIONS {
            if format == md.index_format_version && feature != md.index_feature_version {
                return (IndexState::VersionMismatch, Some(shard));
            }
        }

        let desc = &self.repository_description;
        let Some(mut repo) = repos.into_iter().find(|r| r.name == desc.name) else {
            return (IndexState::Corrupt, Some(shard));
        };

        if repo.index_options != self.get_hash() {
            return (IndexState::OptionMismatch, Some(shard));
        }
        if repo.branches != desc.branches {
            return (IndexState::ContentMismatch, Some(shard));
        }

        match repo.merge_mutable(desc) {
            Err(e) => {
                tracing::warn!(repo = %desc.name, error = %e, "immutable field changed, requires re-index");
                (IndexState::ContentMismatch, Some(shard))
            }
            Ok(true) => (IndexState::MetaMismatch, Some(shard)),
            Ok(false) => (IndexState::Equal, Some(shard)),
        }
    }

    /// Stored description and index metadata of this repository, if any
    /// shard holds it.
    pub fn find_repository_metadata(&self) -> Result<Option<(Repository, IndexMetadata)>> {
        let Some(shard) = self.find_shard() else {
            return Ok(None);
        };
        let (repos, md) = read_metadata_path_alive(&shard)
            .with_context(|| format!("reading metadata for shard {}", shard.display()))?;

        let id = self.repository_description.id;
        match repos.into_iter().find(|r| r.id == id) {
            Some(repo) => Ok(Some((repo, md))),
            None => anyhow::bail!(
                "matching shard {} doesn't contain metadata for repo id {} ({:?})",
                shard.display(),
                id,
                self.repository_description.name
            ),
        }
    }

    /// Shard 0 of the newest readable format, else the compound shard that
    /// holds this repository.
    pub fn find_shard(&self) -> Option<PathBuf> {
        for (format, _) in READ_VERSIONS {
            let p = self.shard_name_version(format, 0);
            if p.exists() {
                return Some(p);
            }
        }

        // Only repositories that are new or merged into compound shards get here.
        let id = self.repository_description.id;
        self.compound_shards().into_iter().find(|p| {
            read_metadata_path_alive(p)
                .map(|(repos, _)| repos.iter().any(|r| r.id == id))
                .unwrap_or(false)
        })
    }

    /// All shards of this repository: shards numbered 0.. without gaps for
    /// the first readable format present, else its compound shard.
    pub fn find_all_shards(&self) -> Vec<PathBuf> {
        for (format, _) in READ_VERSIONS {
            let first = self.shard_name_version(format, 0);
            if !first.exists() {
                continue;
            }
            let mut shards = vec![first];
            for n in 1.. {
                let p = self.shard_name_version(format, n);
                if !p.exists() {
                    break;
                }
                shards.push(p);
            }
            return shards;
        }

        self.find_shard().into_iter().collect()
    }

    fn compound_shards(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.index_dir) else {
            return Vec::new();
        };
        let suffix = format!(".{}", SHARD_EXT);
        let mut out: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(COMPOUND_PREFIX) && n.ends_with(&suffix))
                    .unwrap_or(false)
            })
            .collect();
        out.sort();
        out
    }
}
