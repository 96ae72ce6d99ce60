//! `.meta` overlay files.
//!
//! A shard is immutable once written. Changes to its repository list that do
//! not need a rebuild (tombstones, new branch versions in delta builds, URL
//! templates) are stored as a JSON list of repositories in `<shard>.meta`,
//! which replaces the list embedded in the shard when present.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::ShardReader;
use crate::types::{IndexMetadata, Repository};

pub const META_SUFFIX: &str = ".meta";

pub fn meta_path(shard: &Path) -> PathBuf {
    let mut s = shard.as_os_str().to_owned();
    s.push(META_SUFFIX);
    PathBuf::from(s)
}

/// Repositories (overlay applied) and index metadata of a shard.
pub fn read_metadata_path(path: &Path) -> Result<(Vec<Repository>, IndexMetadata)> {
    let reader = ShardReader::open(path)?;
    let (mut repos, md) = reader.metadata()?;

    let overlay = meta_path(path);
    match fs::read(&overlay) {
        Ok(bytes) => {
            let updated: Vec<Repository> = serde_json::from_slice(&bytes)
                .with_context(|| format!("decode {}", overlay.display()))?;
            if updated.len() != repos.len() {
                bail!(
                    "{} describes {} repositories, shard has {}",
                    overlay.display(),
                    updated.len(),
                    repos.len()
                );
            }
            repos = updated;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("read {}", overlay.display())),
    }
    Ok((repos, md))
}

/// Like `read_metadata_path` but without tombstoned repositories.
pub fn read_metadata_path_alive(path: &Path) -> Result<(Vec<Repository>, IndexMetadata)> {
    let (repos, md) = read_metadata_path(path)?;
    Ok((repos.into_iter().filter(|r| !r.tombstone).collect(), md))
}

/// The shard file plus its overlay, if one exists.
pub fn index_file_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![path.to_path_buf()];
    let overlay = meta_path(path);
    match fs::metadata(&overlay) {
        Ok(_) => paths.push(overlay),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("stat {}", overlay.display())),
    }
    Ok(paths)
}

/// Write `repos` to a temp file next to the shard's overlay. Returns
/// `(temp path, final overlay path)`; the caller renames.
pub fn write_repo_meta_temp(shard: &Path, repos: &[Repository]) -> Result<(PathBuf, PathBuf)> {
    let final_path = meta_path(shard);
    let dir = match final_path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{base}."))
        .suffix(".tmp")
        .tempfile_in(&dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    serde_json::to_writer(tmp.as_file_mut(), repos).context("encode repository metadata")?;
    tmp.as_file_mut().flush()?;
    let tmp_path = tmp.into_temp_path().keep()?;
    Ok((tmp_path, final_path))
}

/// Mark repository `repo_id` as deleted inside `shard` by rewriting its
/// overlay. Unknown ids leave the shard untouched.
pub fn set_tombstone(shard: &Path, repo_id: u32) -> Result<()> {
    let (mut repos, _) = read_metadata_path(shard)?;
    let mut found = false;
    for r in repos.iter_mut().filter(|r| r.id == repo_id) {
        r.tombstone = true;
        found = true;
    }
    if !found {
        return Ok(());
    }

    let (tmp, dst) = write_repo_meta_temp(shard, &repos)?;
    if let Err(e) = fs::rename(&tmp, &dst) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()));
    }
    Ok(())
}
