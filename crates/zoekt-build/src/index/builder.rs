// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::BuildError;
use super::throttle::Throttle;
use crate::ctags::{parse_symbols, ParserMap};
use crate::doc_checker::DocChecker;
use crate::options::{FileSizeOverride, LargeFileMatcher, Options};
use crate::rank::sort_documents;
use crate::shard::{
    index_file_paths, is_compound_shard, read_metadata_path_alive, set_tombstone,
    write_repo_meta_temp, ShardWriter, SHARD_EXT,
};
use crate::types::{Document, RepositoryBranch};

/// A shard written to a temp file, waiting for `finish` to move it to its
/// final name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedShard {
    pub temp: PathBuf,
    pub final_path: PathBuf,
}

/// Read-only state shared with the workers.
struct BuildContext {
    opts: Options,
    parsers: ParserMap,
    index_time: DateTime<Utc>,
    id: String,
}

#[derive(Default)]
struct SharedState {
    build_error: Option<BuildError>,
    // temp => final. Only renamed once every shard succeeded.
    finished_shards: HashMap<PathBuf, PathBuf>,
}

/// Buffers documents and turns them into uniformly sized shards, building
/// up to `parallelism` shards at once.
pub struct Builder {
    opts: Options,
    ctx: Arc<BuildContext>,
    pool: Option<ThreadPool>,
    throttle: Throttle,
    shared: Arc<Mutex<SharedState>>,

    next_shard_num: usize,
    todo: Vec<Document>,
    size: usize,
    doc_checker: DocChecker,
    size_override: Box<dyn FileSizeOverride>,
    changed_or_removed_files: Vec<String>,

    profile_seq: usize,
    finish_result: Option<Result<(), BuildError>>,
}

impl Builder {
    /// Builder with ctags parsers for the binaries configured in `opts`.
    pub fn new(mut opts: Options) -> Result<Self, BuildError> {
        opts.set_defaults();
        let parsers = ParserMap::from_options(&opts)?;
        Self::build(opts, parsers)
    }

    /// Builder using `parsers` for symbol extraction.
    pub fn with_parsers(mut opts: Options, parsers: ParserMap) -> Result<Self, BuildError> {
        opts.set_defaults();
        Self::build(opts, parsers)
    }

    fn build(opts: Options, parsers: ParserMap) -> Result<Self, BuildError> {
        if opts.repository_description.name.is_empty() {
            return Err(BuildError::MissingName);
        }

        let now = Utc::now();
        let ctx = Arc::new(BuildContext {
            opts: opts.clone(),
            parsers,
            index_time: now,
            id: uuid::Uuid::now_v7().to_string(),
        });
        // surface invalid repository descriptions before any document is added
        ctx.new_shard_writer()?;

        let pool = if opts.parallelism > 1 && opts.mem_profile.is_none() {
            let pool = ThreadPoolBuilder::new()
                .num_threads(opts.parallelism)
                .thread_name(|i| format!("zoekt-build-{}", i))
                .build()
                .map_err(|e| BuildError::Other(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        // Delta shards are stacked on top of the existing ones, so numbering
        // continues after the last shard and the set stays discoverable.
        let next_shard_num = if opts.is_delta {
            opts.find_all_shards().len()
        } else {
            0
        };

        tracing::debug!(
            repo = %opts.repository_description.name,
            parallelism = opts.parallelism,
            delta = opts.is_delta,
            next_shard = next_shard_num,
            "builder created"
        );

        Ok(Self {
            size_override: Box::new(LargeFileMatcher::new(&opts.large_files)),
            throttle: Throttle::new(opts.parallelism),
            opts,
            ctx,
            pool,
            shared: Arc::new(Mutex::new(SharedState::default())),
            next_shard_num,
            todo: Vec::new(),
            size: 0,
            doc_checker: DocChecker::new(),
            changed_or_removed_files: Vec::new(),
            profile_seq: 0,
            finish_result: None,
        })
    }

    /// Replace the large-file matcher built from `Options::large_files`.
    pub fn set_size_override(&mut self, o: Box<dyn FileSizeOverride>) {
        self.size_override = o;
    }

    pub fn opts(&self) -> &Options {
        &self.opts
    }

    pub fn add_file(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Result<(), BuildError> {
        self.add(Document::new(name, content))
    }

    /// Buffer `doc`, flushing a shard when the batch reaches `shard_max`.
    /// Ignored once `finish` was called.
    pub fn add(&mut self, mut doc: Document) -> Result<(), BuildError> {
        if self.finish_result.is_some() {
            return Ok(());
        }

        let allow_large_file = self.size_override.ignore_size_max(&doc.name);
        if doc.content.len() > self.opts.size_max && !allow_large_file {
            doc.skip_reason = format!(
                "document size {} larger than limit {}",
                doc.content.len(),
                self.opts.size_max
            );
        } else if let Err(e) =
            self.doc_checker
                .check(&doc.content, self.opts.trigram_max, allow_large_file)
        {
            doc.skip_reason = e.to_string();
            doc.language = "binary".to_string();
        }

        let doc_size = if doc.is_skipped() {
            // skipped content is not indexed, don't keep it in memory
            doc.content = Vec::new();
            doc.name.len() + doc.skip_reason.len()
        } else {
            doc.name.len() + doc.content.len()
        };

        if !self.todo.is_empty() && self.size + doc_size > self.opts.shard_max {
            self.flush()?;
        }
        self.todo.push(doc);
        self.size += doc_size;
        if self.size > self.opts.shard_max {
            return self.flush();
        }
        Ok(())
    }

    /// Record that `path` changed or was removed since the previous build.
    /// Delta builds tombstone these paths in the older shards.
    pub fn mark_file_as_changed_or_removed(&mut self, path: impl Into<String>) {
        self.changed_or_removed_files.push(path.into());
    }

    // Build a shard from the buffered documents, in the background when
    // parallel.
    fn flush(&mut self) -> Result<(), BuildError> {
        let todo = std::mem::take(&mut self.todo);
        self.size = 0;
        if let Some(e) = self.shared.lock().build_error.clone() {
            return Err(e);
        }

        let has_shard = self.next_shard_num > 0;
        if todo.is_empty() && has_shard {
            return Ok(());
        }

        let shard_num = self.next_shard_num;
        self.next_shard_num += 1;

        if let Some(pool) = &self.pool {
            let permit = self.throttle.acquire();
            let ctx = self.ctx.clone();
            let shared = self.shared.clone();
            pool.spawn(move || {
                let res = ctx.build_shard(todo, shard_num);
                record_result(&shared, res);
                drop(permit);
            });
            return Ok(());
        }

        let res = self.ctx.build_shard(todo, shard_num);
        record_result(&self.shared, res);
        if let Some(base) = self.opts.mem_profile.clone() {
            self.write_mem_profile(&base);
        }
        match self.shared.lock().build_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write the last shard, wait for all workers and move everything into
    /// place. Removes the previous shards of the repository, or in delta mode
    /// updates their metadata instead.
    ///
    /// Always call this, also after errors, so temp files are cleaned up.
    /// Later calls return the first call's result without touching the disk.
    pub fn finish(&mut self) -> Result<(), BuildError> {
        if let Some(res) = &self.finish_result {
            return res.clone();
        }
        let res = self.finish_inner();
        self.finish_result = Some(res.clone());
        res
    }

    fn finish_inner(&mut self) -> Result<(), BuildError> {
        // a failure is recorded in the shared state
        let _ = self.flush();
        self.throttle.wait_idle();

        let (build_error, finished) = {
            let mut s = self.shared.lock();
            (s.build_error.clone(), std::mem::take(&mut s.finished_shards))
        };
        if let Some(e) = build_error {
            for tmp in finished.keys() {
                tracing::info!(path = %tmp.display(), "removing temp shard after failed build");
                let _ = fs::remove_file(tmp);
            }
            return Err(e);
        }

        let mut artifacts: Vec<(PathBuf, PathBuf)> = finished.into_iter().collect();
        let old_shards = self.opts.find_all_shards();

        if self.opts.is_delta {
            if let Err(e) = self.stage_delta_metadata(&old_shards, &mut artifacts) {
                for (tmp, _) in &artifacts {
                    let _ = fs::remove_file(tmp);
                }
                return Err(e);
            }
        }

        if artifacts.is_empty() {
            return Ok(());
        }

        let mut first_err: Option<BuildError> = None;

        // Non-delta builds replace every existing shard. Anything still in
        // to_delete after the renames is stale.
        let mut to_delete: BTreeSet<PathBuf> = BTreeSet::new();
        if !self.opts.is_delta {
            for shard in &old_shards {
                match index_file_paths(shard) {
                    Ok(paths) => to_delete.extend(paths),
                    Err(e) => {
                        let e = e.context(format!("failed to find old paths for {}", shard.display()));
                        first_err.get_or_insert(e.into());
                    }
                }
            }
        }

        for (tmp, dst) in &artifacts {
            if let Err(e) = fs::rename(tmp, dst) {
                tracing::error!(from = %tmp.display(), to = %dst.display(), error = %e, "rename failed");
                first_err.get_or_insert(e.into());
                continue;
            }
            to_delete.remove(dst);
        }

        let repo_id = self.opts.repository_description.id;
        for p in &to_delete {
            if self.opts.shard_merging && is_compound_shard(p) {
                if p.extension().and_then(|e| e.to_str()) != Some(SHARD_EXT) {
                    continue;
                }
                tracing::info!(shard = %p.display(), repo_id, "tombstoning repository in compound shard");
                if let Err(e) = set_tombstone(p, repo_id) {
                    first_err.get_or_insert(e.into());
                }
                continue;
            }
            tracing::info!(path = %p.display(), "removing old shard file");
            if let Err(e) = fs::remove_file(p) {
                first_err.get_or_insert(e.into());
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // Rewrite the metadata of every existing shard: add tombstones for the
    // changed files and move branches to their new versions.
    fn stage_delta_metadata(
        &self,
        old_shards: &[PathBuf],
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), BuildError> {
        let desc = &self.opts.repository_description;
        for shard in old_shards {
            let (repos, _) = read_metadata_path_alive(shard).map_err(|e| {
                BuildError::Other(format!(
                    "reading metadata from shard {}: {:#}",
                    shard.display(),
                    e
                ))
            })?;
            if repos.len() > 1 {
                return Err(BuildError::DeltaCompoundShard(shard.clone()));
            }
            let Some(mut repo) = repos.into_iter().next() else {
                return Err(BuildError::DeltaEmptyShard(shard.clone()));
            };
            if repo.id != desc.id {
                return Err(BuildError::DeltaRepositoryMismatch {
                    shard: shard.clone(),
                    id: desc.id,
                    name: desc.name.clone(),
                });
            }

            repo.file_tombstones
                .extend(self.changed_or_removed_files.iter().cloned());

            if !branch_names_equal(&repo.branches, &desc.branches) {
                return Err(BuildError::DeltaBranchSet {
                    shard: shard.clone(),
                    old: repo.branches.clone(),
                    new: desc.branches.clone(),
                });
            }
            if self.opts.get_hash() != repo.index_options {
                return Err(BuildError::DeltaIndexOptionsMismatch {
                    shard: shard.clone(),
                    new_options: self.opts.hash_options(),
                });
            }

            repo.branches = desc.branches.clone();
            repo.latest_commit_date = desc.latest_commit_date;

            let staged_meta = write_repo_meta_temp(shard, &[repo]).map_err(|e| {
                BuildError::Other(format!(
                    "writing repository metadata for shard {}: {:#}",
                    shard.display(),
                    e
                ))
            })?;
            staged.push(staged_meta);
        }
        Ok(())
    }

    // Summary of process memory after a shard build, written to <base>.<seq>.
    fn write_mem_profile(&mut self, base: &Path) {
        let path = PathBuf::from(format!("{}.{}", base.display(), self.profile_seq));
        self.profile_seq += 1;

        let finished = self.shared.lock().finished_shards.len();
        let summary = serde_json::json!({
            "time": Utc::now(),
            "next_shard": self.next_shard_num,
            "finished_shards": finished,
            "approx_resident_bytes": approx_resident_bytes(),
        });
        let res = serde_json::to_vec_pretty(&summary)
            .map_err(std::io::Error::from)
            .and_then(|b| fs::write(&path, b));
        match res {
            Ok(()) => tracing::info!(path = %path.display(), "wrote mem profile"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "could not write mem profile"),
        }
    }
}

/// Whether both lists name the same branches in the same order. Versions
/// are not compared.
pub fn branch_names_equal(a: &[RepositoryBranch], b: &[RepositoryBranch]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
}

fn record_result(shared: &Mutex<SharedState>, res: Result<FinishedShard, BuildError>) {
    let mut s = shared.lock();
    match res {
        Ok(done) => {
            s.finished_shards.insert(done.temp, done.final_path);
        }
        Err(e) => {
            tracing::warn!(error = %e, "shard build failed");
            if s.build_error.is_none() {
                s.build_error = Some(e);
            }
        }
    }
}

// Resident set size from /proc assuming 4 KiB pages; None elsewhere.
fn approx_resident_bytes() -> Option<u64> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

impl BuildContext {
    fn new_shard_writer(&self) -> anyhow::Result<ShardWriter> {
        let mut desc = self.opts.repository_description.clone();
        desc.has_symbols = self.ctags_enabled();
        desc.sub_repo_map = self.opts.sub_repositories.clone();
        desc.index_options = self.opts.get_hash();
        Ok(ShardWriter::new(desc)?
            .index_time(self.index_time)
            .id(self.id.clone()))
    }

    fn ctags_enabled(&self) -> bool {
        !self.opts.disable_ctags && !self.parsers.is_empty()
    }

    fn build_shard(&self, mut todo: Vec<Document>, shard_num: usize) -> Result<FinishedShard, BuildError> {
        if self.ctags_enabled() {
            parse_symbols(
                &mut todo,
                &self.opts.language_map,
                &self.parsers,
                self.opts.ctags_must_succeed,
            )?;
        }

        let name = self.opts.shard_name(shard_num);
        let mut writer = self.new_shard_writer()?;
        sort_documents(&mut todo);
        for d in todo {
            writer.add(d)?;
        }
        write_shard(&name, &writer)
    }
}

fn write_shard(path: &Path, writer: &ShardWriter) -> Result<FinishedShard, BuildError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{}.", base))
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    let size = {
        let mut bw = BufWriter::new(tmp.as_file_mut());
        let n = writer.write(&mut bw)?;
        bw.flush()?;
        n
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }
    let temp = tmp.into_temp_path().keep().map_err(|e| BuildError::from(e.error))?;

    tracing::info!(
        shard = %path.display(),
        index_bytes = size,
        overhead = %format!("{:.1}", size as f64 / (writer.content_size() + 1) as f64),
        files = writer.num_files(),
        "finished shard"
    );

    Ok(FinishedShard {
        temp,
        final_path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Repository;
    use tempfile::tempdir;

    fn opts(dir: &Path) -> Options {
        Options {
            index_dir: dir.to_path_buf(),
            disable_ctags: true,
            parallelism: 1,
            repository_description: Repository {
                name: "repo".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn requires_name() {
        let dir = tempdir().unwrap();
        let mut o = opts(dir.path());
        o.repository_description.name.clear();
        assert!(matches!(Builder::new(o), Err(BuildError::MissingName)));
    }

    #[test]
    fn oversized_document_gets_skip_reason() {
        let dir = tempdir().unwrap();
        let mut o = opts(dir.path());
        o.size_max = 4;
        let mut b = Builder::new(o).unwrap();
        b.add_file("big.txt", "0123456789").unwrap();
        assert_eq!(b.todo[0].skip_reason, "document size 10 larger than limit 4");
        assert!(b.todo[0].content.is_empty());
        assert_eq!(b.size, "big.txt".len() + b.todo[0].skip_reason.len());
    }

    #[test]
    fn binary_document_is_marked() {
        let dir = tempdir().unwrap();
        let mut b = Builder::new(opts(dir.path())).unwrap();
        b.add_file("a.bin", b"ab\0cd".to_vec()).unwrap();
        assert_eq!(b.todo[0].language, "binary");
        assert_eq!(b.todo[0].skip_reason, "binary data at byte offset 2");
    }

    #[test]
    fn empty_build_still_writes_one_shard() {
        let dir = tempdir().unwrap();
        let mut b = Builder::new(opts(dir.path())).unwrap();
        b.finish().unwrap();
        assert!(dir.path().join("repo_v16.00000.zoekt").exists());
    }

    #[test]
    fn branch_names_ignore_versions() {
        let a = vec![RepositoryBranch::new("main", "1")];
        let b = vec![RepositoryBranch::new("main", "2")];
        let c = vec![RepositoryBranch::new("dev", "1")];
        assert!(branch_names_equal(&a, &b));
        assert!(!branch_names_equal(&a, &c));
        assert!(!branch_names_equal(&a, &[]));
    }
}
