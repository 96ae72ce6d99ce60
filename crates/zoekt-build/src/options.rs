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

//! Build options, the option hash stored in every shard, and shard naming.

use globset::{GlobBuilder, GlobMatcher};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ctags::LanguageMap;
use crate::shard::{INDEX_FORMAT_VERSION, SHARD_EXT};
use crate::types::Repository;

pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_SIZE_MAX: usize = 2 << 20;
pub const DEFAULT_SHARD_MAX: usize = 100 << 20;
pub const DEFAULT_TRIGRAM_MAX: usize = 20000;

/// Escaped repository names longer than this are truncated and suffixed
/// with a hash.
const MAX_SHARD_PREFIX: usize = 200;

/// Options for an index build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    /// Directory holding the `*.zoekt` files.
    pub index_dir: PathBuf,
    /// Maximum size of a single file; larger files are recorded as skipped.
    pub size_max: usize,
    /// Maximum number of shards built concurrently.
    pub parallelism: usize,
    /// Maximum corpus size of a shard.
    pub shard_max: usize,
    /// Maximum number of distinct trigrams per document.
    pub trigram_max: usize,
    pub repository_description: Repository,
    /// Path => sub repository.
    pub sub_repositories: BTreeMap<String, Repository>,
    pub disable_ctags: bool,
    /// universal-ctags binary; `None` when none was found.
    pub ctags_path: Option<PathBuf>,
    pub scip_ctags_path: Option<PathBuf>,
    pub ctags_must_succeed: bool,
    /// Write a memory summary to `<file>.<n>` after every shard. Forces
    /// sequential builds.
    pub mem_profile: Option<PathBuf>,
    /// Glob patterns (`**` spans directories, `!` negates) of files that are
    /// indexed regardless of `size_max`. Later patterns win.
    pub large_files: Vec<String>,
    /// The run only contains documents changed since the previous build.
    pub is_delta: bool,
    pub document_ranks_path: Option<PathBuf>,
    /// Changing this forces a rebuild even when nothing else changed.
    pub document_ranks_version: String,
    pub language_map: LanguageMap,
    /// Respect compound shards: tombstone instead of deleting them.
    pub shard_merging: bool,
}

/// The subset of `Options` that invalidates existing shards when changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOptions {
    pub size_max: usize,
    pub disable_ctags: bool,
    pub ctags_path: String,
    pub ctags_must_succeed: bool,
    pub large_files: Vec<String>,
    pub document_ranks_version: String,
}

impl HashOptions {
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ctags_path.as_bytes());
        hasher.update(self.ctags_must_succeed.to_string().as_bytes());
        hasher.update(self.size_max.to_string().as_bytes());
        hasher.update(quote_list(&self.large_files).as_bytes());
        hasher.update(self.disable_ctags.to_string().as_bytes());
        if !self.document_ranks_version.is_empty() {
            hasher.update([0u8]);
            hasher.update(self.document_ranks_version.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

// ["a" "b"]
fn quote_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("{:?}", s)).collect();
    format!("[{}]", quoted.join(" "))
}

impl Options {
    pub fn hash_options(&self) -> HashOptions {
        HashOptions {
            size_max: self.size_max,
            disable_ctags: self.disable_ctags,
            ctags_path: self
                .ctags_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ctags_must_succeed: self.ctags_must_succeed,
            large_files: self.large_files.clone(),
            document_ranks_version: self.document_ranks_version.clone(),
        }
    }

    /// Stable hash of `hash_options()`, stored as `Repository::index_options`.
    pub fn get_hash(&self) -> String {
        self.hash_options().hash()
    }

    /// Fill unset fields with defaults: limits, ctags binaries from the
    /// environment and `PATH`, and a repository name derived from its URL.
    pub fn set_defaults(&mut self) {
        if self.ctags_path.is_none() && !self.disable_ctags {
            self.ctags_path = find_binary("CTAGS_COMMAND", "universal-ctags");
        }
        if self.scip_ctags_path.is_none() && !self.disable_ctags {
            self.scip_ctags_path = find_binary("SCIP_CTAGS_COMMAND", "scip-ctags");
        }

        if self.parallelism == 0 {
            self.parallelism = DEFAULT_PARALLELISM;
        }
        if self.size_max == 0 {
            self.size_max = DEFAULT_SIZE_MAX;
        }
        if self.shard_max == 0 {
            self.shard_max = DEFAULT_SHARD_MAX;
        }
        if self.trigram_max == 0 {
            self.trigram_max = DEFAULT_TRIGRAM_MAX;
        }

        let desc = &mut self.repository_description;
        if desc.name.is_empty() && !desc.url.is_empty() {
            if let Some(name) = name_from_url(&desc.url) {
                desc.name = name;
            }
        }
    }

    /// Path of shard `n` for the current format version.
    pub fn shard_name(&self, n: usize) -> PathBuf {
        self.shard_name_version(INDEX_FORMAT_VERSION, n)
    }

    pub fn shard_name_version(&self, version: u32, n: usize) -> PathBuf {
        let mut prefix: String =
            url::form_urlencoded::byte_serialize(self.repository_description.name.as_bytes())
                .collect();
        if prefix.len() > MAX_SHARD_PREFIX {
            let digest = format!("{:x}", Sha256::digest(prefix.as_bytes()));
            prefix.truncate(MAX_SHARD_PREFIX);
            prefix.push_str(&digest[..8]);
        }
        self.index_dir
            .join(format!("{}_v{}.{:05}.{}", prefix, version, n, SHARD_EXT))
    }

    /// Whether `name` may exceed `size_max`.
    pub fn ignore_size_max(&self, name: &str) -> bool {
        LargeFileMatcher::new(&self.large_files).ignore_size_max(name)
    }
}

/// `$HOME/.zoekt`
pub fn default_index_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".zoekt")
}

fn find_binary(env_var: &str, name: &str) -> Option<PathBuf> {
    if let Ok(cmd) = std::env::var(env_var) {
        if !cmd.is_empty() {
            return Some(PathBuf::from(cmd));
        }
    }
    look_path(name)
}

fn look_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

// host + path, e.g. https://github.com/acme/widgets.git -> github.com/acme/widgets.git
fn name_from_url(raw: &str) -> Option<String> {
    let u = url::Url::parse(raw).ok()?;
    let host = u.host_str().unwrap_or_default();
    let joined = Path::new(host).join(u.path().trim_start_matches('/'));
    let name = joined.to_string_lossy().trim_end_matches('/').to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Decides whether a file may bypass the size limit.
pub trait FileSizeOverride: Send + Sync {
    fn ignore_size_max(&self, name: &str) -> bool;
}

/// Pattern list where the last matching pattern decides; a leading `!`
/// turns a match into a veto. Invalid patterns never match.
#[derive(Debug, Clone, Default)]
pub struct LargeFileMatcher {
    patterns: Vec<(bool, Option<GlobMatcher>)>,
}

impl LargeFileMatcher {
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.trim();
                let (negated, glob) = match p.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, p),
                };
                let matcher = GlobBuilder::new(glob)
                    .literal_separator(true)
                    .build()
                    .ok()
                    .map(|g| g.compile_matcher());
                (negated, matcher)
            })
            .collect();
        Self { patterns }
    }
}

impl FileSizeOverride for LargeFileMatcher {
    fn ignore_size_max(&self, name: &str) -> bool {
        for (negated, matcher) in self.patterns.iter().rev() {
            if matcher.as_ref().is_some_and(|m| m.is_match(name)) {
                return !negated;
            }
        }
        false
    }
}
