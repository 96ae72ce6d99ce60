//! TOML configuration for the `zoekt-build-index` binary.
//!
//! Precedence: built-in defaults, then this file, then command line flags.
//!
//! ```toml
//! name = "github.com/acme/widgets"
//! id = 42
//! url = "https://github.com/acme/widgets"
//! branches = [{ name = "main", version = "4f1c2a" }]
//!
//! [raw_config]
//! archived = "false"
//!
//! [index]
//! parallelism = 2
//! large_files = ["**/*.min.json"]
//! language_map = { go = "scip", markdown = "none" }
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ctags::{normalize_language, ParserType};
use crate::options::Options;
use crate::types::RepositoryBranch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: Option<String>,
    pub id: Option<u32>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub branches: Vec<BranchConfig>,
    pub raw_config: BTreeMap<String, String>,
    pub commit_url_template: Option<String>,
    pub file_url_template: Option<String>,
    pub line_fragment_template: Option<String>,
    pub rank: Option<u16>,
    /// RFC 3339 timestamp.
    pub latest_commit_date: Option<String>,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Build options settable from the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub index_dir: Option<PathBuf>,
    pub parallelism: Option<usize>,
    pub file_limit: Option<usize>,
    pub shard_limit: Option<usize>,
    pub max_trigram_count: Option<usize>,
    pub large_files: Vec<String>,
    pub disable_ctags: Option<bool>,
    pub require_ctags: Option<bool>,
    pub shard_merging: Option<bool>,
    pub document_ranks_version: Option<String>,
    /// language => parser (`universal`, `scip`, `none`).
    pub language_map: BTreeMap<String, String>,
}

pub fn load_repository_config(path: &Path) -> Result<RepositoryConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", path.display()))
}

impl RepositoryConfig {
    /// Overlay the values present in the file onto `o`.
    pub fn apply(&self, o: &mut Options) -> Result<()> {
        let desc = &mut o.repository_description;
        if let Some(v) = &self.name {
            desc.name = v.clone();
        }
        if let Some(v) = self.id {
            desc.id = v;
        }
        if let Some(v) = &self.url {
            desc.url = v.clone();
        }
        if let Some(v) = &self.source {
            desc.source = v.clone();
        }
        if !self.branches.is_empty() {
            desc.branches = self
                .branches
                .iter()
                .map(|b| RepositoryBranch::new(b.name.clone(), b.version.clone()))
                .collect();
        }
        desc.raw_config
            .extend(self.raw_config.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (dst, src) in [
            (&mut desc.commit_url_template, &self.commit_url_template),
            (&mut desc.file_url_template, &self.file_url_template),
            (&mut desc.line_fragment_template, &self.line_fragment_template),
        ] {
            if let Some(v) = src {
                *dst = v.clone();
            }
        }
        if let Some(v) = self.rank {
            desc.rank = v;
        }
        if let Some(v) = &self.latest_commit_date {
            let t = DateTime::parse_from_rfc3339(v)
                .with_context(|| format!("latest_commit_date {:?}", v))?;
            desc.latest_commit_date = Some(t.with_timezone(&Utc));
        }

        let idx = &self.index;
        if let Some(v) = &idx.index_dir {
            o.index_dir = v.clone();
        }
        if let Some(v) = idx.parallelism {
            o.parallelism = v;
        }
        if let Some(v) = idx.file_limit {
            o.size_max = v;
        }
        if let Some(v) = idx.shard_limit {
            o.shard_max = v;
        }
        if let Some(v) = idx.max_trigram_count {
            o.trigram_max = v;
        }
        o.large_files.extend(idx.large_files.iter().cloned());
        if let Some(v) = idx.disable_ctags {
            o.disable_ctags = v;
        }
        if let Some(v) = idx.require_ctags {
            o.ctags_must_succeed = v;
        }
        if let Some(v) = idx.shard_merging {
            o.shard_merging = v;
        }
        if let Some(v) = &idx.document_ranks_version {
            o.document_ranks_version = v.clone();
        }
        for (lang, parser) in &idx.language_map {
            let typ = ParserType::parse(parser)
                .ok_or_else(|| anyhow!("unknown parser {:?} for language {:?}", parser, lang))?;
            o.language_map.insert(normalize_language(lang), typ);
        }
        Ok(())
    }
}
