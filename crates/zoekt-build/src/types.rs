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

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Half-open byte range `[start, end)` inside a document's content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub start: u32,
    pub end: u32,
}

/// Symbol metadata attached to a `DocumentSection`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub sym: String,
    pub kind: String,
    pub parent: String,
    pub parent_kind: String,
}

/// A single source file handed to the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    /// File bytes. Cleared when the document is skipped.
    pub content: Vec<u8>,
    pub language: String,
    /// Ascending, non-overlapping symbol ranges.
    pub symbols: Vec<DocumentSection>,
    /// Metadata for `symbols`, index aligned.
    pub symbols_meta: Vec<Symbol>,
    /// Non-empty when the content was not indexed.
    pub skip_reason: String,
    pub branches: Vec<String>,
    pub sub_repository_path: String,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_skipped(&self) -> bool {
        !self.skip_reason.is_empty()
    }
}

/// A branch and the commit it was indexed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryBranch {
    pub name: String,
    pub version: String,
}

impl RepositoryBranch {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for RepositoryBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Repository description stored in every shard. The JSON field names match
/// the ones zoekt writes. `index_options` is a SHA-256 digest, so shards
/// written by zoekt itself always compare as an option mismatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Repository {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub source: String,
    pub branches: Vec<RepositoryBranch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_repo_map: BTreeMap<String, Repository>,
    #[serde(rename = "CommitURLTemplate")]
    pub commit_url_template: String,
    #[serde(rename = "FileURLTemplate")]
    pub file_url_template: String,
    pub line_fragment_template: String,
    pub raw_config: BTreeMap<String, String>,
    pub rank: u16,
    /// Hash of the build options the shard was written with.
    pub index_options: String,
    pub has_symbols: bool,
    /// Set when the repository must no longer be searched in this shard.
    pub tombstone: bool,
    pub latest_commit_date: Option<DateTime<Utc>>,
    /// Paths that are superseded by newer shards of the same repository.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub file_tombstones: BTreeSet<String>,
}

impl Repository {
    /// Copy the fields of `x` that may change without re-indexing into
    /// `self`. Returns whether anything changed. Fails when `x` differs in a
    /// field that requires the content to be rebuilt.
    pub fn merge_mutable(&mut self, x: &Repository) -> Result<bool> {
        if self.id != x.id {
            bail!("ID is immutable");
        }
        if self.name != x.name {
            // the name is encoded into the shard file name
            bail!("Name is immutable");
        }
        if self.branches != x.branches {
            bail!("Branches is immutable");
        }

        let mut mutated = false;
        for (k, v) in &x.raw_config {
            if k == "name" || k == "id" {
                continue;
            }
            if self.raw_config.get(k) != Some(v) {
                mutated = true;
                self.raw_config.insert(k.clone(), v.clone());
            }
        }

        for (ours, theirs) in [
            (&mut self.url, &x.url),
            (&mut self.commit_url_template, &x.commit_url_template),
            (&mut self.file_url_template, &x.file_url_template),
            (&mut self.line_fragment_template, &x.line_fragment_template),
        ] {
            if *ours != *theirs {
                mutated = true;
                *ours = theirs.clone();
            }
        }

        Ok(mutated)
    }
}

/// Index-level metadata written by the shard encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IndexMetadata {
    pub index_format_version: u32,
    pub index_feature_version: u32,
    pub index_min_reader_version: u32,
    pub index_time: Option<DateTime<Utc>>,
    #[serde(rename = "PlainASCII")]
    pub plain_ascii: bool,
    pub language_map: BTreeMap<String, u16>,
    pub zoekt_version: String,
    #[serde(rename = "ID")]
    pub id: String,
}
