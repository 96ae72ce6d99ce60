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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zoekt_build::config::load_repository_config;
use zoekt_build::flags::normalize_args;
use zoekt_build::options::default_index_dir;
use zoekt_build::{BuildFlags, Builder, Document, IndexState, Options, RepositoryBranch};

#[derive(Parser, Debug)]
#[command(
    name = "zoekt-build-index",
    about = "Index a directory into zoekt shards"
)]
struct Cli {
    /// Root of the checkout to index
    dir: PathBuf,

    /// TOML file with the repository description and build options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Repository name (defaults to the URL host and path, else the directory name)
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    id: Option<u32>,

    #[arg(long)]
    url: Option<String>,

    /// Branch as NAME or NAME=VERSION; repeatable
    #[arg(long = "branch", value_name = "NAME[=VERSION]")]
    branches: Vec<String>,

    /// Skip the build when the index on disk is up to date
    #[arg(long)]
    incremental: bool,

    /// Index only the --changed paths into new shards stacked on the old ones
    #[arg(long)]
    delta: bool,

    /// Path, relative to the checkout, changed or removed since the last
    /// build; repeatable
    #[arg(long = "changed", value_name = "PATH")]
    changed: Vec<String>,

    #[command(flatten)]
    build: BuildFlags,
}

fn parse_branch(s: &str) -> RepositoryBranch {
    match s.split_once('=') {
        Some((name, version)) => RepositoryBranch::new(name, version),
        None => RepositoryBranch::new(s, ""),
    }
}

fn options_from_cli(cli: &Cli) -> Result<Options> {
    let mut opts = Options::default();
    if let Some(path) = &cli.config {
        load_repository_config(path)?.apply(&mut opts)?;
    }
    cli.build.apply(&mut opts);

    let desc = &mut opts.repository_description;
    if let Some(v) = &cli.name {
        desc.name = v.clone();
    }
    if let Some(v) = cli.id {
        desc.id = v;
    }
    if let Some(v) = &cli.url {
        desc.url = v.clone();
    }
    if !cli.branches.is_empty() {
        desc.branches = cli.branches.iter().map(|b| parse_branch(b)).collect();
    }
    if desc.branches.is_empty() {
        desc.branches = vec![RepositoryBranch::new("HEAD", "")];
    }
    opts.is_delta = cli.delta;
    if opts.index_dir.as_os_str().is_empty() {
        opts.index_dir = default_index_dir();
    }

    opts.set_defaults();
    if opts.repository_description.name.is_empty() {
        let abs = cli
            .dir
            .canonicalize()
            .with_context(|| format!("resolve {}", cli.dir.display()))?;
        opts.repository_description.name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(opts)
}

fn index_dir(builder: &mut Builder, root: &Path, branches: &[String]) -> Result<usize> {
    let mut walk = ignore::WalkBuilder::new(root);
    walk.hidden(true).git_ignore(true).follow_links(false);
    let mut n = 0usize;
    for entry in walk.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        add_file(builder, entry.path(), rel, branches)?;
        n += 1;
    }
    Ok(n)
}

/// Adds the changed paths that still exist; removed ones are only
/// tombstoned in the older shards.
fn index_changed(
    builder: &mut Builder,
    root: &Path,
    changed: &[String],
    branches: &[String],
) -> Result<usize> {
    let mut n = 0usize;
    for rel in changed {
        let path = root.join(rel);
        if !path.is_file() {
            tracing::debug!(path = %rel, "changed path no longer exists");
            continue;
        }
        add_file(builder, &path, rel.replace('\\', "/"), branches)?;
        n += 1;
    }
    Ok(n)
}

fn add_file(builder: &mut Builder, path: &Path, rel: String, branches: &[String]) -> Result<()> {
    let content = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    builder.add(Document::new(rel, content).with_branches(branches.iter().cloned()))?;
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    let opts = options_from_cli(&cli)?;

    if cli.incremental {
        let (state, shard) = opts.index_state();
        tracing::info!(
            repo = %opts.repository_description.name,
            state = %state,
            shard = ?shard,
            "index state"
        );
        if state == IndexState::Equal {
            return Ok(());
        }
    }

    let branches: Vec<String> = opts
        .repository_description
        .branches
        .iter()
        .map(|b| b.name.clone())
        .collect();
    let mut builder = Builder::new(opts)?;
    for path in &cli.changed {
        builder.mark_file_as_changed_or_removed(path.clone());
    }

    let indexed = if cli.delta {
        index_changed(&mut builder, &cli.dir, &cli.changed, &branches)
    } else {
        index_dir(&mut builder, &cli.dir, &branches)
    };
    // finish also removes temp shards when indexing failed
    let finished = builder.finish();
    let n = indexed?;
    finished?;
    tracing::info!(files = n, index = %builder.opts().index_dir.display(), "index complete");
    Ok(())
}
