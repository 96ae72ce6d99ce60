#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

pub use tempfile;

use zoekt_build::shard::ShardReader;
use zoekt_build::{
    Builder, Document, Entry, Options, ParserMap, ParserType, Repository, RepositoryBranch,
    SymbolParser,
};

pub fn init_test_logging() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Reports every `func <name>` as a function symbol.
#[derive(Default)]
pub struct FakeParser {
    pub calls: AtomicUsize,
}

impl SymbolParser for FakeParser {
    fn parse(&self, _name: &str, content: &[u8]) -> Result<Vec<Entry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(content);
        let mut out = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if let Some(rest) = line.trim_start().strip_prefix("func ") {
                let name: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                out.push(Entry {
                    name,
                    line: i as i64 + 1,
                    kind: "function".into(),
                    ..Default::default()
                });
            }
        }
        Ok(out)
    }
}

pub struct FailingParser;

impl SymbolParser for FailingParser {
    fn parse(&self, name: &str, _content: &[u8]) -> Result<Vec<Entry>> {
        bail!("cannot parse {}", name)
    }
}

pub fn parsers(p: Arc<dyn SymbolParser>) -> ParserMap {
    let mut m = ParserMap::new();
    m.insert(ParserType::Universal, p);
    m
}

pub fn repo(name: &str, id: u32, branches: &[(&str, &str)]) -> Repository {
    Repository {
        id,
        name: name.into(),
        branches: branches
            .iter()
            .map(|(n, v)| RepositoryBranch::new(*n, *v))
            .collect(),
        ..Default::default()
    }
}

/// Sequential options without ctags, with defaults filled in so their hash
/// matches what a builder stores.
pub fn options(dir: &Path, desc: Repository) -> Options {
    let mut o = Options {
        index_dir: dir.to_path_buf(),
        parallelism: 1,
        disable_ctags: true,
        repository_description: desc,
        ..Default::default()
    };
    o.set_defaults();
    o
}

pub fn doc(name: &str, content: &str, branches: &[&str]) -> Document {
    Document::new(name, content).with_branches(branches.iter().copied())
}

/// Build one generation of shards from `docs`.
pub fn build(opts: Options, docs: Vec<Document>) -> Result<()> {
    let mut b = Builder::new(opts)?;
    for d in docs {
        b.add(d)?;
    }
    b.finish()?;
    Ok(())
}

/// File names in `dir` with the given suffix, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<String> {
    let mut out: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(suffix))
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

pub fn shard_files(dir: &Path) -> Vec<String> {
    files_with_suffix(dir, ".zoekt")
}

pub fn tmp_files(dir: &Path) -> Vec<String> {
    files_with_suffix(dir, ".tmp")
}

/// Document name => content for every document in the shard.
pub fn shard_contents(path: &Path) -> Result<HashMap<String, Vec<u8>>> {
    let r = ShardReader::open(path)?;
    Ok(r.documents()?
        .into_iter()
        .map(|d| (d.document.name, d.document.content))
        .collect())
}

/// A compound shard holding `repos`, one document each.
pub fn write_compound(dir: &Path, name: &str, repos: Vec<Repository>) -> Result<PathBuf> {
    let n = repos.len();
    let mut w = zoekt_build::ShardWriter::compound(repos)?;
    for i in 0..n {
        w.add_to(i, Document::new(format!("file{}.txt", i), "compound content"))?;
    }
    let path = dir.join(format!("compound-{}_v16.00000.zoekt", name));
    w.write_file(&path)?;
    Ok(path)
}

/// Saves environment variables and restores them on drop.
pub struct EnvGuard {
    original_values: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            original_values: HashMap::new(),
        }
    }

    pub fn save_and_clear(&mut self, vars: &[&str]) {
        for &var in vars {
            let original = std::env::var(var).ok();
            self.original_values.insert(var.to_string(), original);
            std::env::remove_var(var);
        }
    }

    pub fn set(&self, var: &str, value: &str) {
        std::env::set_var(var, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (var, original_value) in &self.original_values {
            match original_value {
                Some(value) => std::env::set_var(var, value),
                None => std::env::remove_var(var),
            }
        }
    }
}
