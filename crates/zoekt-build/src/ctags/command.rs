use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{Entry, SymbolParser};

/// Runs a ctags compatible binary once per file:
/// `<bin> --output-format=json --fields=+n -f - <file>`.
#[derive(Debug, Clone)]
pub struct CtagsCommand {
    bin: PathBuf,
}

#[derive(Deserialize)]
struct JsonTag {
    #[serde(rename = "_type")]
    typ: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    scope: String,
    #[serde(default, rename = "scopeKind")]
    scope_kind: String,
}

impl CtagsCommand {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl SymbolParser for CtagsCommand {
    fn parse(&self, name: &str, content: &[u8]) -> Result<Vec<Entry>> {
        // ctags picks the language from the file extension
        let suffix = Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut tmp = tempfile::Builder::new()
            .prefix("zoekt-ctags.")
            .suffix(&suffix)
            .tempfile()
            .context("create ctags input file")?;
        tmp.write_all(content)?;
        tmp.flush()?;

        let out = Command::new(&self.bin)
            .args(["--output-format=json", "--fields=+n", "-f", "-"])
            .arg(tmp.path())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {}", self.bin.display()))?;
        if !out.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.bin.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        parse_json_tags(&out.stdout)
    }
}

fn parse_json_tags(out: &[u8]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for line in String::from_utf8_lossy(out).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tag: JsonTag =
            serde_json::from_str(line).with_context(|| format!("bad ctags output {:?}", line))?;
        if tag.typ != "tag" {
            continue;
        }
        entries.push(Entry {
            name: tag.name,
            line: tag.line,
            kind: tag.kind,
            parent: tag.scope,
            parent_kind: tag.scope_kind,
        });
    }
    Ok(entries)
}
