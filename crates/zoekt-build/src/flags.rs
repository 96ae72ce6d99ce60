//! Command line surface for build options.
//!
//! `BuildFlags` parses the flags, `BuildFlags::apply` copies them onto
//! `Options`, and `Options::args` renders options back into flags, so
//! `Options::from_args(&opts.args())` reproduces every flag-covered field.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::options::Options;

// Flags that take a value; the argument after them is never a flag.
const VALUE_FLAGS: [&str; 7] = [
    "file_limit",
    "max_trigram_count",
    "shard_limit",
    "parallelism",
    "index",
    "large_file",
    "memprofile",
];

const SWITCH_FLAGS: [&str; 3] = ["require_ctags", "disable_ctags", "shard_merging"];

#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct BuildFlags {
    /// Maximum file size
    #[arg(long = "file_limit", value_name = "BYTES")]
    pub file_limit: Option<usize>,

    /// Maximum number of trigrams per document
    #[arg(long = "max_trigram_count", value_name = "N")]
    pub max_trigram_count: Option<usize>,

    /// Maximum corpus size for a shard
    #[arg(long = "shard_limit", value_name = "BYTES")]
    pub shard_limit: Option<usize>,

    /// Maximum number of shards built in parallel
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Directory for search indices
    #[arg(long = "index", value_name = "DIR")]
    pub index: Option<PathBuf>,

    /// If set, ctags calls must succeed
    #[arg(long = "require_ctags")]
    pub require_ctags: bool,

    /// Glob of files indexed regardless of their size; repeatable
    #[arg(long = "large_file", value_name = "GLOB")]
    pub large_file: Vec<String>,

    /// Write memory summaries to FILE.<n>; builds shards sequentially
    #[arg(long, value_name = "FILE")]
    pub memprofile: Option<PathBuf>,

    /// If set, ctags will not be called
    #[arg(long = "disable_ctags")]
    pub disable_ctags: bool,

    /// If set, compound shards are tombstoned instead of deleted
    #[arg(long = "shard_merging")]
    pub shard_merging: bool,
}

impl BuildFlags {
    pub fn apply(&self, o: &mut Options) {
        if let Some(v) = self.file_limit {
            o.size_max = v;
        }
        if let Some(v) = self.max_trigram_count {
            o.trigram_max = v;
        }
        if let Some(v) = self.shard_limit {
            o.shard_max = v;
        }
        if let Some(v) = self.parallelism {
            o.parallelism = v;
        }
        if let Some(dir) = &self.index {
            o.index_dir = dir.clone();
        }
        if self.require_ctags {
            o.ctags_must_succeed = true;
        }
        o.large_files.extend(self.large_file.iter().cloned());
        if let Some(p) = &self.memprofile {
            o.mem_profile = Some(p.clone());
        }
        if self.disable_ctags {
            o.disable_ctags = true;
        }
        if self.shard_merging {
            o.shard_merging = true;
        }
    }
}

/// Rewrite `-file_limit` style flags to their `--` form. Anything that is
/// not a known build flag is passed through, and so is the value following
/// a value-taking flag.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut value_next = false;
    args.into_iter()
        .map(|a| {
            let a: OsString = a.into();
            if std::mem::take(&mut value_next) {
                return a;
            }
            let Some(s) = a.to_str() else {
                return a;
            };
            let (dashes, rest) = match s.strip_prefix("--") {
                Some(rest) => (2, rest),
                None => match s.strip_prefix('-') {
                    Some(rest) => (1, rest),
                    None => return a,
                },
            };
            let (name, inline_value) = match rest.split_once('=') {
                Some((name, _)) => (name, true),
                None => (rest, false),
            };
            let takes_value = VALUE_FLAGS.contains(&name);
            if !takes_value && !SWITCH_FLAGS.contains(&name) {
                return a;
            }
            value_next = takes_value && !inline_value;
            if dashes == 1 {
                OsString::from(format!("-{}", s))
            } else {
                a
            }
        })
        .collect()
}

impl Options {
    /// Flags reproducing the flag-covered fields. Zero values are left out.
    /// Values are attached with `=` so they may start with a dash.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut value = |flag: &str, v: String| args.push(format!("--{}={}", flag, v));
        if self.size_max != 0 {
            value("file_limit", self.size_max.to_string());
        }
        if self.trigram_max != 0 {
            value("max_trigram_count", self.trigram_max.to_string());
        }
        if self.shard_max != 0 {
            value("shard_limit", self.shard_max.to_string());
        }
        if self.parallelism != 0 {
            value("parallelism", self.parallelism.to_string());
        }
        if !self.index_dir.as_os_str().is_empty() {
            value("index", self.index_dir.to_string_lossy().into_owned());
        }
        for p in &self.large_files {
            value("large_file", p.clone());
        }
        if let Some(p) = &self.mem_profile {
            value("memprofile", p.to_string_lossy().into_owned());
        }
        if self.ctags_must_succeed {
            args.push("--require_ctags".to_string());
        }
        if self.disable_ctags {
            args.push("--disable_ctags".to_string());
        }
        if self.shard_merging {
            args.push("--shard_merging".to_string());
        }
        args
    }

    /// Parse build flags (either dash style) into fresh options.
    pub fn from_args<I, T>(args: I) -> Result<Options, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let argv = std::iter::once(OsString::from("zoekt-build")).chain(normalize_args(args));
        let flags = BuildFlags::try_parse_from(argv)?;
        let mut o = Options::default();
        flags.apply(&mut o);
        Ok(o)
    }
}
