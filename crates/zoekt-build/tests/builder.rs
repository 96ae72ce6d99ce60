mod common;

use anyhow::Result;
use std::sync::Arc;

use common::{
    doc, files_with_suffix, init_test_logging, options, parsers, repo, shard_contents,
    shard_files, tmp_files, write_compound, FailingParser, FakeParser,
};
use zoekt_build::shard::{read_metadata_path, ShardReader};
use zoekt_build::{BuildError, Builder, DocumentSection, Entry, SymbolParser};

#[test]
fn shards_stay_within_budget() -> Result<()> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("budget", 1, &[("main", "v1")]));
    o.shard_max = 100;
    o.parallelism = 4;

    let mut b = Builder::new(o)?;
    for i in 0..10 {
        b.add(doc(&format!("f{}.txt", i), &"x".repeat(30), &["main"]))?;
    }
    b.add(doc("huge.txt", &"y".repeat(200), &["main"]))?;
    b.add(doc("tail.txt", "tail content", &["main"]))?;
    b.finish()?;

    let shards = shard_files(dir.path());
    assert!(shards.len() >= 6, "got {:?}", shards);
    let mut total_docs = 0;
    for s in &shards {
        let docs = ShardReader::open(dir.path().join(s))?.documents()?;
        let size: usize = docs
            .iter()
            .map(|d| d.document.name.len() + d.document.content.len())
            .sum();
        assert!(
            size <= 100 || docs.len() == 1,
            "{} holds {} bytes in {} docs",
            s,
            size,
            docs.len()
        );
        total_docs += docs.len();
    }
    assert_eq!(total_docs, 12);
    assert!(tmp_files(dir.path()).is_empty());
    Ok(())
}

#[test]
fn rebuild_removes_stale_shards() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("stale", 1, &[("main", "v1")]));
    o.shard_max = 50;
    common::build(
        o.clone(),
        (0..6)
            .map(|i| doc(&format!("f{}.txt", i), &"z".repeat(30), &["main"]))
            .collect(),
    )?;
    assert_eq!(shard_files(dir.path()).len(), 6);

    common::build(o, vec![doc("only.txt", "just one file", &["main"])])?;
    assert_eq!(shard_files(dir.path()), vec!["stale_v16.00000.zoekt"]);
    let contents = shard_contents(&dir.path().join("stale_v16.00000.zoekt"))?;
    assert_eq!(contents.len(), 1);
    assert!(contents.contains_key("only.txt"));
    Ok(())
}

#[test]
fn documents_are_ranked_inside_a_shard() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let o = options(dir.path(), repo("ranked", 1, &[("main", "v1")]));
    common::build(
        o,
        vec![
            doc("foo_test.go", "package foo", &["main"]),
            doc("vendor/x.go", "package x", &["main"]),
            doc("main.go", "package main", &["main"]),
        ],
    )?;
    let docs = ShardReader::open(dir.path().join("ranked_v16.00000.zoekt"))?.documents()?;
    let names: Vec<&str> = docs.iter().map(|d| d.document.name.as_str()).collect();
    assert_eq!(names, vec!["main.go", "foo_test.go", "vendor/x.go"]);
    Ok(())
}

#[test]
fn symbols_come_from_the_parser() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("syms", 1, &[("main", "v1")]));
    o.disable_ctags = false;
    let parser = Arc::new(FakeParser::default());

    let mut b = Builder::with_parsers(o, parsers(parser.clone()))?;
    b.add(doc("main.go", "package main\n\nfunc Hello() {}\n", &["main"]))?;
    b.add(doc("README.md", "no functions here", &["main"]))?;
    b.finish()?;

    let r = ShardReader::open(dir.path().join("syms_v16.00000.zoekt"))?;
    let docs = r.documents()?;
    let main = docs
        .iter()
        .find(|d| d.document.name == "main.go")
        .map(|d| &d.document)
        .ok_or_else(|| anyhow::anyhow!("main.go missing"))?;
    assert_eq!(main.symbols, vec![DocumentSection { start: 19, end: 24 }]);
    assert_eq!(main.symbols_meta[0].sym, "Hello");
    assert_eq!(main.language, "Go");
    assert_eq!(parser.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let (repos, _) = r.metadata()?;
    assert!(repos[0].has_symbols);
    Ok(())
}

#[test]
fn parse_errors_are_logged_unless_required() -> Result<()> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("lenient", 1, &[("main", "v1")]));
    o.disable_ctags = false;

    let mut b = Builder::with_parsers(o.clone(), parsers(Arc::new(FailingParser)))?;
    b.add(doc("main.go", "func main() {}", &["main"]))?;
    b.finish()?;
    let docs = ShardReader::open(dir.path().join("lenient_v16.00000.zoekt"))?.documents()?;
    assert!(docs[0].document.symbols.is_empty());

    let strict_dir = tempfile::tempdir()?;
    o.index_dir = strict_dir.path().to_path_buf();
    o.ctags_must_succeed = true;
    let mut b = Builder::with_parsers(o, parsers(Arc::new(FailingParser)))?;
    b.add(doc("main.go", "func main() {}", &["main"]))?;
    let err = b.finish().unwrap_err();
    assert!(matches!(err, BuildError::Ctags(_)), "{}", err);
    assert!(shard_files(strict_dir.path()).is_empty());
    assert!(tmp_files(strict_dir.path()).is_empty());
    Ok(())
}

#[test]
fn finish_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file")?;
    let o = options(&blocker, repo("broken", 1, &[("main", "v1")]));

    let mut b = Builder::new(o)?;
    b.add(doc("a.txt", "some content", &["main"]))?;
    let first = b.finish().unwrap_err();
    assert!(matches!(first, BuildError::Io(_)), "{}", first);
    let second = b.finish().unwrap_err();
    assert_eq!(first.to_string(), second.to_string());

    // adds after finish are ignored
    b.add(doc("b.txt", "more content", &["main"]))?;
    Ok(())
}

#[test]
fn second_finish_does_no_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let o = options(dir.path(), repo("twice", 1, &[("main", "v1")]));
    let mut b = Builder::new(o)?;
    b.add(doc("a.txt", "some content", &["main"]))?;
    b.finish()?;

    let shard = dir.path().join("twice_v16.00000.zoekt");
    std::fs::remove_file(&shard)?;
    b.finish()?;
    assert!(!shard.exists());
    Ok(())
}

#[test]
fn compound_shards_are_tombstoned_when_merging() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let compound = write_compound(
        dir.path(),
        "ab",
        vec![repo("a", 1, &[("main", "v1")]), repo("b", 2, &[("main", "v1")])],
    )?;

    let mut o = options(dir.path(), repo("a", 1, &[("main", "v2")]));
    o.shard_merging = true;
    common::build(o, vec![doc("new.txt", "fresh content", &["main"])])?;

    assert!(compound.exists());
    let (repos, _) = read_metadata_path(&compound)?;
    assert!(repos[0].tombstone);
    assert!(!repos[1].tombstone);
    assert!(dir.path().join("a_v16.00000.zoekt").exists());
    Ok(())
}

#[test]
fn compound_shards_are_deleted_without_merging() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let compound = write_compound(
        dir.path(),
        "ab",
        vec![repo("a", 1, &[("main", "v1")]), repo("b", 2, &[("main", "v1")])],
    )?;

    let o = options(dir.path(), repo("a", 1, &[("main", "v2")]));
    common::build(o, vec![doc("new.txt", "fresh content", &["main"])])?;
    assert!(!compound.exists());
    Ok(())
}

#[test]
fn memory_profiles_are_written_per_shard() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let prof_dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("prof", 1, &[("main", "v1")]));
    o.parallelism = 4;
    o.shard_max = 40;
    o.mem_profile = Some(prof_dir.path().join("mem"));
    common::build(
        o,
        vec![
            doc("a.txt", &"a".repeat(30), &["main"]),
            doc("b.txt", &"b".repeat(30), &["main"]),
        ],
    )?;

    assert_eq!(shard_files(dir.path()).len(), 2);
    let profiles = files_with_suffix(prof_dir.path(), "");
    assert_eq!(profiles, vec!["mem.0", "mem.1"]);
    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(prof_dir.path().join("mem.0"))?)?;
    assert_eq!(summary["finished_shards"], 1);
    assert!(summary.get("approx_resident_bytes").is_some());
    assert!(summary.get("resident_bytes").is_none());
    Ok(())
}

#[test]
fn large_file_patterns_bypass_size_limit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("large", 1, &[("main", "v1")]));
    o.size_max = 10;
    o.large_files = vec!["data/*.json".into()];
    common::build(
        o,
        vec![
            doc("data/big.json", "{\"key\": \"a long value\"}", &["main"]),
            doc("other/big.json", "{\"key\": \"a long value\"}", &["main"]),
        ],
    )?;
    let docs = ShardReader::open(dir.path().join("large_v16.00000.zoekt"))?.documents()?;
    let kept = docs.iter().find(|d| d.document.name == "data/big.json");
    let skipped = docs.iter().find(|d| d.document.name == "other/big.json");
    assert!(kept.is_some_and(|d| !d.document.is_skipped()));
    assert!(skipped.is_some_and(|d| d.document.skip_reason == "document size 23 larger than limit 10"));
    Ok(())
}

/// Fails for a single file name, succeeds with no tags otherwise.
struct FailOn(&'static str);

impl SymbolParser for FailOn {
    fn parse(&self, name: &str, _content: &[u8]) -> anyhow::Result<Vec<Entry>> {
        if name == self.0 {
            anyhow::bail!("cannot parse {}", name);
        }
        Ok(Vec::new())
    }
}

#[test]
fn failed_parallel_shard_discards_the_others() -> Result<()> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let mut o = options(dir.path(), repo("pooled", 1, &[("main", "v1")]));
    o.parallelism = 4;
    o.shard_max = 40;
    o.disable_ctags = false;
    o.ctags_must_succeed = true;

    let mut b = Builder::with_parsers(o, parsers(Arc::new(FailOn("f5.go"))))?;
    for i in 0..8 {
        // once the failure is recorded later adds report it; finish still cleans up
        let _ = b.add(doc(&format!("f{}.go", i), &"x".repeat(30), &["main"]));
    }
    let err = b.finish().unwrap_err();
    assert!(matches!(err, BuildError::Ctags(_)), "{}", err);
    assert!(shard_files(dir.path()).is_empty(), "{:?}", shard_files(dir.path()));
    assert!(tmp_files(dir.path()).is_empty(), "{:?}", tmp_files(dir.path()));
    Ok(())
}
