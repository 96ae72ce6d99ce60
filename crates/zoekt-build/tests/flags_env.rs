mod common;

use serial_test::serial;
use std::path::PathBuf;

use common::{init_test_logging, repo, EnvGuard};
use zoekt_build::{BuildError, Builder, Options};

const CTAGS_VARS: [&str; 3] = ["CTAGS_COMMAND", "SCIP_CTAGS_COMMAND", "PATH"];

#[test]
fn flags_round_trip_through_args() {
    let o = Options {
        size_max: 1 << 20,
        trigram_max: 5000,
        shard_max: 1 << 24,
        parallelism: 3,
        index_dir: PathBuf::from("/var/lib/zoekt"),
        ctags_must_succeed: true,
        large_files: vec!["**/*.min.js".into(), "!vendor/**".into()],
        mem_profile: Some(PathBuf::from("/tmp/mem")),
        disable_ctags: true,
        shard_merging: true,
        ..Default::default()
    };
    let back = Options::from_args(o.args()).unwrap();
    assert_eq!(back.size_max, o.size_max);
    assert_eq!(back.trigram_max, o.trigram_max);
    assert_eq!(back.shard_max, o.shard_max);
    assert_eq!(back.parallelism, o.parallelism);
    assert_eq!(back.index_dir, o.index_dir);
    assert_eq!(back.large_files, o.large_files);
    assert_eq!(back.mem_profile, o.mem_profile);
    assert!(back.ctags_must_succeed && back.disable_ctags && back.shard_merging);
    assert_eq!(back.get_hash(), o.get_hash());
}

#[test]
#[serial]
fn ctags_commands_come_from_the_environment() {
    let mut guard = EnvGuard::new();
    guard.save_and_clear(&CTAGS_VARS);
    guard.set("CTAGS_COMMAND", "/opt/ctags/bin/ctags");
    guard.set("SCIP_CTAGS_COMMAND", "/opt/scip/scip-ctags");

    let mut o = Options::default();
    o.set_defaults();
    assert_eq!(o.ctags_path, Some(PathBuf::from("/opt/ctags/bin/ctags")));
    assert_eq!(o.scip_ctags_path, Some(PathBuf::from("/opt/scip/scip-ctags")));

    let mut disabled = Options {
        disable_ctags: true,
        ..Default::default()
    };
    disabled.set_defaults();
    assert_eq!(disabled.ctags_path, None);
}

#[test]
#[serial]
fn ctags_is_looked_up_on_path() {
    let bin_dir = tempfile::tempdir().unwrap();
    let ctags = bin_dir.path().join("universal-ctags");
    std::fs::write(&ctags, b"#!/bin/sh\n").unwrap();

    let mut guard = EnvGuard::new();
    guard.save_and_clear(&CTAGS_VARS);
    guard.set("PATH", &bin_dir.path().to_string_lossy());

    let mut o = Options::default();
    o.set_defaults();
    assert_eq!(o.ctags_path, Some(ctags));
    assert_eq!(o.scip_ctags_path, None);
}

#[test]
#[serial]
fn required_ctags_must_exist() {
    init_test_logging();
    let mut guard = EnvGuard::new();
    guard.save_and_clear(&CTAGS_VARS);

    let dir = tempfile::tempdir().unwrap();
    let o = Options {
        index_dir: dir.path().to_path_buf(),
        ctags_must_succeed: true,
        repository_description: repo("needs-ctags", 1, &[("main", "v1")]),
        ..Default::default()
    };
    let err = Builder::new(o.clone()).err().unwrap();
    assert!(matches!(err, BuildError::Ctags(_)), "{}", err);

    // without the requirement the build just runs without symbols
    let lenient = Options {
        ctags_must_succeed: false,
        ..o
    };
    let mut b = Builder::new(lenient).unwrap();
    b.add_file("main.go", "package main").unwrap();
    b.finish().unwrap();
}
