//! Index-time document ordering.
//!
//! Documents early in a shard are searched first and get a boost at query
//! time, so each batch is sorted by a vector of scores before encoding.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

use crate::types::Document;

static TEST_RE: Lazy<Regex> = Lazy::new(|| Regex::new("[Tt]est").unwrap());

// Maps [0, inf) to [0, 1) monotonically.
fn squash(n: usize) -> f64 {
    let x = n as f64;
    x / (1.0 + x)
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

pub fn is_generated(name: &str) -> bool {
    name.ends_with("min.js") || name.ends_with("js.map")
}

pub fn is_vendored(name: &str) -> bool {
    name.contains("vendor/") || name.contains("node_modules/")
}

pub fn is_test(name: &str) -> bool {
    TEST_RE.is_match(name)
}

/// Guess whether a file matters less in search results: tests, generated
/// and vendored files.
pub fn is_low_priority(name: &str) -> bool {
    is_test(name) || is_generated(name) || is_vendored(name)
}

/// Score vector for `doc`; smaller sorts earlier.
pub fn rank(doc: &Document, orig_idx: usize) -> Vec<f64> {
    vec![
        flag(doc.is_skipped()),
        flag(is_generated(&doc.name)),
        flag(is_vendored(&doc.name)),
        flag(is_test(&doc.name)),
        squash(doc.name.len()),
        1.0 - squash(doc.symbols.len()),
        squash(doc.content.len()),
        1.0 - squash(doc.branches.len()),
        // keeps the sort total and stable
        squash(orig_idx),
    ]
}

fn compare(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

pub fn sort_documents(docs: &mut Vec<Document>) {
    let mut ranked: Vec<(Vec<f64>, Document)> = docs
        .drain(..)
        .enumerate()
        .map(|(i, d)| (rank(&d, i), d))
        .collect();
    ranked.sort_by(|a, b| compare(&a.0, &b.0));
    docs.extend(ranked.into_iter().map(|(_, d)| d));
}
