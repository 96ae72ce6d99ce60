use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::types::{Document, IndexMetadata, Repository, Symbol};

use super::{
    write_uvarint, FEATURE_VERSION, HEADER_LEN, INDEX_FORMAT_VERSION, MAGIC, MIN_READER_VERSION,
};

/// Documents carry their branches as a 64-bit mask.
const MAX_BRANCHES: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct MetaSection {
    pub repositories: Vec<Repository>,
    pub metadata: IndexMetadata,
}

/// Encodes one shard. Documents are written in the order they were added.
pub struct ShardWriter {
    repos: Vec<Repository>,
    docs: Vec<(u16, Document)>,
    content_size: usize,
    index_time: DateTime<Utc>,
    id: String,
    feature_version: u32,
}

impl ShardWriter {
    pub fn new(repo: Repository) -> Result<Self> {
        Self::compound(vec![repo])
    }

    /// A writer for a shard holding several repositories.
    pub fn compound(repos: Vec<Repository>) -> Result<Self> {
        if repos.is_empty() {
            bail!("shard needs at least one repository");
        }
        if repos.len() > u16::MAX as usize {
            bail!("too many repositories for one shard: {}", repos.len());
        }
        for r in &repos {
            if r.branches.len() > MAX_BRANCHES {
                bail!(
                    "repository {:?} has {} branches, at most {} are supported",
                    r.name,
                    r.branches.len(),
                    MAX_BRANCHES
                );
            }
        }
        Ok(Self {
            repos,
            docs: Vec::new(),
            content_size: 0,
            index_time: Utc::now(),
            id: String::new(),
            feature_version: FEATURE_VERSION,
        })
    }

    pub fn index_time(mut self, t: DateTime<Utc>) -> Self {
        self.index_time = t;
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Override the feature version recorded in the shard, e.g. to emit a
    /// shard for an older reader.
    pub fn feature_version(mut self, v: u32) -> Self {
        self.feature_version = v;
        self
    }

    pub fn add(&mut self, doc: Document) -> Result<()> {
        self.add_to(0, doc)
    }

    pub fn add_to(&mut self, repo: usize, doc: Document) -> Result<()> {
        let Some(r) = self.repos.get(repo) else {
            bail!("repository index {} out of range", repo);
        };
        for b in &doc.branches {
            if !r.branches.iter().any(|rb| &rb.name == b) {
                bail!("no branch found for {}", b);
            }
        }
        if !doc.symbols_meta.is_empty() && doc.symbols_meta.len() != doc.symbols.len() {
            bail!(
                "{}: {} symbol ranges but {} symbol entries",
                doc.name,
                doc.symbols.len(),
                doc.symbols_meta.len()
            );
        }
        if doc.content.len() > u32::MAX as usize {
            bail!("{}: content too large", doc.name);
        }
        self.content_size += doc.name.len() + doc.content.len();
        self.docs.push((repo as u16, doc));
        Ok(())
    }

    pub fn num_files(&self) -> usize {
        self.docs.len()
    }

    /// Sum of name and content bytes of all added documents.
    pub fn content_size(&self) -> usize {
        self.content_size
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    /// Serialize the shard into `w`. Returns the number of bytes written.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<u64> {
        let docs_buf = self.encode_docs()?;
        let postings_buf = self.encode_postings();
        let meta_buf = serde_json::to_vec(&MetaSection {
            repositories: self.repos.clone(),
            metadata: self.metadata(),
        })
        .context("encode shard metadata")?;

        let docs_off = HEADER_LEN as u64;
        let postings_off = docs_off + docs_buf.len() as u64;
        let meta_off = postings_off + postings_buf.len() as u64;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend(&MAGIC.to_le_bytes());
        header.extend(&INDEX_FORMAT_VERSION.to_le_bytes());
        header.extend(&self.feature_version.to_le_bytes());
        header.extend(&(self.docs.len() as u32).to_le_bytes());
        header.extend(&docs_off.to_le_bytes());
        header.extend(&postings_off.to_le_bytes());
        header.extend(&meta_off.to_le_bytes());

        w.write_all(&header)?;
        w.write_all(&docs_buf)?;
        w.write_all(&postings_buf)?;
        w.write_all(&meta_buf)?;
        Ok(meta_off + meta_buf.len() as u64)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create shard {}", path.display()))?;
        let mut bw = BufWriter::new(f);
        let n = self.write(&mut bw)?;
        bw.flush()?;
        Ok(n)
    }

    fn metadata(&self) -> IndexMetadata {
        let mut language_map = BTreeMap::new();
        for (_, d) in &self.docs {
            if d.language.is_empty() {
                continue;
            }
            let next = language_map.len() as u16;
            language_map.entry(d.language.clone()).or_insert(next);
        }
        IndexMetadata {
            index_format_version: INDEX_FORMAT_VERSION,
            index_feature_version: self.feature_version,
            index_min_reader_version: MIN_READER_VERSION,
            index_time: Some(self.index_time),
            plain_ascii: self.docs.iter().all(|(_, d)| d.content.is_ascii()),
            language_map,
            zoekt_version: env!("CARGO_PKG_VERSION").to_string(),
            id: self.id.clone(),
        }
    }

    fn encode_docs(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.content_size + self.docs.len() * 32);
        let no_meta = Symbol::default();
        for (repo, d) in &self.docs {
            buf.extend(&repo.to_le_bytes());
            for s in [&d.name, &d.language, &d.skip_reason, &d.sub_repository_path] {
                put_str(&mut buf, s)?;
            }
            let mask = branch_mask(&self.repos[*repo as usize], &d.branches);
            buf.extend(&mask.to_le_bytes());
            buf.extend(&(d.content.len() as u32).to_le_bytes());
            buf.extend(&d.content);

            buf.extend(&(d.symbols.len() as u32).to_le_bytes());
            for (i, sec) in d.symbols.iter().enumerate() {
                buf.extend(&sec.start.to_le_bytes());
                buf.extend(&sec.end.to_le_bytes());
                let m = d.symbols_meta.get(i).unwrap_or(&no_meta);
                for s in [&m.sym, &m.kind, &m.parent, &m.parent_kind] {
                    put_str(&mut buf, s)?;
                }
            }
        }
        Ok(buf)
    }

    fn encode_postings(&self) -> Vec<u8> {
        // Byte trigrams with their start offsets, extracted per document in parallel.
        let per_doc: Vec<Vec<([u8; 3], u32)>> = self
            .docs
            .par_iter()
            .map(|(_, d)| {
                d.content
                    .windows(3)
                    .enumerate()
                    .map(|(i, w)| ([w[0], w[1], w[2]], i as u32))
                    .collect()
            })
            .collect();

        let mut term_map: BTreeMap<[u8; 3], BTreeMap<u32, Vec<u32>>> = BTreeMap::new();
        for (doc, tris) in per_doc.into_iter().enumerate() {
            for (tri, pos) in tris {
                term_map
                    .entry(tri)
                    .or_default()
                    .entry(doc as u32)
                    .or_default()
                    .push(pos);
            }
        }

        let mut buf = Vec::new();
        buf.extend(&(term_map.len() as u32).to_le_bytes());
        for (tri, postings) in &term_map {
            buf.extend(&tri[..]);
            buf.extend(&(postings.len() as u32).to_le_bytes());
            let mut prev_doc = 0u32;
            for (doc, positions) in postings {
                write_uvarint(&mut buf, doc - prev_doc);
                write_uvarint(&mut buf, positions.len() as u32);
                let mut prev_pos = 0u32;
                for &p in positions {
                    write_uvarint(&mut buf, p - prev_pos);
                    prev_pos = p;
                }
                prev_doc = *doc;
            }
        }
        buf
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        bail!("string too long for shard: {} bytes", s.len());
    }
    buf.extend(&(s.len() as u16).to_le_bytes());
    buf.extend(s.as_bytes());
    Ok(())
}

fn branch_mask(repo: &Repository, branches: &[String]) -> u64 {
    let mut mask = 0u64;
    for b in branches {
        if let Some(i) = repo.branches.iter().position(|rb| &rb.name == b) {
            mask |= 1 << i;
        }
    }
    mask
}
