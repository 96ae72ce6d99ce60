use super::writer::MetaSection;
use super::{read_uvarint, HEADER_LEN, MAGIC, READ_VERSIONS};
use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use std::{fs::File, path::Path};

use crate::types::{Document, DocumentSection, IndexMetadata, Repository, Symbol};

/// Read-only view of a shard file.
pub struct ShardReader {
    mmap: Mmap,
    format_version: u32,
    feature_version: u32,
    doc_count: u32,
    docs_off: usize,
    postings_off: usize,
    meta_off: usize,
}

/// A decoded document together with the index of its repository in the
/// shard's repository list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDocument {
    pub repository: usize,
    pub document: Document,
}

impl ShardReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("open shard {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_LEN {
            bail!("shard truncated (len={})", mmap.len());
        }

        let mut cur = Cursor::new(&mmap[..HEADER_LEN]);
        let magic = cur.u32()?;
        if magic != MAGIC {
            bail!("bad magic {:#x}", magic);
        }
        let format_version = cur.u32()?;
        if !READ_VERSIONS.iter().any(|(f, _)| *f == format_version) {
            bail!("unsupported format version {}", format_version);
        }
        let feature_version = cur.u32()?;
        let doc_count = cur.u32()?;
        let docs_off = cur.u64()? as usize;
        let postings_off = cur.u64()? as usize;
        let meta_off = cur.u64()? as usize;
        if !(HEADER_LEN <= docs_off
            && docs_off <= postings_off
            && postings_off <= meta_off
            && meta_off <= mmap.len())
        {
            bail!(
                "section offsets out of range (docs={} postings={} meta={} len={})",
                docs_off,
                postings_off,
                meta_off,
                mmap.len()
            );
        }

        Ok(Self {
            mmap,
            format_version,
            feature_version,
            doc_count,
            docs_off,
            postings_off,
            meta_off,
        })
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn feature_version(&self) -> u32 {
        self.feature_version
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Repositories and index metadata as written by the encoder, without
    /// any `.meta` overlay applied.
    pub fn metadata(&self) -> Result<(Vec<Repository>, IndexMetadata)> {
        let m: MetaSection = serde_json::from_slice(&self.mmap[self.meta_off..])
            .context("decode shard metadata")?;
        Ok((m.repositories, m.metadata))
    }

    pub fn documents(&self) -> Result<Vec<ShardDocument>> {
        let (repos, _) = self.metadata()?;
        let mut cur = Cursor::new(&self.mmap[self.docs_off..self.postings_off]);
        let mut out = Vec::with_capacity(self.doc_count as usize);
        for i in 0..self.doc_count {
            let repository = cur.u16()? as usize;
            let Some(repo) = repos.get(repository) else {
                bail!("document {} refers to unknown repository {}", i, repository);
            };
            let name = cur.str()?;
            let language = cur.str()?;
            let skip_reason = cur.str()?;
            let sub_repository_path = cur.str()?;
            let mask = cur.u64()?;
            let branches = repo
                .branches
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1u64 << bit) != 0)
                .map(|(_, b)| b.name.clone())
                .collect();
            let content_len = cur.u32()? as usize;
            let content = cur.take(content_len)?.to_vec();

            let n_syms = cur.u32()? as usize;
            let mut symbols = Vec::with_capacity(n_syms);
            let mut symbols_meta = Vec::with_capacity(n_syms);
            for _ in 0..n_syms {
                let start = cur.u32()?;
                let end = cur.u32()?;
                symbols.push(DocumentSection { start, end });
                symbols_meta.push(Symbol {
                    sym: cur.str()?,
                    kind: cur.str()?,
                    parent: cur.str()?,
                    parent_kind: cur.str()?,
                });
            }
            out.push(ShardDocument {
                repository,
                document: Document {
                    name,
                    content,
                    language,
                    symbols,
                    symbols_meta,
                    skip_reason,
                    branches,
                    sub_repository_path,
                },
            });
        }
        Ok(out)
    }

    /// Ids of the documents containing the byte trigram `tri`, ascending.
    pub fn docs_with_trigram(&self, tri: [u8; 3]) -> Result<Vec<u32>> {
        let mut cur = Cursor::new(&self.mmap[self.postings_off..self.meta_off]);
        let n_terms = cur.u32()?;
        for _ in 0..n_terms {
            let term = cur.take(3)?;
            let n_docs = cur.u32()?;
            let matched = term == tri;
            let mut docs = Vec::new();
            let mut doc = 0u32;
            for _ in 0..n_docs {
                doc += cur.uvarint()?;
                let npos = cur.uvarint()?;
                for _ in 0..npos {
                    cur.uvarint()?;
                }
                if matched {
                    docs.push(doc);
                }
            }
            if matched {
                return Ok(docs);
            }
        }
        Ok(Vec::new())
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.buf.len());
        let Some(end) = end else {
            bail!(
                "shard truncated: need {} bytes at offset {} of {}",
                n,
                self.pos,
                self.buf.len()
            );
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into()?))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into()?))
    }

    fn str(&mut self) -> Result<String> {
        let n = self.u16()? as usize;
        let b = self.take(n)?;
        String::from_utf8(b.to_vec()).context("invalid utf-8 string in shard")
    }

    fn uvarint(&mut self) -> Result<u32> {
        read_uvarint(self.buf, &mut self.pos)
    }
}
