//! Shard module: the on-disk encoder (`ShardWriter`), a memory-mapped
//! `ShardReader`, and the `.meta` overlay helpers used for tombstoning.
//!
//! Layout of a shard file (all integers little endian):
//!
//! ```text
//! header   magic u32 | format u32 | feature u32 | docs u32 | docs_off u64 | postings_off u64 | meta_off u64
//! docs     per document: repo u16, strings (u16 len + bytes), branch mask u64, content (u32 len + bytes), symbols
//! postings trigram count u32, then per trigram: 3 bytes, n_docs u32, varint deltas of (doc, npos, pos...)
//! meta     JSON {"Repositories": [...], "Metadata": {...}} until EOF
//! ```

pub const MAGIC: u32 = 0x5a4f_454b; // 'ZOEK'

/// Format version written by this builder.
pub const INDEX_FORMAT_VERSION: u32 = 16;

/// Format version that readers already understand but writers do not emit yet.
pub const NEXT_INDEX_FORMAT_VERSION: u32 = 17;

/// Bumped when the encoder starts emitting data older shards lack.
pub const FEATURE_VERSION: u32 = 12;

/// Oldest feature version a reader needs to understand our shards.
pub const MIN_READER_VERSION: u32 = 12;

pub const HEADER_LEN: usize = 4 * 4 + 8 * 3;

/// Shard file extension (without the dot).
pub const SHARD_EXT: &str = "zoekt";

/// Prefix of shards holding more than one repository.
pub const COMPOUND_PREFIX: &str = "compound-";

/// (format version, feature version) pairs this process can read, newest
/// preferred first.
pub const READ_VERSIONS: [(u32, u32); 2] = [
    (INDEX_FORMAT_VERSION, FEATURE_VERSION),
    (NEXT_INDEX_FORMAT_VERSION, FEATURE_VERSION),
];

mod writer;
pub use writer::ShardWriter;

mod reader;
pub use reader::{ShardDocument, ShardReader};

pub mod meta;
pub use meta::{
    index_file_paths, read_metadata_path, read_metadata_path_alive, set_tombstone,
    write_repo_meta_temp,
};

/// Returns true for `compound-*` shard files and their overlays.
pub fn is_compound_shard(path: &std::path::Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(COMPOUND_PREFIX))
        .unwrap_or(false)
}

// LEB128 varints shared by the writer and reader.
pub(crate) fn write_uvarint(buf: &mut Vec<u8>, mut v: u32) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub(crate) fn read_uvarint(buf: &[u8], pos: &mut usize) -> anyhow::Result<u32> {
    let mut shift = 0u32;
    let mut val = 0u32;
    loop {
        let Some(&b) = buf.get(*pos) else {
            anyhow::bail!("varint truncated at offset {}", *pos);
        };
        *pos += 1;
        if shift > 28 {
            anyhow::bail!("varint overflow at offset {}", *pos);
        }
        val |= ((b & 0x7f) as u32) << shift;
        if b & 0x80 == 0 {
            return Ok(val);
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn varint_handles_boundaries() {
        let mut buf = Vec::new();
        for v in [0u32, 1, 127, 128, 300, u32::MAX] {
            write_uvarint(&mut buf, v);
        }
        let mut pos = 0;
        for v in [0u32, 1, 127, 128, 300, u32::MAX] {
            assert_eq!(read_uvarint(&buf, &mut pos).unwrap(), v);
        }
        assert_eq!(pos, buf.len());
        assert!(read_uvarint(&[0x80], &mut 0).is_err());
    }

    #[test]
    fn compound_detection_uses_file_name() {
        assert!(is_compound_shard(Path::new("/idx/compound-abc_v16.00000.zoekt")));
        assert!(!is_compound_shard(Path::new("/compound-dir/repo_v16.00000.zoekt")));
    }
}
