//! Incremental builder for zoekt style index shards.
//!
//! Documents go into a [`Builder`], which batches them into shards of
//! bounded size, ranks and symbol-annotates each batch, and writes the
//! shards in parallel. [`Options::index_state`] tells callers whether the
//! shards on disk are still current so unchanged repositories can be skipped.

pub mod config;
pub mod ctags;
pub mod doc_checker;
pub mod flags;
pub mod index;
pub mod index_state;
pub mod options;
pub mod rank;
pub mod shard;
pub mod types;

pub use crate::ctags::{Entry, LanguageMap, ParserMap, ParserType, SymbolParser};
pub use crate::doc_checker::{CheckError, DocChecker};
pub use crate::flags::BuildFlags;
pub use crate::index::{BuildError, Builder, FinishedShard};
pub use crate::index_state::IndexState;
pub use crate::options::{FileSizeOverride, HashOptions, LargeFileMatcher, Options};
pub use crate::rank::{is_low_priority, rank, sort_documents};
pub use crate::shard::{ShardReader, ShardWriter};
pub use crate::types::{
    Document, DocumentSection, IndexMetadata, Repository, RepositoryBranch, Symbol,
};
