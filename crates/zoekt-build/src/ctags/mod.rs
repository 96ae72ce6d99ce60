//! Symbol extraction: which parser handles which language, running the
//! parsers, and turning their tags into document sections.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::index::BuildError;
use crate::options::Options;
use crate::types::Document;

mod command;
mod language;
mod sections;

pub use command::CtagsCommand;
pub use language::detect_language;
pub use sections::tags_to_sections;

/// Parser backend for a language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ParserType {
    /// Not configured; falls back to universal-ctags.
    #[default]
    Unknown,
    /// Do not extract symbols.
    None,
    Universal,
    Scip,
}

impl ParserType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "unknown" => Some(ParserType::Unknown),
            "none" | "no_ctags" | "noctags" => Some(ParserType::None),
            "universal" | "universal-ctags" => Some(ParserType::Universal),
            "scip" | "scip-ctags" => Some(ParserType::Scip),
            _ => None,
        }
    }
}

/// Normalized language name => parser backend.
pub type LanguageMap = HashMap<String, ParserType>;

pub fn normalize_language(lang: &str) -> String {
    lang.to_lowercase()
}

/// A tag reported by a parser. `line` is 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub line: i64,
    pub kind: String,
    pub parent: String,
    pub parent_kind: String,
}

pub trait SymbolParser: Send + Sync {
    fn parse(&self, name: &str, content: &[u8]) -> anyhow::Result<Vec<Entry>>;
}

/// Parsers available to a build, keyed by backend.
#[derive(Clone, Default)]
pub struct ParserMap {
    parsers: HashMap<ParserType, Arc<dyn SymbolParser>>,
}

impl std::fmt::Debug for ParserMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.parsers.keys()).finish()
    }
}

impl ParserMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, typ: ParserType, parser: Arc<dyn SymbolParser>) {
        self.parsers.insert(typ, parser);
    }

    pub fn get(&self, typ: ParserType) -> Option<&Arc<dyn SymbolParser>> {
        self.parsers.get(&typ)
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Parsers for the binaries configured in `opts`. universal-ctags is
    /// always wanted; scip-ctags only when the language map routes a language
    /// to it. A wanted but missing binary is an error only when ctags must
    /// succeed.
    pub fn from_options(opts: &Options) -> Result<Self, BuildError> {
        let mut m = ParserMap::new();
        if opts.disable_ctags {
            return Ok(m);
        }

        let wants_scip = opts.language_map.values().any(|t| *t == ParserType::Scip);
        let wanted: [(ParserType, bool, &Option<PathBuf>); 2] = [
            (ParserType::Universal, true, &opts.ctags_path),
            (ParserType::Scip, wants_scip, &opts.scip_ctags_path),
        ];
        for (typ, wanted, bin) in wanted {
            if !wanted {
                continue;
            }
            match bin {
                Some(path) => m.insert(typ, Arc::new(CtagsCommand::new(path.clone()))),
                None if opts.ctags_must_succeed => {
                    return Err(BuildError::Ctags(format!(
                        "ctags binary for {:?} not found, but ctags is required",
                        typ
                    )))
                }
                None => {}
            }
        }
        Ok(m)
    }
}

/// Fill in symbols for every document that has content but no symbols yet.
/// A failing document keeps no symbols; its error is returned only when
/// `must_succeed`.
pub fn parse_symbols(
    todo: &mut [Document],
    language_map: &LanguageMap,
    parsers: &ParserMap,
    must_succeed: bool,
) -> Result<(), BuildError> {
    for doc in todo.iter_mut() {
        if doc.content.is_empty() || doc.is_skipped() || !doc.symbols.is_empty() {
            continue;
        }
        if doc.language.is_empty() {
            if let Some(lang) = detect_language(&doc.name) {
                doc.language = lang.to_string();
            }
        }

        let typ = match language_map
            .get(&normalize_language(&doc.language))
            .copied()
            .unwrap_or_default()
        {
            ParserType::None => continue,
            ParserType::Unknown => ParserType::Universal,
            t => t,
        };
        let Some(parser) = parsers.get(typ) else {
            continue;
        };

        match parser.parse(&doc.name, &doc.content) {
            Ok(entries) => {
                let (symbols, meta) = tags_to_sections(&doc.content, &entries);
                doc.symbols = symbols;
                doc.symbols_meta = meta;
            }
            Err(e) if must_succeed => {
                return Err(BuildError::Ctags(format!("{}: {:#}", doc.name, e)));
            }
            Err(e) => {
                tracing::warn!(file = %doc.name, parser = ?typ, error = %format!("{:#}", e), "ignoring symbol parse error");
            }
        }
    }
    Ok(())
}
