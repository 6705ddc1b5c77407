//! Semantic analysis of file edits
//!
//! - `language` - extension-based language detection and header patterns
//! - `structure` - top-level unit extraction (imports, constructs, loose code)
//! - `analyzer` - structural diff producing located `SemanticChange`s

mod analyzer;
mod language;
mod structure;

pub use analyzer::{detect_wrap, FileAnalysis, SemanticAnalyzer};
pub use language::Language;
pub use structure::{normalize_whitespace, ConstructKind, FileStructure, Unit, UnitKind};
