//! # Forge Code Chunker
//!
//! Language-detected AST/regex hybrid chunking for the semantic index.
//!
//! Two strategies share one output contract:
//! - **AST**: tree-sitter parse and walk, emitting function/class/method
//!   nodes with their identifier names. Preferred for incremental updates.
//! - **Regex**: per-language patterns for functions, arrow functions,
//!   classes, and imports with brace or indentation block extraction.
//!   Used for batch indexing and as the fallback when parsing fails.
//!
//! Every emitted [`CodeChunk`] covers whole source lines: `content` is
//! exactly the slice of the input implied by `start_line..=end_line`, so a
//! chunk can be re-read from the original file byte for byte.

mod ast;
mod chunker;
mod config;
mod error;
mod language;
mod regex_strategy;
mod split;
mod types;

pub use chunker::Chunker;
pub use config::{ChunkMode, ChunkerConfig};
pub use error::{ChunkerError, Result};
pub use language::Language;
pub use types::{ChunkMetadata, ChunkType, CodeChunk};
