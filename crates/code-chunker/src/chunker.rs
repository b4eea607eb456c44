use crate::ast::AstStrategy;
use crate::config::{ChunkMode, ChunkerConfig};
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::regex_strategy::RegexStrategy;
use crate::split::split_oversize;
use crate::types::CodeChunk;
use std::path::Path;

/// Main chunker interface
///
/// Selects between the AST and regex strategies per [`ChunkMode`]: `Auto`
/// uses the AST for incremental updates and regex for batch runs,
/// `TreeSitter` forces the AST with a regex fallback on parse failure, and
/// `Regex` always uses patterns.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker with configuration
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk code from a string, detecting the language from the path
    pub fn chunk_str(
        &self,
        content: &str,
        file_path: &str,
        incremental: bool,
    ) -> Result<Vec<CodeChunk>> {
        let language = Language::from_path(file_path);
        self.chunk_with_language(content, file_path, language, incremental)
    }

    /// Chunk code from a file on disk
    pub fn chunk_file(&self, path: impl AsRef<Path>, incremental: bool) -> Result<Vec<CodeChunk>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let file_path = path.to_str().unwrap_or("unknown");
        let language = Language::from_path(path);
        self.chunk_with_language(&content, file_path, language, incremental)
    }

    /// Chunk code with an explicit language
    pub fn chunk_with_language(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
        incremental: bool,
    ) -> Result<Vec<CodeChunk>> {
        if content.is_empty() {
            return Err(ChunkerError::EmptyContent);
        }

        let use_ast = language.supports_ast()
            && match self.config.mode {
                ChunkMode::TreeSitter => true,
                ChunkMode::Regex => false,
                ChunkMode::Auto => incremental,
            };

        let mut chunks = Vec::new();
        if use_ast {
            match AstStrategy::new(language).and_then(|mut s| s.chunk(content, file_path)) {
                Ok(ast_chunks) => chunks = ast_chunks,
                Err(e) => {
                    log::warn!("AST chunking failed for {}, falling back to regex: {}", file_path, e);
                }
            }
        }

        if chunks.is_empty() {
            let strategy = RegexStrategy::new(self.config.max_chunk_size);
            chunks = strategy.chunk(content, file_path, language);
        }

        Ok(split_oversize(chunks, self.config.max_chunk_size))
    }

    /// Get configuration
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;

    const RUST_CODE: &str = r#"use std::collections::HashMap;

fn main() {
    println!("Hello, world!");
}

struct Point {
    x: i32,
    y: i32,
}

impl Point {
    fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}
"#;

    #[test]
    fn test_chunk_str_batch() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_str(RUST_CODE, "test.rs", false).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_chunk_empty_content() {
        let chunker = Chunker::default();
        assert!(matches!(
            chunker.chunk_str("", "test.rs", false),
            Err(ChunkerError::EmptyContent)
        ));
    }

    #[test]
    fn test_incremental_and_batch_find_same_symbols() {
        let chunker = Chunker::default();

        let batch = chunker.chunk_str(RUST_CODE, "test.rs", false).unwrap();
        let incremental = chunker.chunk_str(RUST_CODE, "test.rs", true).unwrap();

        let names = |chunks: &[CodeChunk]| {
            let mut names: Vec<String> = chunks
                .iter()
                .filter_map(|c| c.metadata.name.clone())
                .collect();
            names.sort();
            names
        };

        // Both strategies must see the top-level symbols
        for expected in ["main", "Point"] {
            assert!(names(&batch).iter().any(|n| n == expected), "batch missing {expected}");
            assert!(
                names(&incremental).iter().any(|n| n == expected),
                "incremental missing {expected}"
            );
        }
        // The AST path additionally resolves impl methods
        assert!(names(&incremental).iter().any(|n| n == "new"));
    }

    #[test]
    fn test_forced_regex_mode_skips_ast() {
        let chunker = Chunker::new(ChunkerConfig::with_mode(ChunkMode::Regex));
        let chunks = chunker.chunk_str(RUST_CODE, "test.rs", true).unwrap();
        // Regex strategy emits the import chunk the AST strategy does not
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Import)));
    }

    #[test]
    fn test_unknown_language_text_blocks() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk_str("plain text\nmore text", "notes.txt", false).unwrap();
        assert!(chunks
            .iter()
            .all(|c| c.metadata.chunk_type == Some(ChunkType::TextBlock)));
    }

    #[test]
    fn test_oversize_chunks_are_split() {
        let body: String = (0..200).map(|i| format!("    let x{} = {};\n", i, i)).collect();
        let code = format!("fn big() {{\n{}}}\n", body);

        let chunker = Chunker::new(ChunkerConfig {
            max_chunk_size: 500,
            ..Default::default()
        });
        let chunks = chunker.chunk_str(&code, "big.rs", false).unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.content.len() <= 500 || c.line_count() == 1));
        assert!(chunks[0]
            .metadata
            .name
            .as_deref()
            .unwrap_or_default()
            .starts_with("big_part"));
    }
}
