use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A semantic code chunk with metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    /// Source file path
    pub file_path: String,

    /// Start line (1-indexed)
    pub start_line: usize,

    /// End line (1-indexed, inclusive)
    pub end_line: usize,

    /// Exact source slice covered by [start_line, end_line]
    pub content: String,

    /// Metadata about this chunk
    pub metadata: ChunkMetadata,
}

impl CodeChunk {
    pub fn new(
        file_path: String,
        start_line: usize,
        end_line: usize,
        content: String,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            file_path,
            start_line,
            end_line,
            content,
            metadata,
        }
    }

    /// Number of lines in this chunk
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Check if chunk contains a specific line
    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// Metadata about a code chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Programming language
    pub language: Option<String>,

    /// Chunk type (function, class, method, ...)
    pub chunk_type: Option<ChunkType>,

    /// Symbol name (function name, class name, heading text)
    pub name: Option<String>,

    /// Parent scope (class name for methods)
    pub parent_scope: Option<String>,

    /// Strategy-specific extras (markdown heading level, code languages, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    /// Create metadata with language only
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Default::default()
        }
    }

    /// Builder: set chunk type
    pub fn chunk_type(mut self, chunk_type: ChunkType) -> Self {
        self.chunk_type = Some(chunk_type);
        self
    }

    /// Builder: set symbol name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set parent scope
    pub fn parent_scope(mut self, scope: impl Into<String>) -> Self {
        self.parent_scope = Some(scope.into());
        self
    }
}

/// Type of code chunk based on semantic meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Standalone function
    Function,
    /// Class, struct, or equivalent type definition
    Class,
    /// Function inside a class or impl block
    Method,
    /// Import/use statement
    Import,
    /// Module docstring
    Docstring,
    /// Unstructured block of lines
    TextBlock,
}

impl ChunkType {
    /// Get human-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Import => "import",
            ChunkType::Docstring => "docstring",
            ChunkType::TextBlock => "text_block",
        }
    }
}
