use serde::{Deserialize, Serialize};

/// Strategy selection for a chunking run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    /// AST on incremental updates, regex on batch indexing
    #[default]
    Auto,
    /// Force AST; fall back to regex when parsing fails
    TreeSitter,
    /// Force regex
    Regex,
}

/// Configuration for the chunker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Strategy selection
    pub mode: ChunkMode,

    /// Chunks larger than this many characters are split on line boundaries
    pub max_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Auto,
            max_chunk_size: 2000,
        }
    }
}

impl ChunkerConfig {
    pub fn with_mode(mode: ChunkMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}
