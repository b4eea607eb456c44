use forge_code_chunker::CodeChunk;
use serde::{Deserialize, Serialize};

/// Outcome of an insert call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    /// Chunks received
    pub chunks_processed: usize,
    /// Chunks actually upserted
    pub chunks_indexed: usize,
}

/// A ranked search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: CodeChunk,
    /// Similarity score; non-increasing across a result list
    pub score: f32,
    /// 1-based rank
    pub rank: usize,
    /// Stable chunk id
    pub id: String,
}

/// Backend statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub backend: String,
}
