use crate::embedder::Embedder;
use crate::error::Result;
use crate::types::{IndexStats, InsertReport, SearchHit};
use async_trait::async_trait;
use forge_code_chunker::CodeChunk;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Minimal KNN contract the indexer depends on
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and upsert chunks under their stable ids
    async fn insert(&self, chunks: Vec<CodeChunk>) -> Result<InsertReport>;

    /// KNN search; scores are monotonically non-increasing
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;

    /// Remove every chunk indexed for a file path; returns the count removed
    async fn delete_by_path(&self, path: &str) -> Result<usize>;

    /// Drop all vectors
    async fn clear(&self) -> Result<()>;

    /// Backend statistics
    async fn stats(&self) -> Result<IndexStats>;
}

/// Stable id for a chunk, derived from its location and content
pub fn chunk_id(chunk: &CodeChunk) -> String {
    let content_hash = format!("{:x}", Sha256::digest(chunk.content.as_bytes()));
    format!(
        "{}:{}-{}:{}",
        chunk.file_path,
        chunk.start_line,
        chunk.end_line,
        &content_hash[..12]
    )
}

struct StoredChunk {
    chunk: CodeChunk,
    vector: Vec<f32>,
}

/// Cosine-similarity KNN over embedded chunks, held in memory
pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<String, StoredChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, chunks: Vec<CodeChunk>) -> Result<InsertReport> {
        let chunks_processed = chunks.len();
        if chunks.is_empty() {
            return Ok(InsertReport {
                chunks_processed: 0,
                chunks_indexed: 0,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.encode(&texts).await?;

        let mut entries = self.entries.write().await;
        let mut chunks_indexed = 0;
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let id = chunk_id(&chunk);
            entries.insert(id, StoredChunk { chunk, vector });
            chunks_indexed += 1;
        }

        log::debug!("Indexed {} of {} chunks", chunks_indexed, chunks_processed);
        Ok(InsertReport {
            chunks_processed,
            chunks_indexed,
        })
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query_vector = self
            .embedder
            .encode(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, String, CodeChunk)> = entries
            .iter()
            .map(|(id, stored)| {
                let score = cosine(&query_vector, &stored.vector);
                (score, id.clone(), stored.chunk.clone())
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(idx, (score, id, chunk))| SearchHit {
                chunk,
                score,
                rank: idx + 1,
                id,
            })
            .collect())
    }

    async fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, stored| stored.chunk.file_path != path);
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            total_vectors: self.entries.read().await.len(),
            dimension: self.embedder.dimension(),
            backend: "in_memory".to_string(),
        })
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    // Embedder output is normalized, so the dot product is the cosine
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
