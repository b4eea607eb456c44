use crate::error::Result;
use async_trait::async_trait;

/// Embedding port: text in, fixed-dimension float vectors out
///
/// Implementations must be deterministic: the same input always produces the
/// same output within floating-point tolerance.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector dimension
    fn dimension(&self) -> usize;

    /// Encode a batch of texts into vectors of shape `(n, dimension)`
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic token-hash embedder
///
/// Tokenizes on non-alphanumeric boundaries, hashes each lowercased token
/// with FNV-1a into a bucket, and L2-normalizes the bucket counts. Not a
/// semantic model; it exists so the in-memory index and the test suite have
/// a reproducible backend with real KNN behavior.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.to_lowercase().as_bytes()) as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
