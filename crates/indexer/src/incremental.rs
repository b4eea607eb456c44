use crate::error::Result;
use crate::scanner::FileScanner;
use chrono::{DateTime, Utc};
use forge_code_chunker::{Chunker, CodeChunk, Language};
use forge_vector_index::VectorIndex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tracked state of a file, replaced atomically on re-index
#[derive(Debug, Clone, Serialize)]
pub struct FileState {
    pub path: PathBuf,
    pub content_hash: String,
    pub chunks: Vec<CodeChunk>,
    pub last_modified: DateTime<Utc>,
}

/// What an index_file call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// First index of the path
    Full,
    /// Content changed; chunk diff applied
    Incremental,
    /// Content hash unchanged; nothing touched
    Unchanged,
}

/// Outcome of indexing one file
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub kind: IndexKind,
    pub chunks: Vec<CodeChunk>,
    /// Chunks new or changed relative to the previous state
    pub chunks_added: usize,
    /// Previous chunks no longer present
    pub chunks_removed: usize,
}

/// Aggregate result of a batch index run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub files: usize,
    pub chunks: usize,
    pub errors: Vec<String>,
}

/// Per-file incremental indexer over the chunker and a vector index
///
/// State machine per path: untracked paths get a full index; tracked paths
/// are no-ops when the content hash matches and incremental updates
/// otherwise. For the same final content, incremental updates and a clean
/// full index leave the vector index in an identical state.
pub struct IncrementalIndexer {
    chunker: Chunker,
    index: Arc<dyn VectorIndex>,
    states: Mutex<HashMap<PathBuf, FileState>>,
}

impl IncrementalIndexer {
    pub fn new(chunker: Chunker, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            chunker,
            index,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Index a file's content, deciding between full and incremental
    pub async fn index_file(
        &self,
        path: impl AsRef<Path>,
        content: &str,
        language: Language,
    ) -> Result<IndexReport> {
        let path = path.as_ref();
        let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));

        // Serializes index operations; per-path ordering follows from it
        let mut states = self.states.lock().await;

        let previous = states.get(path);
        if let Some(state) = previous {
            if state.content_hash == content_hash {
                log::debug!("No changes detected: {:?}", path);
                return Ok(IndexReport {
                    kind: IndexKind::Unchanged,
                    chunks: state.chunks.clone(),
                    chunks_added: 0,
                    chunks_removed: 0,
                });
            }
        }
        let is_incremental = previous.is_some();

        // Always chunk in the live (AST-preferring) mode: the same content
        // must produce the same chunk set whether the path is tracked or
        // not, or incremental updates would diverge from a clean re-index
        let path_str = path.to_string_lossy();
        let chunks = self
            .chunker
            .chunk_with_language(content, &path_str, language, true)?;

        let (chunks_added, chunks_removed) = if let Some(state) = states.get(path) {
            let old_keys: HashSet<String> = state.chunks.iter().map(chunk_key).collect();
            let new_keys: HashSet<String> = chunks.iter().map(chunk_key).collect();
            let added = new_keys.difference(&old_keys).count();
            let removed = old_keys.difference(&new_keys).count();

            if added > 0 || removed > 0 {
                // The index stores content-addressed ids, so a changed chunk
                // set means dropping the path and re-upserting the new set
                self.index.delete_by_path(&path_str).await?;
                self.index.insert(chunks.clone()).await?;
            }
            (added, removed)
        } else {
            self.index.insert(chunks.clone()).await?;
            (chunks.len(), 0)
        };

        let kind = if is_incremental {
            log::info!(
                "Incremental index: {:?} -> {} chunks (+{} -{})",
                path,
                chunks.len(),
                chunks_added,
                chunks_removed
            );
            IndexKind::Incremental
        } else {
            log::info!("Full index: {:?} -> {} chunks", path, chunks.len());
            IndexKind::Full
        };

        states.insert(
            path.to_path_buf(),
            FileState {
                path: path.to_path_buf(),
                content_hash,
                chunks: chunks.clone(),
                last_modified: file_mtime(path),
            },
        );

        Ok(IndexReport {
            kind,
            chunks,
            chunks_added,
            chunks_removed,
        })
    }

    /// Remove a file's chunks from the index and drop its state
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let mut states = self.states.lock().await;

        let removed = self
            .index
            .delete_by_path(&path.to_string_lossy())
            .await?;
        if states.remove(path).is_some() {
            log::info!("Removed file from index: {:?}", path);
        }
        Ok(removed)
    }

    /// Chunks recorded for a tracked file
    pub async fn get_file_chunks(&self, path: impl AsRef<Path>) -> Option<Vec<CodeChunk>> {
        let states = self.states.lock().await;
        states.get(path.as_ref()).map(|s| s.chunks.clone())
    }

    /// Number of tracked files
    pub async fn tracked_files(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Drop all file states (vector index contents are left alone)
    pub async fn clear(&self) {
        self.states.lock().await.clear();
        log::info!("Cleared incremental indexer state");
    }

    /// Batch index every indexable file under a root
    pub async fn index_root(&self, root: impl AsRef<Path>) -> Result<BatchStats> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(crate::error::IndexerError::InvalidPath(format!(
                "Path does not exist: {:?}",
                root
            )));
        }

        let files = FileScanner::new(root).scan()?;
        let mut stats = BatchStats::default();

        for file in files {
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(e) => {
                    stats.errors.push(format!("{:?}: {}", file, e));
                    continue;
                }
            };
            if content.is_empty() {
                continue;
            }

            let language = Language::from_path(&file);
            match self.index_file(&file, &content, language).await {
                Ok(report) => {
                    stats.files += 1;
                    stats.chunks += report.chunks.len();
                }
                Err(e) => stats.errors.push(format!("{:?}: {}", file, e)),
            }
        }

        log::info!(
            "Batch index complete: {} files, {} chunks, {} errors",
            stats.files,
            stats.chunks,
            stats.errors.len()
        );
        Ok(stats)
    }

    /// The vector index this indexer writes to
    pub fn vector_index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }
}

/// Identity of a chunk for diffing: location plus content hash
fn chunk_key(chunk: &CodeChunk) -> String {
    let hash = format!("{:x}", Sha256::digest(chunk.content.as_bytes()));
    format!("{}-{}:{}", chunk.start_line, chunk.end_line, &hash[..12])
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_vector_index::{HashEmbedder, InMemoryVectorIndex};

    fn indexer() -> IncrementalIndexer {
        let index = Arc::new(InMemoryVectorIndex::new(Arc::new(HashEmbedder::default())));
        IncrementalIndexer::new(Chunker::default(), index)
    }

    const ONE_FN: &str = "fn foo() {\n    1;\n}\n";
    const TWO_FN: &str = "fn foo() {\n    1;\n}\n\nfn bar() {\n    2;\n}\n";

    #[tokio::test]
    async fn test_first_index_is_full() {
        let indexer = indexer();
        let report = indexer
            .index_file("src/a.rs", ONE_FN, Language::Rust)
            .await
            .unwrap();

        assert_eq!(report.kind, IndexKind::Full);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(indexer.tracked_files().await, 1);
    }

    #[tokio::test]
    async fn test_same_content_is_noop() {
        let indexer = indexer();
        indexer.index_file("src/a.rs", ONE_FN, Language::Rust).await.unwrap();
        let report = indexer
            .index_file("src/a.rs", ONE_FN, Language::Rust)
            .await
            .unwrap();

        assert_eq!(report.kind, IndexKind::Unchanged);
        assert_eq!(report.chunks_added, 0);
        assert_eq!(report.chunks_removed, 0);
    }

    #[tokio::test]
    async fn test_appended_function_is_incremental() {
        let indexer = indexer();
        indexer.index_file("src/a.rs", ONE_FN, Language::Rust).await.unwrap();

        let report = indexer
            .index_file("src/a.rs", TWO_FN, Language::Rust)
            .await
            .unwrap();
        assert_eq!(report.kind, IndexKind::Incremental);
        assert_eq!(report.chunks.len(), 2);
        assert!(report.chunks_added >= 1);
    }

    #[tokio::test]
    async fn test_incremental_parity_with_full_reindex() {
        // Edit sequence through the incremental path
        let incremental = indexer();
        incremental.index_file("src/a.rs", ONE_FN, Language::Rust).await.unwrap();
        incremental.index_file("src/a.rs", TWO_FN, Language::Rust).await.unwrap();

        // Single clean index of the final content
        let full = indexer();
        full.index_file("src/a.rs", TWO_FN, Language::Rust).await.unwrap();

        let incremental_hits = incremental.vector_index().search("fn", 100).await.unwrap();
        let full_hits = full.vector_index().search("fn", 100).await.unwrap();

        let ids = |hits: &[forge_vector_index::SearchHit]| {
            let mut ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&incremental_hits), ids(&full_hits));
    }

    #[tokio::test]
    async fn test_remove_file() {
        let indexer = indexer();
        indexer.index_file("src/a.rs", ONE_FN, Language::Rust).await.unwrap();

        let removed = indexer.remove_file("src/a.rs").await.unwrap();
        assert!(removed >= 1);
        assert_eq!(indexer.tracked_files().await, 0);
        assert_eq!(
            indexer.vector_index().stats().await.unwrap().total_vectors,
            0
        );
    }

    #[tokio::test]
    async fn test_get_file_chunks() {
        let indexer = indexer();
        indexer.index_file("src/a.rs", ONE_FN, Language::Rust).await.unwrap();

        let chunks = indexer.get_file_chunks("src/a.rs").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(indexer.get_file_chunks("src/other.rs").await.is_none());
    }

    #[tokio::test]
    async fn test_index_root_batch() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.rs"), ONE_FN).unwrap();
        std::fs::write(dir.path().join("two.py"), "def two():\n    return 2\n").unwrap();

        let indexer = indexer();
        let stats = indexer.index_root(dir.path()).await.unwrap();

        assert_eq!(stats.files, 2);
        assert!(stats.chunks >= 2);
        assert!(stats.errors.is_empty());
    }

    #[tokio::test]
    async fn test_index_root_missing_path() {
        let indexer = indexer();
        assert!(indexer.index_root("/definitely/missing/path").await.is_err());
    }
}
