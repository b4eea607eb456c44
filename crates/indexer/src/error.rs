use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] forge_code_chunker::ChunkerError),

    #[error("Vector index error: {0}")]
    VectorIndexError(#[from] forge_vector_index::VectorIndexError),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] forge_watcher::WatcherError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}
