//! # Forge Indexer
//!
//! Incremental semantic indexing over the chunker and the vector index.
//!
//! [`IncrementalIndexer`] keeps one [`FileState`] per tracked file and decides
//! between a full index (first sight of a path) and an incremental update
//! (content hash changed). Incremental updates diff the new chunk set against
//! the stored one and touch the vector index only when the chunks actually
//! moved, so the final index state is always identical to a clean re-index.
//!
//! [`LiveIndexer`] binds a file watch to the indexer: created and modified
//! files are re-indexed, deleted files are evicted, and unsupported
//! extensions are skipped silently.

mod error;
mod incremental;
mod live;
mod scanner;

pub use error::{IndexerError, Result};
pub use incremental::{BatchStats, FileState, IncrementalIndexer, IndexKind, IndexReport};
pub use live::{IndexUpdate, LiveIndexer, UpdateCallback};
pub use scanner::FileScanner;
