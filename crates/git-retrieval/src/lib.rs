//! # Forge Git Retrieval
//!
//! Relevance-ranked search over git history, plus structured blame and diff.
//!
//! Every operation shells out to `git` in the repository root with a 30 s
//! timeout and returns structured data; a missing binary, a timeout, or a
//! non-repository path becomes an error value, never a panic.

mod error;
mod git;
mod retrieval;
mod types;

pub use error::{GitError, Result};
pub use retrieval::GitRetrieval;
pub use types::{BlameLine, BlameResult, CommitInfo, DiffResult, RetrievalResult, SearchRequest};
