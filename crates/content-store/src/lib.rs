//! # Forge Content Store
//!
//! Fingerprints and keyed content references for ContextForge.
//!
//! Two concerns live here:
//! - [`FingerprintStore`]: a `(sha256, mtime, size, line_count)` summary per
//!   tracked file, used to detect drift without retaining file contents.
//! - [`ContentStore`]: short-lived references to truncated output, retrievable
//!   by line range or searched with context until they expire.

mod error;
mod fingerprint;
mod store;

pub use error::{ContentStoreError, Result};
pub use fingerprint::{capture, DriftStatus, Fingerprint, FingerprintStore};
pub use store::{
    ContentReference, ContentStore, ContentStoreConfig, RangeView, SearchMatch, SearchReport,
    SearchRequest,
};
