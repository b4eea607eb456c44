//! # Forge File Tools
//!
//! Workspace-scoped file editing and viewing.
//!
//! [`FileEditor`] performs exact-match string replacement with line-range
//! disambiguation, creates content-hashed backups before destructive
//! operations, and refuses to delete protected paths unless forced.
//! [`CodeViewer`] renders files with line numbers, runs regex searches with
//! context windows, and lists directories two levels deep.
//!
//! Every path is resolved against the workspace root; paths escaping it are
//! rejected before any filesystem access.

mod editor;
mod error;
mod paths;
mod viewer;

pub use editor::{
    EditOutcome, EditorConfig, FileEditor, RemoveAction, RemoveReport, RemoveRequest,
    ReplaceEntry, ReplaceRequest, SaveRequest,
};
pub use error::{FileToolsError, Result};
pub use viewer::{CodeViewer, ViewRequest, ViewResult, ViewerConfig};
