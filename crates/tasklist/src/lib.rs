//! # Forge Tasklist
//!
//! Hierarchical task management with dependencies, undo/redo, and markdown
//! round-tripping.
//!
//! Tasks form a forest constrained to depth 10; dependencies form a DAG
//! validated by DFS on every edge insert. Every mutating operation pushes a
//! deep-cloned snapshot onto a bounded undo stack and clears the redo stack,
//! so `undo` after any mutation restores the exact observable state.
//!
//! The markdown grammar round-trips: [`TaskListManager::to_markdown`] output
//! fed to [`TaskListManager::reorganize`] reproduces the same tree with the
//! same ids and states.

mod error;
mod manager;
mod markdown;
mod templates;
mod types;

pub use error::{Result, TaskListError};
pub use manager::{NewTask, ReorganizeReport, TaskListManager, TaskListManagerConfig, UpdateTask};
pub use templates::template_names;
pub use types::{Task, TaskState};
