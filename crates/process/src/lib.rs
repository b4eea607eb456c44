//! # Forge Process
//!
//! Subprocess lifecycle management for ContextForge.
//!
//! [`ProcessSupervisor`] launches shell subprocesses in foreground or
//! background mode, drains their merged stdout/stderr line by line into an
//! unbounded queue, accepts stdin writes while the process runs, and
//! escalates kills from a graceful terminate to a force-kill after a grace
//! period. Terminal ids are monotonic and never reused; handles persist for
//! the supervisor's lifetime.
//!
//! [`StreamSupervisor`] is the streaming sibling: the same spawn-and-drain
//! machinery feeding a bounded ring buffer, with an optional per-line
//! callback invoked on the reader task.

mod error;
mod shell;
mod stream;
mod supervisor;

pub use error::{ProcessError, Result};
pub use stream::{LineCallback, StreamConfig, StreamInfo, StreamLine, StreamSupervisor};
pub use supervisor::{
    LaunchRequest, ProcessInfo, ProcessResult, ProcessState, ProcessSupervisor,
};
