//! # Forge Diagnostics
//!
//! Periodic and on-demand health checks over an operation in progress:
//! file drift against registered fingerprints, caller-supplied confidence
//! scores, and resource-limit consumption. Results are plain values with a
//! severity band; nothing here raises.

mod agent;

pub use agent::{
    DiagnosticAgent, DiagnosticConfig, DiagnosticResult, OperationLimits, OperationMetrics,
    Severity,
};
