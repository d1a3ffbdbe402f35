//! # Engine Error Types
//!
//! All errors that can occur in the contention engine.
//!
//! Nothing in this taxonomy is fatal to the process: configuration errors
//! are recovered by falling back to defaults, and deadlock-control errors
//! are reported to the caller as no-ops.

use thiserror::Error;

/// Errors that can occur in the contention engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A configuration value was rejected and replaced with its default.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Forcing a deadlock needs at least two workers that are still live.
    #[error("need at least two active workers to force a deadlock, have {active}")]
    InsufficientWorkers {
        /// How many active workers were found.
        active: usize,
    },

    /// Resolve was requested while no forced deadlock is installed.
    #[error("no forced deadlock is currently active")]
    NoActiveDeadlock,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
