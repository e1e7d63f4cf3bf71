//! Error types for the simulation core.
//!
//! Mirrors the five error kinds of the design: configuration errors and
//! checkpoint-restore failures are fatal at setup; runtime invariant
//! violations and communication failures are fatal during the loop;
//! checkpoint-dump failures are logged and retried on the next schedule.

use thiserror::Error;

/// Errors surfaced by the simulation core.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// A configuration error detected before the time loop starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A runtime invariant was violated (e.g. a particle jumped to a
    /// non-adjacent patch, a negative weight, or a NaN field value).
    #[error("runtime invariant violation: {0}")]
    RuntimeInvariant(String),

    /// The transport layer reported an unrecoverable communication failure.
    #[error("communication failure: {0}")]
    Communication(String),

    /// A checkpoint dump failed. Non-fatal: the caller should log and retry
    /// on the next scheduled dump.
    #[error("checkpoint dump failed: {0}")]
    CheckpointDump(std::io::Error),

    /// A checkpoint restore failed. Fatal.
    #[error("checkpoint restore failed: {0}")]
    CheckpointRestore(std::io::Error),

    /// Passthrough for filesystem errors outside the checkpoint path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Passthrough for (de)serialization errors in the parameter record or
    /// checkpoint headers.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
