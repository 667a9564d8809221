//! Error types for the simulator's external boundaries.

use thiserror::Error;

/// Errors reported by topology providers and security backends.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Security backend call failed (tool missing, bad response, store down)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Topology provider cannot report state for the requested step
    #[error("Topology unavailable at step {step}: {reason}")]
    TopologyUnavailable { step: u64, reason: String },

    /// Backend call exceeded its time budget
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Persistent record store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Request/response serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Node name could not be parsed
    #[error("Invalid node id: {0}")]
    InvalidNode(String),
}

impl EnvError {
    /// Creates a backend-unavailable error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Creates a topology-unavailable error for a step.
    pub fn topology(step: u64, reason: impl Into<String>) -> Self {
        Self::TopologyUnavailable {
            step,
            reason: reason.into(),
        }
    }
}
