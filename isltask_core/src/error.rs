//! Error taxonomy for the tasking engine.

use isltask_env::EnvError;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Only `Configuration` is fatal before a run starts. `BackendUnavailable`
/// and `TopologyUnavailable` are recovered inside the step loop and appear
/// here so they can be logged and traced uniformly.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid configuration (probability out of range, zero interval, ...)
    #[error("Configuration error: {field}: {reason}")]
    Configuration { field: &'static str, reason: String },

    /// Security backend call failed or timed out
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Topology provider could not report a step
    #[error("Topology unavailable at step {step}: {reason}")]
    TopologyUnavailable { step: u64, reason: String },

    /// Entity lifecycle rule was violated
    #[error("Entity error: {0}")]
    Entity(String),

    /// Trace sink failed to accept a record
    #[error("Trace error: {0}")]
    Trace(String),
}

impl SimError {
    /// Creates a configuration error.
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }

    /// Creates an entity lifecycle error.
    pub fn entity(msg: impl Into<String>) -> Self {
        Self::Entity(msg.into())
    }
}

impl From<EnvError> for SimError {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::TopologyUnavailable { step, reason } => {
                SimError::TopologyUnavailable { step, reason }
            }
            other => SimError::BackendUnavailable(other.to_string()),
        }
    }
}
