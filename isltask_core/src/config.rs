//! Run configuration.

use crate::arrival::ArrivalProcess;
use crate::delivery::LossProfile;
use crate::error::SimError;
use crate::protocol::TaskingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Multiplier for the delivery-trial seed (separate from arrivals so that
/// changing the loss profile never changes which tasks arrive where).
const TRIAL_SEED_MUL: u64 = 0x9e3779b97f4a7c15;

/// Multiplier for key material handed to backends.
const KEY_SEED_MUL: u64 = 0x517cc1b727220a95;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of satellites (passed to the topology provider)
    pub n_satellites: u32,

    /// Number of ground stations (passed to the topology provider)
    pub n_ground: u32,

    /// Steps to simulate
    pub steps: u64,

    /// Wall-clock length of one step, for reporting only
    pub step_duration_secs: f64,

    /// Admission policy
    pub mode: TaskingMode,

    /// How tasks arrive
    pub arrival: ArrivalProcess,

    /// Steps between task creation and its deadline
    pub task_ttl_steps: u64,

    /// Ground-gated admission happens when `step % interval == 0`
    pub ground_contact_interval: u64,

    /// Geometric admission threshold for the topology provider
    pub acceptance_radius: f64,

    /// Hop budget carried by each task's token
    pub max_hops: u32,

    /// Steps a hop takes from injection to arrival
    pub hop_latency_steps: u64,

    /// Synthetic outage / congestion / attack probabilities
    pub loss: LossProfile,

    /// Time budget for one backend call
    pub backend_timeout_ms: u64,

    /// Extra attempts after a failed backend call
    pub backend_retries: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            n_satellites: 20,
            n_ground: 2,
            steps: 144,
            step_duration_secs: 600.0,
            mode: TaskingMode::IslForwarded,
            arrival: ArrivalProcess::default(),
            task_ttl_steps: 9,
            ground_contact_interval: 6,
            acceptance_radius: 2.0,
            max_hops: 4,
            hop_latency_steps: 1,
            loss: LossProfile::default(),
            backend_timeout_ms: 2000,
            backend_retries: 0,
        }
    }
}

impl SimConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SimError::config("config", format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, SimError> {
        let config: SimConfig =
            serde_json::from_str(raw).map_err(|e| SimError::config("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field; the first violation wins.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.n_satellites == 0 {
            return Err(SimError::config("n_satellites", "must be positive"));
        }
        if self.n_ground == 0 {
            return Err(SimError::config("n_ground", "must be positive"));
        }
        if self.steps == 0 {
            return Err(SimError::config("steps", "must be positive"));
        }
        if !(self.step_duration_secs.is_finite() && self.step_duration_secs > 0.0) {
            return Err(SimError::config(
                "step_duration_secs",
                format!("must be positive, got {}", self.step_duration_secs),
            ));
        }
        if self.task_ttl_steps == 0 {
            return Err(SimError::config("task_ttl_steps", "must be positive"));
        }
        if self.ground_contact_interval == 0 {
            return Err(SimError::config("ground_contact_interval", "must be positive"));
        }
        if !(self.acceptance_radius.is_finite() && self.acceptance_radius > 0.0) {
            return Err(SimError::config(
                "acceptance_radius",
                format!("must be positive, got {}", self.acceptance_radius),
            ));
        }
        if self.max_hops == 0 {
            return Err(SimError::config("max_hops", "must be positive"));
        }
        if self.hop_latency_steps == 0 {
            return Err(SimError::config("hop_latency_steps", "must be positive"));
        }
        let horizon = self
            .steps
            .checked_add(self.task_ttl_steps)
            .and_then(|v| v.checked_add(self.hop_latency_steps));
        if horizon.is_none() {
            return Err(SimError::config(
                "task_ttl_steps",
                "steps + task_ttl_steps + hop_latency_steps overflows",
            ));
        }
        if self.backend_timeout_ms == 0 {
            return Err(SimError::config("backend_timeout_ms", "must be positive"));
        }
        self.arrival.validate()?;
        self.loss.validate()?;
        Ok(())
    }

    /// Seed for the arrival stream.
    pub fn arrival_seed(&self) -> u64 {
        self.seed
    }

    /// Seed for per-packet delivery trials.
    pub fn trial_seed(&self) -> u64 {
        self.seed.wrapping_mul(TRIAL_SEED_MUL)
    }

    /// Seed for backend key material.
    pub fn key_seed(&self) -> u64 {
        self.seed.wrapping_mul(KEY_SEED_MUL)
    }

    /// Converts a step count to simulated seconds.
    pub fn steps_to_secs(&self, steps: f64) -> f64 {
        steps * self.step_duration_secs
    }
}
