//! Task arrival process.

use crate::error::SimError;
use isltask_env::NodeId;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Poisson;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest accepted Poisson mean, in tasks per step.
pub const MAX_POISSON_MEAN: f64 = 1_000.0;

/// How many tasks arrive at each step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArrivalProcess {
    /// `batch` tasks every `interval` steps, starting at step 0
    Fixed { interval: u64, batch: u32 },

    /// Poisson-distributed count per step
    Poisson { mean_per_step: f64 },
}

impl Default for ArrivalProcess {
    fn default() -> Self {
        ArrivalProcess::Fixed {
            interval: 1,
            batch: 1,
        }
    }
}

impl ArrivalProcess {
    pub fn validate(&self) -> Result<(), SimError> {
        match *self {
            ArrivalProcess::Fixed { interval, batch } => {
                if interval == 0 {
                    return Err(SimError::config("arrival.interval", "must be positive"));
                }
                if batch == 0 {
                    return Err(SimError::config("arrival.batch", "must be positive"));
                }
            }
            ArrivalProcess::Poisson { mean_per_step } => {
                if !(mean_per_step.is_finite() && mean_per_step > 0.0) {
                    return Err(SimError::config(
                        "arrival.mean_per_step",
                        format!("must be positive, got {}", mean_per_step),
                    ));
                }
                if mean_per_step > MAX_POISSON_MEAN {
                    return Err(SimError::config(
                        "arrival.mean_per_step",
                        format!("must be at most {}, got {}", MAX_POISSON_MEAN, mean_per_step),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One arriving task, before the engine assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub origin: NodeId,
    pub payload_ref: Uuid,
}

/// Seeded source of arrivals.
///
/// Owns its own ChaCha8 stream, so the sequence of origins and payload
/// references depends only on the seed and the step count, never on how
/// earlier tasks fared.
pub struct ArrivalStream {
    process: ArrivalProcess,
    rng: ChaCha8Rng,
    poisson: Option<Poisson<f64>>,
}

impl ArrivalStream {
    pub fn new(process: ArrivalProcess, seed: u64) -> Result<Self, SimError> {
        process.validate()?;
        let poisson = match process {
            ArrivalProcess::Poisson { mean_per_step } => Some(
                Poisson::new(mean_per_step)
                    .map_err(|e| SimError::config("arrival.mean_per_step", e.to_string()))?,
            ),
            ArrivalProcess::Fixed { .. } => None,
        };

        Ok(Self {
            process,
            rng: ChaCha8Rng::seed_from_u64(seed),
            poisson,
        })
    }

    /// Draws the arrivals for `step`. Origins are picked uniformly from
    /// `satellites`; an empty slice yields no arrivals.
    pub fn arrivals(&mut self, step: u64, satellites: &[NodeId]) -> Vec<Arrival> {
        let count = match (&self.process, &self.poisson) {
            (ArrivalProcess::Fixed { interval, batch }, _) => {
                if step % interval == 0 {
                    *batch as usize
                } else {
                    0
                }
            }
            (ArrivalProcess::Poisson { .. }, Some(dist)) => self.rng.sample(dist) as usize,
            (ArrivalProcess::Poisson { .. }, None) => 0,
        };

        if satellites.is_empty() {
            return Vec::new();
        }

        (0..count)
            .map(|_| {
                let origin = satellites[self.rng.gen_range(0..satellites.len())];
                let mut bytes = [0u8; 16];
                self.rng.fill_bytes(&mut bytes);
                Arrival {
                    origin,
                    payload_ref: uuid::Builder::from_random_bytes(bytes).into_uuid(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sats(n: u32) -> Vec<NodeId> {
        (0..n).map(NodeId::satellite).collect()
    }

    #[test]
    fn test_fixed_interval_batches() {
        let process = ArrivalProcess::Fixed {
            interval: 3,
            batch: 2,
        };
        let mut stream = ArrivalStream::new(process, 1).unwrap();
        let sats = sats(4);

        let counts: Vec<usize> = (0..7).map(|s| stream.arrivals(s, &sats).len()).collect();
        assert_eq!(counts, vec![2, 0, 0, 2, 0, 0, 2]);
    }

    #[test]
    fn test_same_seed_same_arrivals() {
        let sats = sats(18);
        let mut a = ArrivalStream::new(ArrivalProcess::default(), 42).unwrap();
        let mut b = ArrivalStream::new(ArrivalProcess::default(), 42).unwrap();

        for step in 0..20 {
            assert_eq!(a.arrivals(step, &sats), b.arrivals(step, &sats));
        }
    }

    #[test]
    fn test_origins_are_satellites() {
        let sats = sats(5);
        let mut stream = ArrivalStream::new(ArrivalProcess::default(), 9).unwrap();

        for step in 0..50 {
            for arrival in stream.arrivals(step, &sats) {
                assert!(sats.contains(&arrival.origin));
            }
        }
    }

    #[test]
    fn test_payload_refs_unique() {
        let sats = sats(3);
        let mut stream = ArrivalStream::new(ArrivalProcess::default(), 5).unwrap();
        let refs: std::collections::HashSet<Uuid> = (0..100)
            .flat_map(|s| stream.arrivals(s, &sats))
            .map(|a| a.payload_ref)
            .collect();
        assert_eq!(refs.len(), 100);
    }

    #[test]
    fn test_poisson_mean_roughly_respected() {
        let sats = sats(3);
        let process = ArrivalProcess::Poisson { mean_per_step: 2.0 };
        let mut stream = ArrivalStream::new(process, 3).unwrap();

        let total: usize = (0..2000).map(|s| stream.arrivals(s, &sats).len()).sum();
        let mean = total as f64 / 2000.0;
        assert!((mean - 2.0).abs() < 0.2, "mean was {}", mean);
    }

    #[test]
    fn test_invalid_processes_rejected() {
        assert!(ArrivalProcess::Fixed {
            interval: 0,
            batch: 1
        }
        .validate()
        .is_err());
        assert!(ArrivalProcess::Poisson { mean_per_step: 0.0 }
            .validate()
            .is_err());
    }

    #[test]
    fn test_poisson_mean_capped() {
        assert!(ArrivalProcess::Poisson {
            mean_per_step: MAX_POISSON_MEAN
        }
        .validate()
        .is_ok());
        assert!(ArrivalProcess::Poisson { mean_per_step: 1e12 }
            .validate()
            .is_err());
        assert!(ArrivalStream::new(ArrivalProcess::Poisson { mean_per_step: 1e12 }, 1).is_err());
    }
}
