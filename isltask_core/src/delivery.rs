//! Synthetic outage, congestion and tamper model.
//!
//! Trials run per attempted hop, in a fixed order: outage, then congestion,
//! then attack. They are independent of the topology: a link the provider
//! reports as up can still lose the packet here.

use crate::error::SimError;
use isltask_env::TaskId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// ChaCha8 words reserved for one hop attempt.
const WORDS_PER_ATTEMPT: u128 = 64;

/// Loss and attack probabilities for a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LossProfile {
    /// Drop regardless of link state (unmodeled physical loss)
    pub p_outage: f64,

    /// Drop from queueing loss
    pub p_congestion: f64,

    /// Payload digest corrupted before verification
    pub p_attack: f64,
}

impl LossProfile {
    pub fn new(p_outage: f64, p_congestion: f64, p_attack: f64) -> Self {
        Self {
            p_outage,
            p_congestion,
            p_attack,
        }
    }

    /// Every probability must lie in `0..=1`.
    pub fn validate(&self) -> Result<(), SimError> {
        for (field, value) in [
            ("p_outage", self.p_outage),
            ("p_congestion", self.p_congestion),
            ("p_attack", self.p_attack),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::config(
                    field,
                    format!("probability must be within 0..=1, got {}", value),
                ));
            }
        }
        Ok(())
    }
}

/// What happens to one packet between injection and arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopFate {
    /// Lost to the outage trial
    Outage,

    /// Lost to the congestion trial
    Congestion,

    /// Arrives; `tamper` names the digest byte to corrupt, if attacked
    Delivered { tamper: Option<usize> },
}

impl HopFate {
    pub fn is_dropped(&self) -> bool {
        !matches!(self, HopFate::Delivered { .. })
    }

    pub fn is_tampered(&self) -> bool {
        matches!(self, HopFate::Delivered { tamper: Some(_) })
    }

    /// Trace label for the fate.
    pub fn label(&self) -> &'static str {
        match self {
            HopFate::Outage => "outage",
            HopFate::Congestion => "congestion",
            HopFate::Delivered { tamper: Some(_) } => "tampered",
            HopFate::Delivered { tamper: None } => "delivered",
        }
    }
}

/// Decides hop fates from counter-addressed randomness.
///
/// Each `(task, attempt)` pair owns a fixed window of the run's ChaCha8
/// stream and always consumes the same draws, so raising `p_outage` can
/// only turn deliveries into drops for the same attempt.
#[derive(Debug, Clone)]
pub struct DeliveryModel {
    profile: LossProfile,
    seed: u64,
}

impl DeliveryModel {
    pub fn new(profile: LossProfile, seed: u64) -> Result<Self, SimError> {
        profile.validate()?;
        Ok(Self { profile, seed })
    }

    pub fn profile(&self) -> &LossProfile {
        &self.profile
    }

    /// Runs the three trials for `attempt` of `task`.
    pub fn trial(&self, task: TaskId, attempt: u32) -> HopFate {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(task.0);
        rng.set_word_pos(attempt as u128 * WORDS_PER_ATTEMPT);

        let outage = rng.gen::<f64>() < self.profile.p_outage;
        let congestion = rng.gen::<f64>() < self.profile.p_congestion;
        let attack = rng.gen::<f64>() < self.profile.p_attack;
        let byte = rng.gen_range(0..32usize);

        if outage {
            HopFate::Outage
        } else if congestion {
            HopFate::Congestion
        } else {
            HopFate::Delivered {
                tamper: attack.then_some(byte),
            }
        }
    }
}

/// Corrupts one byte of a carried digest.
pub fn tamper_digest(digest: &mut [u8; 32], byte: usize) {
    digest[byte % 32] ^= 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_profile_always_delivers() {
        let model = DeliveryModel::new(LossProfile::default(), 1).unwrap();
        for attempt in 0..200 {
            assert_eq!(
                model.trial(TaskId(attempt as u64 % 7), attempt),
                HopFate::Delivered { tamper: None }
            );
        }
    }

    #[test]
    fn test_full_outage_always_drops() {
        let model = DeliveryModel::new(LossProfile::new(1.0, 0.0, 0.0), 1).unwrap();
        for attempt in 0..100 {
            assert_eq!(model.trial(TaskId(3), attempt), HopFate::Outage);
        }
    }

    #[test]
    fn test_outage_checked_before_congestion() {
        let model = DeliveryModel::new(LossProfile::new(1.0, 1.0, 1.0), 1).unwrap();
        assert_eq!(model.trial(TaskId(0), 0), HopFate::Outage);

        let model = DeliveryModel::new(LossProfile::new(0.0, 1.0, 1.0), 1).unwrap();
        assert_eq!(model.trial(TaskId(0), 0), HopFate::Congestion);
    }

    #[test]
    fn test_full_attack_always_tampers() {
        let model = DeliveryModel::new(LossProfile::new(0.0, 0.0, 1.0), 11).unwrap();
        for attempt in 0..50 {
            assert!(model.trial(TaskId(1), attempt).is_tampered());
        }
    }

    #[test]
    fn test_trials_are_counter_addressed() {
        let model = DeliveryModel::new(LossProfile::new(0.5, 0.0, 0.5), 99).unwrap();
        let forward: Vec<HopFate> = (0..20).map(|a| model.trial(TaskId(4), a)).collect();
        let backward: Vec<HopFate> = (0..20).rev().map(|a| model.trial(TaskId(4), a)).collect();

        let mut reversed = backward;
        reversed.reverse();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_raising_outage_only_adds_drops() {
        let low = DeliveryModel::new(LossProfile::new(0.2, 0.0, 0.0), 5).unwrap();
        let high = DeliveryModel::new(LossProfile::new(0.6, 0.0, 0.0), 5).unwrap();

        for task in 0..10 {
            for attempt in 0..20 {
                let (a, b) = (low.trial(TaskId(task), attempt), high.trial(TaskId(task), attempt));
                if a.is_dropped() {
                    assert!(b.is_dropped());
                }
            }
        }
    }

    #[test]
    fn test_observed_rate_near_probability() {
        let model = DeliveryModel::new(LossProfile::new(0.3, 0.0, 0.0), 17).unwrap();
        let drops = (0..5000u32)
            .filter(|&i| model.trial(TaskId(i as u64 % 50), i / 50).is_dropped())
            .count();
        let rate = drops as f64 / 5000.0;
        assert!((rate - 0.3).abs() < 0.03, "rate was {}", rate);
    }

    #[test]
    fn test_tamper_flips_single_bit() {
        let mut digest = [0u8; 32];
        tamper_digest(&mut digest, 5);
        assert_eq!(digest[5], 0x01);
        assert_eq!(digest.iter().filter(|&&b| b != 0).count(), 1);
    }

    #[test]
    fn test_out_of_range_probability_rejected() {
        assert!(LossProfile::new(0.0, 1.01, 0.0).validate().is_err());
        assert!(LossProfile::new(f64::NAN, 0.0, 0.0).validate().is_err());
        assert!(LossProfile::new(1.0, 1.0, 1.0).validate().is_ok());
    }
}
