//! Named loss presets.

use isltask_core::{LossProfile, SimConfig};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Clean links, honest relays
    Baseline,

    /// One hop in five is tampered in flight
    Tamper,

    /// Every hop is lost to an outage
    Blackout,

    /// One hop in five is lost to congestion
    Congested,

    /// The harshest corner of the default sweep grid
    Lossy,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::Tamper,
            ScenarioId::Blackout,
            ScenarioId::Congested,
            ScenarioId::Lossy,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::Tamper => "tamper",
            ScenarioId::Blackout => "blackout",
            ScenarioId::Congested => "congested",
            ScenarioId::Lossy => "lossy",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "No synthetic loss; every verified hop should succeed",
            ScenarioId::Tamper => "20% of hops tampered, receipts must flag them",
            ScenarioId::Blackout => "100% outage, every task must expire",
            ScenarioId::Congested => "20% congestion drops, retries within the deadline",
            ScenarioId::Lossy => "10% outage + 20% congestion + 20% tampering",
        }
    }

    /// Loss profile the scenario runs with.
    pub fn loss(&self) -> LossProfile {
        match self {
            ScenarioId::Baseline => LossProfile::new(0.0, 0.0, 0.0),
            ScenarioId::Tamper => LossProfile::new(0.0, 0.0, 0.2),
            ScenarioId::Blackout => LossProfile::new(1.0, 0.0, 0.0),
            ScenarioId::Congested => LossProfile::new(0.0, 0.2, 0.0),
            ScenarioId::Lossy => LossProfile::new(0.1, 0.2, 0.2),
        }
    }

    /// Copies `base` with the scenario's loss profile.
    pub fn configure(&self, base: &SimConfig) -> SimConfig {
        SimConfig {
            loss: self.loss(),
            ..base.clone()
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "clean" => Ok(ScenarioId::Baseline),
            "tamper" | "attack" => Ok(ScenarioId::Tamper),
            "blackout" | "outage" => Ok(ScenarioId::Blackout),
            "congested" | "congestion" => Ok(ScenarioId::Congested),
            "lossy" => Ok(ScenarioId::Lossy),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
        }
        assert!("byzantine".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_loss_profiles_are_valid() {
        for id in ScenarioId::all() {
            let config = id.configure(&SimConfig::default());
            assert!(config.validate().is_ok(), "{} invalid", id);
        }
    }
}
