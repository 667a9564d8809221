//! Experiment runner - wires topologies, backends and trace sinks into
//! engine runs, and repeats them across modes and loss grids.

use crate::backend::{open_backend, BackendKind};
use crate::exporter::{write_outcomes_file, JsonlTrace, SummaryRow};
use crate::scenarios::ScenarioId;
use crate::topology::{PartitionTopology, PastEnd, ScheduleTopology, StubParams, StubTopology};

use isltask_core::{
    Engine, LossProfile, NullTrace, RunReport, SimConfig, SimError, TaskingMode, TraceSink,
};
use isltask_env::{EnvError, TopologyProvider};
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a run's connectivity comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologySource {
    /// Synthetic constellation sized from the run configuration
    Stub,

    /// Replayed artifact
    Schedule { path: PathBuf, past_end: PastEnd },

    /// Partition only; ground contact every `ground_contact_interval` steps
    Partition,
}

impl TopologySource {
    /// Parses `stub`, `partition` or `schedule:<path>`.
    pub fn parse(source: &str) -> Result<Self, String> {
        match source.trim() {
            "stub" | "" => Ok(TopologySource::Stub),
            "partition" => Ok(TopologySource::Partition),
            other => match other.split_once(':') {
                Some(("schedule", path)) if !path.is_empty() => Ok(TopologySource::Schedule {
                    path: PathBuf::from(path),
                    past_end: PastEnd::Hold,
                }),
                _ => Err(format!(
                    "Unknown topology '{}' (expected stub, partition or schedule:<path>)",
                    other
                )),
            },
        }
    }

    /// Builds a fresh provider for one run.
    pub fn open(&self, config: &SimConfig) -> Result<Box<dyn TopologyProvider>, EnvError> {
        Ok(match self {
            TopologySource::Stub => Box::new(StubTopology::new(StubParams {
                n_satellites: config.n_satellites,
                n_ground: config.n_ground,
                acceptance_radius: config.acceptance_radius,
                step_duration_secs: config.step_duration_secs,
                ..Default::default()
            })?),
            TopologySource::Schedule { path, past_end } => {
                Box::new(ScheduleTopology::from_json_file(path, *past_end)?)
            }
            TopologySource::Partition => Box::new(PartitionTopology::new(
                config.n_satellites,
                config.n_ground,
                config.ground_contact_interval,
            )),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TopologySource::Stub => "stub",
            TopologySource::Schedule { .. } => "schedule",
            TopologySource::Partition => "partition",
        }
    }
}

/// Loss grid for sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    pub attack: Vec<f64>,
    pub outage: Vec<f64>,
    pub congestion: Vec<f64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            attack: vec![0.0, 0.05, 0.2],
            outage: vec![0.0, 0.1],
            congestion: vec![0.0, 0.2],
        }
    }
}

impl SweepGrid {
    /// Every loss profile in the grid, attack-major.
    pub fn profiles(&self) -> Vec<LossProfile> {
        let mut out = Vec::new();
        for &a in &self.attack {
            for &o in &self.outage {
                for &c in &self.congestion {
                    out.push(LossProfile::new(o, c, a));
                }
            }
        }
        out
    }
}

/// A finished run together with the configuration it ran with.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub config: SimConfig,
    pub report: RunReport,
    pub summary: SummaryRow,
}

/// Runs experiments.
pub struct ExperimentRunner {
    /// Base configuration
    config: SimConfig,

    topology: TopologySource,
    backend: BackendKind,

    /// Trace and outcome files are written here when set
    trace_dir: Option<PathBuf>,

    scenario: Option<ScenarioId>,
}

impl ExperimentRunner {
    /// Creates a runner with the stub topology and the local backend.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            topology: TopologySource::Stub,
            backend: BackendKind::Local,
            trace_dir: None,
            scenario: None,
        }
    }

    pub fn with_topology(mut self, topology: TopologySource) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }

    /// Applies a scenario's loss profile to the base configuration.
    pub fn with_scenario(mut self, scenario: ScenarioId) -> Self {
        self.config = scenario.configure(&self.config);
        self.scenario = Some(scenario);
        self
    }

    /// Replaces the base loss profile.
    pub fn with_loss(mut self, loss: LossProfile) -> Self {
        self.config.loss = loss;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs the base configuration once.
    pub fn run(&self) -> Result<RunOutput, SimError> {
        self.run_config(self.config.clone())
    }

    /// Runs both admission modes with the same seed.
    pub fn compare_modes(&self) -> Result<Vec<RunOutput>, SimError> {
        TaskingMode::ALL
            .iter()
            .map(|&mode| {
                self.run_config(SimConfig {
                    mode,
                    ..self.config.clone()
                })
            })
            .collect()
    }

    /// Runs every mode for every loss profile in the grid.
    pub fn sweep(&self, grid: &SweepGrid) -> Result<Vec<RunOutput>, SimError> {
        let profiles = grid.profiles();
        info!(points = profiles.len(), "Starting sweep");

        let mut out = Vec::with_capacity(profiles.len() * TaskingMode::ALL.len());
        for loss in profiles {
            for &mode in &TaskingMode::ALL {
                out.push(self.run_config(SimConfig {
                    mode,
                    loss,
                    ..self.config.clone()
                })?);
            }
        }
        Ok(out)
    }

    /// Runs one configuration end to end.
    pub fn run_config(&self, config: SimConfig) -> Result<RunOutput, SimError> {
        config.validate()?;
        let tag = self.run_tag(&config);

        let topology = self.topology.open(&config)?;
        let backend = open_backend(&self.backend, config.key_seed(), config.backend_timeout_ms)?;
        let trace: Box<dyn TraceSink> = match &self.trace_dir {
            Some(dir) => Box::new(JsonlTrace::create(dir.join(format!("{}.trace.jsonl", tag)))?),
            None => Box::new(NullTrace),
        };

        info!(
            run = %tag,
            topology = self.topology.name(),
            backend = %self.backend,
            "Running"
        );

        let mut engine = Engine::new(config.clone(), topology, backend, trace)?;
        let report = engine.run();

        if !report.status.is_completed() {
            warn!(run = %tag, status = ?report.status, "Run did not complete");
        }

        if let Some(dir) = &self.trace_dir {
            write_outcomes_file(dir.join(format!("{}.outcomes.jsonl", tag)), &report.outcomes)?;
        }

        let summary = SummaryRow::from_report(&config, &report, self.scenario.map(|s| s.name()));
        Ok(RunOutput {
            config,
            report,
            summary,
        })
    }

    fn run_tag(&self, config: &SimConfig) -> String {
        let prefix = self.scenario.map(|s| s.name()).unwrap_or("run");
        format!(
            "{}_{}_seed{}_out{}_cong{}_atk{}",
            prefix,
            config.mode.label(),
            config.seed,
            config.loss.p_outage,
            config.loss.p_congestion,
            config.loss.p_attack
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimConfig {
        SimConfig {
            n_satellites: 8,
            n_ground: 1,
            steps: 24,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_topology_source() {
        assert_eq!(TopologySource::parse("stub").unwrap(), TopologySource::Stub);
        assert_eq!(TopologySource::parse("partition").unwrap(), TopologySource::Partition);
        assert_eq!(
            TopologySource::parse("schedule:/tmp/s.json").unwrap(),
            TopologySource::Schedule {
                path: PathBuf::from("/tmp/s.json"),
                past_end: PastEnd::Hold
            }
        );
        assert!(TopologySource::parse("schedule:").is_err());
        assert!(TopologySource::parse("hypatia").is_err());
    }

    #[test]
    fn test_default_sweep_grid_size() {
        let profiles = SweepGrid::default().profiles();
        assert_eq!(profiles.len(), 12);
        assert!(profiles.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_compare_modes_runs_both() {
        let runner = ExperimentRunner::new(small()).with_topology(TopologySource::Partition);
        let outputs = runner.compare_modes().unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].report.mode, TaskingMode::GroundGated);
        assert_eq!(outputs[1].report.mode, TaskingMode::IslForwarded);
        for out in &outputs {
            assert!(out.report.status.is_completed());
            assert_eq!(out.report.backend, "local");
            assert_eq!(out.summary.tasks, 24);
        }
    }

    #[test]
    fn test_missing_schedule_is_an_error() {
        let runner = ExperimentRunner::new(small()).with_topology(TopologySource::Schedule {
            path: PathBuf::from("/nonexistent/schedule.json"),
            past_end: PastEnd::Hold,
        });
        assert!(runner.run().is_err());
    }

    #[test]
    fn test_loss_after_scenario_wins() {
        let runner = ExperimentRunner::new(small())
            .with_scenario(ScenarioId::Blackout)
            .with_loss(LossProfile::new(0.25, 0.0, 0.0));
        assert_eq!(runner.config().loss, LossProfile::new(0.25, 0.0, 0.0));
        assert_eq!(runner.run_tag(runner.config()), "blackout_isl_seed7_out0.25_cong0_atk0");
    }

    #[test]
    fn test_invalid_config_rejected_before_run() {
        let mut config = small();
        config.loss.p_attack = 1.5;
        let err = ExperimentRunner::new(config).run().unwrap_err();
        assert!(matches!(err, SimError::Configuration { field: "p_attack", .. }));
    }
}
