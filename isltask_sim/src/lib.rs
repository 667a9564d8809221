//! ISL Tasking Experiment Harness
//!
//! Concrete collaborators for the tasking engine in `isltask_core`, and the
//! plumbing to run it:
//!
//! - **Topologies**: a synthetic ring constellation, replayed schedule
//!   artifacts, and a partition-only provider
//! - **Security backends**: in-process Biscuit/Ed25519, the same backed by a
//!   sled ledger, or an external command bounded by a timeout
//! - **Runner**: single runs, ground-vs-ISL comparisons and loss sweeps
//! - **Exporters**: JSONL traces and outcomes, summary rows
//!
//! # Usage
//!
//! ```ignore
//! use isltask_core::SimConfig;
//! use isltask_sim::{ExperimentRunner, TopologySource};
//!
//! let runner = ExperimentRunner::new(SimConfig::default())
//!     .with_topology(TopologySource::Stub);
//! for out in runner.compare_modes()? {
//!     println!("{}", out.summary.to_table_line());
//! }
//! ```

pub mod backend;
pub mod exporter;
mod keys;
pub mod runner;
pub mod scenarios;
pub mod topology;
pub mod trust;

pub use backend::{open_backend, BackendKind, CommandBackend, LedgerBackend, LocalBackend};
pub use exporter::{write_outcomes, JsonlTrace, SummaryRow};
pub use keys::DeterministicKeyProvider;
pub use runner::{ExperimentRunner, RunOutput, SweepGrid, TopologySource};
pub use scenarios::ScenarioId;
pub use topology::{PartitionTopology, PastEnd, ScheduleTopology, StubParams, StubTopology};
