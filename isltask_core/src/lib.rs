//! ISL Tasking Core - capability-gated forwarding over time-varying topologies
//!
//! Measures whether least-privilege inter-satellite forwarding beats a
//! ground-gated baseline on latency and deadline compliance:
//! 1. **Protocol**: ground-gated vs ISL-forwarded admission, scoped tokens,
//!    downlink upgrades at ground-adjacent relays
//! 2. **Delivery model**: synthetic outage, congestion and tamper trials,
//!    independent of what the topology reports
//! 3. **Metrics**: availability, verification rate, reach and TTFS
//!    percentiles, with numerators and denominators kept

pub mod arrival;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod routing;
pub mod trace;

#[cfg(test)]
mod testkit;

// Re-export key types for convenience
pub use arrival::ArrivalProcess;
pub use config::SimConfig;
pub use delivery::{DeliveryModel, HopFate, LossProfile};
pub use engine::{CancelHandle, Engine, RunCounters, RunReport, RunStatus};
pub use entity::{OutcomeRecord, PacketOutcome, Task, TaskStatus};
pub use error::SimError;
pub use metrics::{LatencySummary, Ratio, RunMetrics};
pub use protocol::{TaskingMode, TaskingProtocol};
pub use routing::LinkSnapshot;
pub use trace::{MemoryTrace, NullTrace, TraceEvent, TraceRecord, TraceSink};
