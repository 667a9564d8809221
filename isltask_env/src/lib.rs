//! ISL Tasking Environment Boundary
//!
//! This crate holds the two seams the tasking engine talks through, and the
//! value types that cross them:
//!
//! - **Topology**: a time-indexed connectivity feed (`TopologyProvider`).
//!   The engine only needs the satellite/ground partition and per-step link
//!   availability; richer providers can override `active_links`.
//! - **Security**: capability issuance and receipt verification
//!   (`SecurityBackend`). Implementations may live in-process, behind an
//!   external tool, or on top of a record store.
//!
//! Neither seam is implemented here. The engine (`isltask_core`) consumes
//! them and the harness (`isltask_sim`) provides concrete variants.
//!
//! # Example
//!
//! ```ignore
//! use isltask_env::{LinkState, NodeId, TopologyProvider};
//!
//! fn ground_contacts<T: TopologyProvider>(topo: &T, step: u64) -> usize {
//!     topo.active_links(step)
//!         .map(|links| links.iter().filter(|l| l.dst.is_ground()).count())
//!         .unwrap_or(0)
//! }
//! ```

mod error;
mod security;
mod topology;
mod types;

pub use error::EnvError;
pub use security::SecurityBackend;
pub use topology::{Link, LinkState, NodePartition, TopologyProvider};
pub use types::{
    CapabilityToken, NodeId, NodeKind, PacketDescriptor, PacketId, Receipt, TaskId, TokenId,
    TokenRequest, TokenScope, Verdict,
};
