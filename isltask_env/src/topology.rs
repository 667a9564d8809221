//! Topology provider abstraction.

use crate::error::EnvError;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};

/// Availability of one directed link at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub available: bool,
}

impl LinkState {
    pub const UP: LinkState = LinkState { available: true };
    pub const DOWN: LinkState = LinkState { available: false };
}

/// A directed link `src -> dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub src: NodeId,
    pub dst: NodeId,
}

impl Link {
    pub fn new(src: NodeId, dst: NodeId) -> Self {
        Self { src, dst }
    }

    /// The same link in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Satellite / ground split of a topology's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePartition {
    pub satellites: Vec<NodeId>,
    pub ground: Vec<NodeId>,
}

impl NodePartition {
    /// Builds the `sat-0..n` / `ground-0..m` partition.
    pub fn indexed(n_satellites: u32, n_ground: u32) -> Self {
        Self {
            satellites: (0..n_satellites).map(NodeId::satellite).collect(),
            ground: (0..n_ground).map(NodeId::ground).collect(),
        }
    }

    /// All nodes, satellites first.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.satellites.iter().chain(self.ground.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.satellites.len() + self.ground.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty() && self.ground.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        if node.is_satellite() {
            self.satellites.contains(&node)
        } else {
            self.ground.contains(&node)
        }
    }
}

/// Time-indexed connectivity feed.
///
/// # Implementations
///
/// - **Stub**: rotating contact windows over a satellite ring
/// - **Schedule**: replays a connectivity artifact produced by an external
///   orbital simulator
/// - **Partition**: knows only which nodes are satellites and which are
///   ground stations
///
/// # Asymmetry
///
/// Links are directed. `link_state(a, b, t)` says nothing about
/// `link_state(b, a, t)`.
pub trait TopologyProvider {
    /// Satellite / ground split. Must be stable for the life of the provider.
    fn partition(&self) -> &NodePartition;

    /// Current step of the provider.
    fn now(&self) -> u64;

    /// Advances the provider by `n_steps`.
    fn advance(&mut self, n_steps: u64) -> Result<(), EnvError>;

    /// Availability of `src -> dst` at `step`.
    ///
    /// # Returns
    /// * `Ok(LinkState)` - The provider knows the link state
    /// * `Err(EnvError::TopologyUnavailable)` - No state for this step
    fn link_state(&self, src: NodeId, dst: NodeId, step: u64) -> Result<LinkState, EnvError>;

    /// All available directed links at `step`.
    ///
    /// The default probes `link_state` for every ordered pair in the
    /// partition. Providers holding explicit link lists should override it.
    fn active_links(&self, step: u64) -> Result<Vec<Link>, EnvError> {
        let nodes: Vec<NodeId> = self.partition().nodes().collect();
        let mut links = Vec::new();

        for &src in &nodes {
            for &dst in &nodes {
                if src == dst {
                    continue;
                }
                if self.link_state(src, dst, step)?.available {
                    links.push(Link::new(src, dst));
                }
            }
        }

        Ok(links)
    }
}

impl<T: TopologyProvider + ?Sized> TopologyProvider for Box<T> {
    fn partition(&self) -> &NodePartition {
        (**self).partition()
    }

    fn now(&self) -> u64 {
        (**self).now()
    }

    fn advance(&mut self, n_steps: u64) -> Result<(), EnvError> {
        (**self).advance(n_steps)
    }

    fn link_state(&self, src: NodeId, dst: NodeId, step: u64) -> Result<LinkState, EnvError> {
        (**self).link_state(src, dst, step)
    }

    fn active_links(&self, step: u64) -> Result<Vec<Link>, EnvError> {
        (**self).active_links(step)
    }
}
