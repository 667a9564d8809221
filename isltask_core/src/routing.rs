//! Per-step link snapshot and ground-distance routing.

use isltask_env::{EnvError, Link, NodeId, NodePartition, TokenScope, TopologyProvider};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Directed links available at one step, plus each node's hop distance to
/// the nearest ground station.
#[derive(Debug, Clone, Default)]
pub struct LinkSnapshot {
    step: u64,
    out: BTreeMap<NodeId, BTreeSet<NodeId>>,
    to_ground: BTreeMap<NodeId, u32>,
    links: usize,
}

impl LinkSnapshot {
    /// A snapshot with every link down.
    pub fn empty(step: u64, partition: &NodePartition) -> Self {
        Self::from_links(step, partition, std::iter::empty())
    }

    /// Builds the snapshot from explicit directed links.
    pub fn from_links<I>(step: u64, partition: &NodePartition, links: I) -> Self
    where
        I: IntoIterator<Item = Link>,
    {
        let mut out: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut into: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut count = 0;

        for link in links {
            if link.src == link.dst {
                continue;
            }
            if out.entry(link.src).or_default().insert(link.dst) {
                into.entry(link.dst).or_default().insert(link.src);
                count += 1;
            }
        }

        // Reverse BFS from every ground station along incoming links.
        let mut to_ground = BTreeMap::new();
        let mut queue = VecDeque::new();
        let grounds = partition
            .ground
            .iter()
            .copied()
            .chain(out.keys().chain(into.keys()).copied().filter(NodeId::is_ground));
        for g in grounds {
            if to_ground.insert(g, 0).is_none() {
                queue.push_back(g);
            }
        }

        while let Some(node) = queue.pop_front() {
            let d = to_ground[&node];
            if let Some(preds) = into.get(&node) {
                for &p in preds {
                    if !to_ground.contains_key(&p) {
                        to_ground.insert(p, d + 1);
                        queue.push_back(p);
                    }
                }
            }
        }

        Self {
            step,
            out,
            to_ground,
            links: count,
        }
    }

    /// Captures the topology's links at `step`.
    pub fn capture<T>(topology: &T, step: u64) -> Result<Self, EnvError>
    where
        T: TopologyProvider + ?Sized,
    {
        let links = topology.active_links(step)?;
        Ok(Self::from_links(step, topology.partition(), links))
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn link_count(&self) -> usize {
        self.links
    }

    pub fn is_up(&self, src: NodeId, dst: NodeId) -> bool {
        self.out.get(&src).is_some_and(|n| n.contains(&dst))
    }

    /// Neighbours reachable from `node`, in ascending id order.
    pub fn neighbours(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.out.get(&node).into_iter().flatten().copied()
    }

    /// Hops from `node` to the nearest ground station, if any route exists.
    pub fn distance_to_ground(&self, node: NodeId) -> Option<u32> {
        self.to_ground.get(&node).copied()
    }

    /// True if `node` has a direct link to some ground station.
    pub fn has_ground_link(&self, node: NodeId) -> bool {
        self.neighbours(node).any(|n| n.is_ground())
    }

    /// Picks the next hop for a payload held at `holder`.
    ///
    /// Candidates are neighbours inside `scope` with a route to ground that
    /// is strictly shorter than the holder's. The smallest distance wins;
    /// ties go to the lowest `NodeId` (satellites before ground stations).
    pub fn next_hop(&self, holder: NodeId, scope: &TokenScope) -> Option<NodeId> {
        let here = self.distance_to_ground(holder)?;
        self.neighbours(holder)
            .filter(|&n| scope.permits(holder, n))
            .filter_map(|n| self.distance_to_ground(n).map(|d| (d, n)))
            .filter(|&(d, _)| d < here)
            .min()
            .map(|(_, n)| n)
    }
}
