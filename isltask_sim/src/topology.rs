//! Topology providers for experiments.
//!
//! - [`StubTopology`]: synthetic ring constellation with duty-cycled ring
//!   links, rotating ground contact windows and rotating cross-links
//! - [`ScheduleTopology`]: replays a per-step edge list produced by an
//!   external orbital simulator
//! - [`PartitionTopology`]: nothing but the satellite/ground split and a
//!   periodic ground contact

use isltask_env::{EnvError, Link, LinkState, NodeId, NodePartition, TopologyProvider};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::path::Path;

// ============================================================================
// STUB
// ============================================================================

/// Shape of the synthetic constellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubParams {
    pub n_satellites: u32,
    pub n_ground: u32,

    /// Satellites in each ground contact window (and rotating cross-links)
    pub window: u32,

    /// Steps between window rotations
    pub crosslink_period: u64,

    /// Ring links cycle with this period...
    pub ring_period: u64,

    /// ...and are up for this fraction of it
    pub ring_duty: f64,

    /// Ground contacts also require the satellite within this distance
    pub acceptance_radius: f64,

    /// Orbital rate, used for positions
    pub mean_motion_rev_per_day: f64,

    pub step_duration_secs: f64,
}

impl Default for StubParams {
    fn default() -> Self {
        Self {
            n_satellites: 20,
            n_ground: 2,
            window: 5,
            crosslink_period: 12,
            ring_period: 6,
            ring_duty: 0.7,
            acceptance_radius: 2.0,
            mean_motion_rev_per_day: 15.0,
            step_duration_secs: 600.0,
        }
    }
}

/// Synthetic time-varying constellation.
///
/// All links are bidirectional. The ring is duty-cycled, so even a satellite
/// far from any contact window eventually drains toward the ground.
pub struct StubTopology {
    params: StubParams,
    partition: NodePartition,
    now: u64,
}

impl StubTopology {
    pub fn new(params: StubParams) -> Result<Self, EnvError> {
        if params.n_satellites == 0 || params.n_ground == 0 {
            return Err(EnvError::topology(0, "stub needs satellites and ground stations"));
        }
        let partition = NodePartition::indexed(params.n_satellites, params.n_ground);
        Ok(Self {
            params,
            partition,
            now: 0,
        })
    }

    pub fn params(&self) -> &StubParams {
        &self.params
    }

    /// 2-D position of a node at `step`.
    pub fn position(&self, node: NodeId, step: u64) -> Point2<f64> {
        let p = &self.params;
        if node.is_satellite() {
            let steps_per_day = (86_400.0 / p.step_duration_secs).max(1.0);
            let omega = p.mean_motion_rev_per_day.max(0.01) * 2.0 * PI / steps_per_day;
            let theta =
                2.0 * PI * node.index() as f64 / p.n_satellites as f64 + omega * step as f64;
            Point2::new(theta.cos(), theta.sin())
        } else {
            let theta = 2.0 * PI * node.index() as f64 / p.n_ground.max(1) as f64;
            Point2::new(1.05 * theta.cos(), -1.2 + 0.05 * theta.sin())
        }
    }

    fn within_radius(&self, sat: NodeId, ground: NodeId, step: u64) -> bool {
        nalgebra::distance(&self.position(sat, step), &self.position(ground, step))
            <= self.params.acceptance_radius
    }

    /// Undirected edges up at `step`.
    fn edges_at(&self, step: u64) -> BTreeSet<Link> {
        let p = &self.params;
        let n = p.n_satellites;
        let mut edges = BTreeSet::new();
        let mut connect = |a: NodeId, b: NodeId| {
            if a != b {
                edges.insert(Link::new(a, b));
                edges.insert(Link::new(b, a));
            }
        };

        let ring_period = p.ring_period.max(1);
        let ring_on = (p.ring_duty * ring_period as f64) as u64;
        for i in 0..n {
            if (step + i as u64) % ring_period < ring_on {
                connect(NodeId::satellite(i), NodeId::satellite((i + 1) % n));
            }
        }

        let start = ((step / p.crosslink_period.max(1)) % n as u64) as u32;
        let ground_offset = (n / p.n_ground.max(1)).max(1);
        for g in 0..p.n_ground {
            let ground = NodeId::ground(g);
            let g_start = (start + g * ground_offset) % n;
            for k in 0..p.window {
                let sat = NodeId::satellite((g_start + k) % n);
                if self.within_radius(sat, ground, step) {
                    connect(sat, ground);
                }
            }
        }

        let w = p.window.max(2);
        for k in 0..p.window {
            let i = (start + k) % n;
            connect(NodeId::satellite(i), NodeId::satellite((i + w) % n));
        }

        edges
    }
}

impl TopologyProvider for StubTopology {
    fn partition(&self) -> &NodePartition {
        &self.partition
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn advance(&mut self, n_steps: u64) -> Result<(), EnvError> {
        self.now += n_steps;
        Ok(())
    }

    fn link_state(&self, src: NodeId, dst: NodeId, step: u64) -> Result<LinkState, EnvError> {
        let up = self.edges_at(step).contains(&Link::new(src, dst));
        Ok(LinkState { available: up })
    }

    fn active_links(&self, step: u64) -> Result<Vec<Link>, EnvError> {
        Ok(self.edges_at(step).into_iter().collect())
    }
}

// ============================================================================
// SCHEDULE
// ============================================================================

/// What a schedule reports for steps past its last entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastEnd {
    /// Keep reporting the last step's links
    #[default]
    Hold,

    /// Report `TopologyUnavailable`
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleStep {
    #[serde(default)]
    edges: Vec<(NodeId, NodeId)>,
}

/// On-disk connectivity artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleArtifact {
    #[serde(default)]
    sat_nodes: Vec<NodeId>,

    #[serde(default)]
    ground_nodes: Vec<NodeId>,

    /// Edges are one-way when set
    #[serde(default)]
    directed: bool,

    steps: Vec<ScheduleStep>,
}

/// Replays a precomputed per-step edge list.
pub struct ScheduleTopology {
    partition: NodePartition,
    steps: Vec<BTreeSet<Link>>,
    past_end: PastEnd,
    now: u64,
}

impl ScheduleTopology {
    pub fn from_json_file<P: AsRef<Path>>(path: P, past_end: PastEnd) -> Result<Self, EnvError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EnvError::topology(0, format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw, past_end)
    }

    /// Parses a schedule. Node lists are inferred from the edges when either
    /// is missing.
    pub fn from_json_str(raw: &str, past_end: PastEnd) -> Result<Self, EnvError> {
        let artifact: ScheduleArtifact =
            serde_json::from_str(raw).map_err(|e| EnvError::Serialization(e.to_string()))?;
        if artifact.steps.is_empty() {
            return Err(EnvError::topology(0, "schedule has no steps"));
        }

        let steps: Vec<BTreeSet<Link>> = artifact
            .steps
            .iter()
            .map(|s| {
                let mut links = BTreeSet::new();
                for &(a, b) in &s.edges {
                    if a == b {
                        continue;
                    }
                    links.insert(Link::new(a, b));
                    if !artifact.directed {
                        links.insert(Link::new(b, a));
                    }
                }
                links
            })
            .collect();

        let partition = if artifact.sat_nodes.is_empty() || artifact.ground_nodes.is_empty() {
            let nodes: BTreeSet<NodeId> = steps
                .iter()
                .flatten()
                .flat_map(|l| [l.src, l.dst])
                .collect();
            NodePartition {
                satellites: nodes.iter().copied().filter(NodeId::is_satellite).collect(),
                ground: nodes.iter().copied().filter(NodeId::is_ground).collect(),
            }
        } else {
            NodePartition {
                satellites: artifact.sat_nodes,
                ground: artifact.ground_nodes,
            }
        };

        Ok(Self {
            partition,
            steps,
            past_end,
            now: 0,
        })
    }

    /// Number of steps in the artifact.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn links_at(&self, step: u64) -> Result<&BTreeSet<Link>, EnvError> {
        let last = self.steps.len().saturating_sub(1);
        let idx = match usize::try_from(step) {
            Ok(i) if i <= last => i,
            _ if self.past_end == PastEnd::Hold => last,
            _ => {
                return Err(EnvError::topology(
                    step,
                    format!("schedule ends at step {}", last),
                ))
            }
        };
        self.steps
            .get(idx)
            .ok_or_else(|| EnvError::topology(step, "schedule has no steps"))
    }
}

impl TopologyProvider for ScheduleTopology {
    fn partition(&self) -> &NodePartition {
        &self.partition
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn advance(&mut self, n_steps: u64) -> Result<(), EnvError> {
        self.now += n_steps;
        Ok(())
    }

    fn link_state(&self, src: NodeId, dst: NodeId, step: u64) -> Result<LinkState, EnvError> {
        let up = self.links_at(step)?.contains(&Link::new(src, dst));
        Ok(LinkState { available: up })
    }

    fn active_links(&self, step: u64) -> Result<Vec<Link>, EnvError> {
        Ok(self.links_at(step)?.iter().copied().collect())
    }
}

// ============================================================================
// PARTITION
// ============================================================================

/// Knows only which nodes are satellites and which are ground stations.
///
/// Satellites always see each other; every satellite sees every ground
/// station once per `contact_interval` steps.
pub struct PartitionTopology {
    partition: NodePartition,
    contact_interval: u64,
    now: u64,
}

impl PartitionTopology {
    pub fn new(n_satellites: u32, n_ground: u32, contact_interval: u64) -> Self {
        Self {
            partition: NodePartition::indexed(n_satellites, n_ground),
            contact_interval: contact_interval.max(1),
            now: 0,
        }
    }
}

impl TopologyProvider for PartitionTopology {
    fn partition(&self) -> &NodePartition {
        &self.partition
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn advance(&mut self, n_steps: u64) -> Result<(), EnvError> {
        self.now += n_steps;
        Ok(())
    }

    fn link_state(&self, src: NodeId, dst: NodeId, step: u64) -> Result<LinkState, EnvError> {
        if src == dst || !self.partition.contains(src) || !self.partition.contains(dst) {
            return Ok(LinkState::DOWN);
        }
        Ok(match (src.is_satellite(), dst.is_satellite()) {
            (true, true) => LinkState::UP,
            (false, false) => LinkState::DOWN,
            _ => LinkState {
                available: step % self.contact_interval == 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCHEDULE: &str = r#"{
        "steps": [
            {"edges": [["sat-0", "sat-1"], ["sat-1", "ground-0"]]},
            {"edges": [["sat-0", "ground-0"]]}
        ]
    }"#;

    #[test]
    fn test_stub_links_are_symmetric() {
        let stub = StubTopology::new(StubParams::default()).unwrap();
        for step in [0, 5, 13, 77] {
            let links = stub.active_links(step).unwrap();
            assert!(!links.is_empty());
            for link in &links {
                assert!(links.contains(&link.reversed()));
            }
        }
    }

    #[test]
    fn test_stub_ring_duty_cycle() {
        let stub = StubTopology::new(StubParams::default()).unwrap();
        let (a, b) = (NodeId::satellite(0), NodeId::satellite(1));
        // period 6, duty 0.7 -> up for phases 0..4
        let up: Vec<bool> = (0..6)
            .map(|t| stub.link_state(a, b, t).unwrap().available)
            .collect();
        assert_eq!(up, vec![true, true, true, true, false, false]);
    }

    #[test]
    fn test_stub_radius_gates_ground_contacts() {
        let params = StubParams {
            acceptance_radius: 0.01,
            ..Default::default()
        };
        let stub = StubTopology::new(params).unwrap();
        for step in 0..24 {
            let links = stub.active_links(step).unwrap();
            assert!(links.iter().all(|l| l.src.is_satellite() && l.dst.is_satellite()));
        }

        let wide = StubTopology::new(StubParams {
            acceptance_radius: 10.0,
            ..Default::default()
        })
        .unwrap();
        let links = wide.active_links(0).unwrap();
        let ground = links.iter().filter(|l| l.dst.is_ground()).count();
        assert_eq!(ground, 10);
    }

    #[test]
    fn test_stub_window_rotates() {
        let stub = StubTopology::new(StubParams {
            acceptance_radius: 10.0,
            ..Default::default()
        })
        .unwrap();
        let g = NodeId::ground(0);
        assert!(stub.link_state(NodeId::satellite(0), g, 0).unwrap().available);
        assert!(!stub.link_state(NodeId::satellite(0), g, 12).unwrap().available);
        assert!(stub.link_state(NodeId::satellite(1), g, 12).unwrap().available);
    }

    #[test]
    fn test_schedule_infers_nodes_and_undirected_edges() {
        let topo = ScheduleTopology::from_json_str(SCHEDULE, PastEnd::Hold).unwrap();
        assert_eq!(topo.partition().satellites, vec![NodeId::satellite(0), NodeId::satellite(1)]);
        assert_eq!(topo.partition().ground, vec![NodeId::ground(0)]);

        let (s1, g0) = (NodeId::satellite(1), NodeId::ground(0));
        assert!(topo.link_state(g0, s1, 0).unwrap().available);
        assert!(!topo.link_state(g0, s1, 1).unwrap().available);
    }

    #[test]
    fn test_schedule_past_end() {
        let hold = ScheduleTopology::from_json_str(SCHEDULE, PastEnd::Hold).unwrap();
        assert_eq!(hold.active_links(1).unwrap(), hold.active_links(50).unwrap());

        let fail = ScheduleTopology::from_json_str(SCHEDULE, PastEnd::Fail).unwrap();
        assert!(fail.active_links(1).is_ok());
        assert!(matches!(
            fail.active_links(2),
            Err(EnvError::TopologyUnavailable { step: 2, .. })
        ));
    }

    #[test]
    fn test_schedule_directed() {
        let raw = r#"{"directed": true, "steps": [{"edges": [["sat-0", "ground-0"]]}]}"#;
        let topo = ScheduleTopology::from_json_str(raw, PastEnd::Hold).unwrap();
        let (s0, g0) = (NodeId::satellite(0), NodeId::ground(0));
        assert!(topo.link_state(s0, g0, 0).unwrap().available);
        assert!(!topo.link_state(g0, s0, 0).unwrap().available);
    }

    #[test]
    fn test_schedule_rejects_empty_and_bad_names() {
        assert!(ScheduleTopology::from_json_str(r#"{"steps": []}"#, PastEnd::Hold).is_err());
        let raw = r#"{"steps": [{"edges": [["relay-1", "ground-0"]]}]}"#;
        assert!(ScheduleTopology::from_json_str(raw, PastEnd::Hold).is_err());
    }

    #[test]
    fn test_partition_contacts_are_periodic() {
        let topo = PartitionTopology::new(3, 1, 6);
        let (s0, s1, g0) = (NodeId::satellite(0), NodeId::satellite(1), NodeId::ground(0));

        assert!(topo.link_state(s0, s1, 3).unwrap().available);
        assert!(topo.link_state(s0, g0, 6).unwrap().available);
        assert!(!topo.link_state(s0, g0, 7).unwrap().available);
        assert_eq!(topo.active_links(1).unwrap().len(), 6);
    }

    proptest! {
        #[test]
        fn prop_stub_links_stay_inside_partition(
            n_sats in 3u32..40,
            n_ground in 1u32..5,
            step in 0u64..500,
        ) {
            let stub = StubTopology::new(StubParams {
                n_satellites: n_sats,
                n_ground,
                acceptance_radius: 10.0,
                ..Default::default()
            })
            .unwrap();
            let links = stub.active_links(step).unwrap();

            for link in &links {
                prop_assert!(link.src != link.dst);
                prop_assert!(stub.partition().contains(link.src));
                prop_assert!(stub.partition().contains(link.dst));
                prop_assert!(!(link.src.is_ground() && link.dst.is_ground()));
                prop_assert!(stub.link_state(link.src, link.dst, step).unwrap().available);
            }
        }
    }
}
