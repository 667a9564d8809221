//! Value types exchanged across the topology and security boundaries.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Which side of the space/ground partition a node sits on.
///
/// Declaration order matters: satellites sort before ground stations, which
/// is the tie-break order used for next-hop selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Satellite,
    Ground,
}

/// Identifier of a network node (`sat-3`, `ground-0`).
///
/// Ordering is by kind, then index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    kind: NodeKind,
    index: u32,
}

impl NodeId {
    /// Creates a satellite node id.
    pub fn satellite(index: u32) -> Self {
        Self {
            kind: NodeKind::Satellite,
            index,
        }
    }

    /// Creates a ground-station node id.
    pub fn ground(index: u32) -> Self {
        Self {
            kind: NodeKind::Ground,
            index,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_satellite(&self) -> bool {
        self.kind == NodeKind::Satellite
    }

    pub fn is_ground(&self) -> bool {
        self.kind == NodeKind::Ground
    }

    /// Stable 64-bit value for seed derivation.
    pub fn as_seed(&self) -> u64 {
        let tag = match self.kind {
            NodeKind::Satellite => 0u64,
            NodeKind::Ground => 1u64 << 32,
        };
        tag | self.index as u64
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Satellite => write!(f, "sat-{}", self.index),
            NodeKind::Ground => write!(f, "ground-{}", self.index),
        }
    }
}

impl FromStr for NodeId {
    type Err = EnvError;

    /// Accepts `sat-N`, `satN`, `ground-N`, `groundN`, `gs-N` and `gsN`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (kind, rest) = if let Some(rest) = lower.strip_prefix("sat") {
            (NodeKind::Satellite, rest)
        } else if let Some(rest) = lower.strip_prefix("ground") {
            (NodeKind::Ground, rest)
        } else if let Some(rest) = lower.strip_prefix("gs") {
            (NodeKind::Ground, rest)
        } else {
            return Err(EnvError::InvalidNode(s.to_string()));
        };

        let digits = rest.trim_start_matches(['-', '_']);
        let index = digits
            .parse::<u32>()
            .map_err(|_| EnvError::InvalidNode(s.to_string()))?;
        Ok(Self { kind, index })
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = EnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a task, allocated sequentially by the engine.
    TaskId,
    "task"
);
numeric_id!(
    /// Identifier of a packet (one per attempted hop).
    PacketId,
    "pkt"
);
numeric_id!(
    /// Identifier of a capability token.
    TokenId,
    "tok"
);

/// Which next hops a capability token permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenScope {
    /// Any next hop.
    Unrestricted,

    /// Satellite next hops only; no ground delivery.
    InterSatellite,

    /// Satellite next hops, plus ground next hops from `relay` only.
    Downlink { relay: NodeId },
}

impl TokenScope {
    /// Returns true if a hop `from -> to` is inside this scope.
    pub fn permits(&self, from: NodeId, to: NodeId) -> bool {
        match self {
            TokenScope::Unrestricted => true,
            TokenScope::InterSatellite => to.is_satellite(),
            TokenScope::Downlink { relay } => to.is_satellite() || from == *relay,
        }
    }

    /// Short name used in sealed tokens and traces.
    pub fn name(&self) -> &'static str {
        match self {
            TokenScope::Unrestricted => "unrestricted",
            TokenScope::InterSatellite => "inter_satellite",
            TokenScope::Downlink { .. } => "downlink",
        }
    }
}

/// A scoped, time-bounded permission for one task's packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub id: TokenId,

    /// Task the token was issued for
    pub subject: TaskId,

    pub scope: TokenScope,

    /// Step the token becomes valid
    pub issued_at: u64,

    /// Last step (inclusive) the token is valid
    pub expiry: u64,

    /// Token this one was derived from (downlink upgrades)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TokenId>,

    /// Backend-specific sealed form (opaque to the engine)
    #[serde(default)]
    pub sealed: Vec<u8>,
}

impl CapabilityToken {
    /// Returns true if the token is valid at `step`.
    pub fn is_valid_at(&self, step: u64) -> bool {
        self.issued_at <= step && step <= self.expiry
    }

    /// Returns true if this token authorises `from -> to` at `step`.
    pub fn authorizes(&self, from: NodeId, to: NodeId, step: u64) -> bool {
        self.is_valid_at(step) && self.scope.permits(from, to)
    }
}

/// Request handed to `SecurityBackend::issue_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Id the engine allocated for the token
    pub token_id: TokenId,
    pub task: TaskId,

    /// Node the task's payload originates from
    pub origin: NodeId,

    pub scope: TokenScope,
    pub issued_at: u64,
    pub expiry: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TokenId>,
}

/// Packet view handed to `SecurityBackend::verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDescriptor {
    pub id: PacketId,
    pub task: TaskId,
    pub src: NodeId,
    pub dst: NodeId,

    /// Step the packet arrived at `dst`
    pub step: u64,

    pub payload_ref: Uuid,
    pub payload: Vec<u8>,

    /// Digest stamped by the sender (may have been corrupted in flight)
    pub digest: [u8; 32],

    pub token: Option<CapabilityToken>,
}

/// Receipt verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Bad,
}

/// Verification result for a delivered packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub packet: PacketId,

    /// Node that verified the packet
    pub verifier: NodeId,

    pub verdict: Verdict,

    /// Digest the verifier computed over the received payload
    pub payload_digest: [u8; 32],

    /// Why the verdict is bad, if it is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Verifier signature over the receipt body (empty if unsigned)
    #[serde(default)]
    pub signature: Vec<u8>,
}

impl Receipt {
    /// Builds an unsigned `bad` receipt for a packet that could not be verified.
    pub fn rejected(packet: &PacketDescriptor, reason: impl Into<String>) -> Self {
        Self {
            packet: packet.id,
            verifier: packet.dst,
            verdict: Verdict::Bad,
            payload_digest: packet.digest,
            reason: Some(reason.into()),
            signature: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.verdict == Verdict::Ok
    }
}
