//! Test doubles for the topology and security boundaries.

use isltask_env::{
    CapabilityToken, EnvError, Link, LinkState, NodeId, NodePartition, PacketDescriptor, PacketId,
    Receipt, SecurityBackend, TaskId, TokenId, TokenRequest, TopologyProvider, Verdict,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Replays explicit per-step link lists; the last list holds after the end.
pub struct ScriptedTopology {
    partition: NodePartition,
    steps: Vec<Vec<Link>>,
    failing: BTreeSet<u64>,
    now: u64,
}

impl ScriptedTopology {
    pub fn new(partition: NodePartition, steps: Vec<Vec<Link>>) -> Self {
        Self {
            partition,
            steps,
            failing: BTreeSet::new(),
            now: 0,
        }
    }

    /// Reports `TopologyUnavailable` at the given steps.
    pub fn failing_at(mut self, steps: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(steps);
        self
    }

    fn links_at(&self, step: u64) -> Result<&[Link], EnvError> {
        if self.failing.contains(&step) {
            return Err(EnvError::topology(step, "scripted failure"));
        }
        let idx = (step as usize).min(self.steps.len().saturating_sub(1));
        Ok(self.steps.get(idx).map(Vec::as_slice).unwrap_or(&[]))
    }
}

impl TopologyProvider for ScriptedTopology {
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
        Ok(self.links_at(step)?.to_vec())
    }
}

/// Bidirectional satellite ring; every even satellite sees a ground station.
pub fn ring_with_ground(n_sats: u32, n_ground: u32) -> ScriptedTopology {
    let mut links = Vec::new();
    for i in 0..n_sats {
        let (a, b) = (NodeId::satellite(i), NodeId::satellite((i + 1) % n_sats));
        links.push(Link::new(a, b));
        links.push(Link::new(b, a));
        if i % 2 == 0 {
            let g = NodeId::ground((i / 2) % n_ground);
            links.push(Link::new(a, g));
            links.push(Link::new(g, a));
        }
    }
    ScriptedTopology::new(NodePartition::indexed(n_sats, n_ground), vec![links])
}

/// Echoes token requests and checks payload digests with SHA-256.
#[derive(Default)]
pub struct DigestBackend {
    pub issued: Vec<TokenRequest>,
}

impl SecurityBackend for DigestBackend {
    fn name(&self) -> &'static str {
        "digest"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        self.issued.push(request.clone());
        Ok(CapabilityToken {
            id: request.token_id,
            subject: request.task,
            scope: request.scope,
            issued_at: request.issued_at,
            expiry: request.expiry,
            parent: request.parent,
            sealed: Vec::new(),
        })
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        let computed: [u8; 32] = Sha256::digest(&packet.payload).into();
        let authorized = packet
            .token
            .as_ref()
            .is_some_and(|t| t.subject == packet.task && t.authorizes(packet.src, packet.dst, packet.step));

        let (verdict, reason) = if computed != packet.digest {
            (Verdict::Bad, Some("digest_mismatch".to_string()))
        } else if !authorized {
            (Verdict::Bad, Some("unauthorized".to_string()))
        } else {
            (Verdict::Ok, None)
        };

        Ok(Receipt {
            packet: packet.id,
            verifier: packet.dst,
            verdict,
            payload_digest: computed,
            reason,
            signature: Vec::new(),
        })
    }
}

/// Fails selected calls, delegating the rest to [`DigestBackend`].
pub struct FlakyBackend {
    inner: DigestBackend,
    calls: u64,
    issues: u64,
    fail_verify: bool,
    fail_odd_calls: bool,
    fail_first_issues: u64,
}

impl FlakyBackend {
    fn base() -> Self {
        Self {
            inner: DigestBackend::default(),
            calls: 0,
            issues: 0,
            fail_verify: false,
            fail_odd_calls: false,
            fail_first_issues: 0,
        }
    }

    pub fn failing_verify() -> Self {
        Self {
            fail_verify: true,
            ..Self::base()
        }
    }

    pub fn every_other_call() -> Self {
        Self {
            fail_odd_calls: true,
            ..Self::base()
        }
    }

    pub fn failing_first_issues(n: u64) -> Self {
        Self {
            fail_first_issues: n,
            ..Self::base()
        }
    }

    fn tick(&mut self) -> Result<(), EnvError> {
        self.calls += 1;
        if self.fail_odd_calls && self.calls % 2 == 1 {
            return Err(EnvError::backend("transient"));
        }
        Ok(())
    }
}

impl SecurityBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        self.tick()?;
        self.issues += 1;
        if self.issues <= self.fail_first_issues {
            return Err(EnvError::backend("issuer offline"));
        }
        self.inner.issue_token(request)
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        self.tick()?;
        if self.fail_verify {
            return Err(EnvError::Timeout(2000));
        }
        self.inner.verify(packet)
    }
}

/// How [`SkewedBackend`] bends otherwise valid responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skew {
    /// Receipts name a different packet
    ReceiptPacket,

    /// Tokens name a different task
    TokenSubject,

    /// Downlink tokens name a different parent
    TokenParent,

    /// Tokens become valid `n` steps after the request
    IssuedLate(u64),
}

/// Delegates to [`DigestBackend`] and corrupts its answers.
pub struct SkewedBackend {
    inner: DigestBackend,
    skew: Skew,
}

impl SkewedBackend {
    pub fn new(skew: Skew) -> Self {
        Self {
            inner: DigestBackend::default(),
            skew,
        }
    }
}

impl SecurityBackend for SkewedBackend {
    fn name(&self) -> &'static str {
        "skewed"
    }

    fn issue_token(&mut self, request: &TokenRequest) -> Result<CapabilityToken, EnvError> {
        let mut token = self.inner.issue_token(request)?;
        match self.skew {
            Skew::TokenSubject => token.subject = TaskId(token.subject.0 + 1000),
            Skew::TokenParent if token.parent.is_some() => token.parent = Some(TokenId(0)),
            Skew::IssuedLate(n) => token.issued_at += n,
            _ => {}
        }
        Ok(token)
    }

    fn verify(&mut self, packet: &PacketDescriptor) -> Result<Receipt, EnvError> {
        let mut receipt = self.inner.verify(packet)?;
        if self.skew == Skew::ReceiptPacket {
            receipt.packet = PacketId(packet.id.0 + 1000);
        }
        Ok(receipt)
    }
}
