//! Tasks, packets and outcome records.
//!
//! The lifecycle rules live on the types: a terminal task rejects further
//! transitions, `first_success_at` is written once, and a packet resolves to
//! exactly one outcome.

use crate::delivery::HopFate;
use crate::error::SimError;
use crate::protocol::TaskingMode;
use isltask_env::{
    CapabilityToken, NodeId, PacketDescriptor, PacketId, Receipt, TaskId, TokenScope, Verdict,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Admitted,
    Forwarding,
    DeliveredVerifiedOk,
    /// A bad receipt arrived; the task keeps retrying until its deadline
    DeliveredVerifiedBad,
    Expired,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::DeliveredVerifiedOk | TaskStatus::Expired)
    }
}

/// Where a packet ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketOutcome {
    InFlight,
    Delivered,
    Dropped,
    Expired,
}

/// One attempted hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: PacketId,
    pub task: TaskId,
    pub src: NodeId,
    pub dst: NodeId,
    pub injected_at: u64,
    pub arrives_at: u64,
    pub token: Option<CapabilityToken>,
    pub fate: HopFate,
    pub receipt: Option<Receipt>,
    pub outcome: PacketOutcome,
}

/// Per-task packet and receipt counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub packets_injected: u32,
    pub packets_delivered: u32,
    pub packets_dropped: u32,
    pub tampered: u32,
    pub receipts_ok: u32,
    pub receipts_bad: u32,
    /// Packets sent to a satellite
    pub isl_packets: u32,
}

/// A unit of work travelling from its origin satellite to any ground station.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub origin: NodeId,
    pub mode: TaskingMode,
    pub created_at: u64,
    pub deadline: u64,

    status: TaskStatus,

    /// Node currently holding the payload
    holder: NodeId,

    admitted_at: Option<u64>,
    injected_at: Option<u64>,
    first_success_at: Option<u64>,
    reached_ground: bool,

    /// Admission token (immutable once granted)
    token: Option<CapabilityToken>,

    /// Latest downlink upgrade, if any
    downlink: Option<CapabilityToken>,

    payload_ref: Uuid,
    payload: Vec<u8>,
    digest: [u8; 32],

    /// Successful hops so far
    hops: u32,

    /// Packets dispatched so far (addresses the delivery trials)
    attempts: u32,

    in_flight: Option<Packet>,
    counters: TaskCounters,
}

impl Task {
    pub fn new(
        id: TaskId,
        origin: NodeId,
        mode: TaskingMode,
        created_at: u64,
        ttl_steps: u64,
        payload_ref: Uuid,
    ) -> Self {
        let mut payload = payload_ref.as_bytes().to_vec();
        payload.extend_from_slice(&id.0.to_be_bytes());
        let digest: [u8; 32] = Sha256::digest(&payload).into();

        Self {
            id,
            origin,
            mode,
            created_at,
            deadline: created_at.saturating_add(ttl_steps),
            status: TaskStatus::Created,
            holder: origin,
            admitted_at: None,
            injected_at: None,
            first_success_at: None,
            reached_ground: false,
            token: None,
            downlink: None,
            payload_ref,
            payload,
            digest,
            hops: 0,
            attempts: 0,
            in_flight: None,
            counters: TaskCounters::default(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn holder(&self) -> NodeId {
        self.holder
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn first_success_at(&self) -> Option<u64> {
        self.first_success_at
    }

    pub fn admitted_at(&self) -> Option<u64> {
        self.admitted_at
    }

    pub fn token(&self) -> Option<&CapabilityToken> {
        self.token.as_ref()
    }

    pub fn downlink(&self) -> Option<&CapabilityToken> {
        self.downlink.as_ref()
    }

    pub fn in_flight(&self) -> Option<&Packet> {
        self.in_flight.as_ref()
    }

    pub fn counters(&self) -> &TaskCounters {
        &self.counters
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, step: u64) -> bool {
        step > self.deadline
    }

    fn ensure_live(&self, action: &str) -> Result<(), SimError> {
        if self.is_terminal() {
            return Err(SimError::entity(format!(
                "{} is {:?}; cannot {}",
                self.id, self.status, action
            )));
        }
        Ok(())
    }

    /// Grants the admission token. Allowed once, from `Created`.
    pub fn admit(&mut self, token: CapabilityToken, step: u64) -> Result<(), SimError> {
        if self.status != TaskStatus::Created {
            return Err(SimError::entity(format!(
                "{} admitted twice (status {:?})",
                self.id, self.status
            )));
        }
        if token.subject != self.id {
            return Err(SimError::entity(format!(
                "token {} names {}, not {}",
                token.id, token.subject, self.id
            )));
        }
        self.token = Some(token);
        self.admitted_at = Some(step);
        self.status = TaskStatus::Admitted;
        Ok(())
    }

    /// True if the current holder already owns a downlink token.
    pub fn has_downlink_at_holder(&self) -> bool {
        matches!(
            self.downlink.as_ref().map(|t| t.scope),
            Some(TokenScope::Downlink { relay }) if relay == self.holder
        )
    }

    /// Stores a downlink upgrade. The admission token is left untouched.
    pub fn grant_downlink(&mut self, token: CapabilityToken) -> Result<(), SimError> {
        self.ensure_live("grant downlink")?;
        let parent = self.token.as_ref().map(|t| t.id);
        if parent.is_none() || token.parent != parent {
            return Err(SimError::entity(format!(
                "downlink {} for {} does not derive from the admission token",
                token.id, self.id
            )));
        }
        self.downlink = Some(token);
        Ok(())
    }

    /// Scope in force at the current holder.
    pub fn effective_scope(&self) -> Option<TokenScope> {
        if self.has_downlink_at_holder() {
            return self.downlink.as_ref().map(|t| t.scope);
        }
        self.token.as_ref().map(|t| t.scope)
    }

    /// Token to present for `holder -> to`: the holder's downlink token when
    /// it covers the hop, otherwise the admission token.
    pub fn token_for(&self, to: NodeId, step: u64) -> Option<&CapabilityToken> {
        if self.has_downlink_at_holder() {
            if let Some(down) = self.downlink.as_ref() {
                if down.authorizes(self.holder, to, step) {
                    return Some(down);
                }
            }
        }
        self.token.as_ref()
    }

    /// Puts a packet in flight.
    pub fn dispatch(&mut self, packet: Packet) -> Result<(), SimError> {
        self.ensure_live("dispatch")?;
        if self.in_flight.is_some() {
            return Err(SimError::entity(format!("{} already has a packet in flight", self.id)));
        }
        if packet.task != self.id || packet.src != self.holder {
            return Err(SimError::entity(format!(
                "{} does not belong to {} at {}",
                packet.id, self.id, self.holder
            )));
        }

        self.injected_at.get_or_insert(packet.injected_at);
        self.attempts += 1;
        self.counters.packets_injected += 1;
        if packet.dst.is_satellite() {
            self.counters.isl_packets += 1;
        }
        if self.status == TaskStatus::Admitted {
            self.status = TaskStatus::Forwarding;
        }
        self.in_flight = Some(packet);
        Ok(())
    }

    /// Takes the in-flight packet if it has arrived by `step`.
    pub fn take_arrived(&mut self, step: u64) -> Option<Packet> {
        match &self.in_flight {
            Some(p) if p.arrives_at <= step => self.in_flight.take(),
            _ => None,
        }
    }

    /// Records a packet lost in transit.
    pub fn record_drop(&mut self, packet: &mut Packet) {
        packet.outcome = PacketOutcome::Dropped;
        self.counters.packets_dropped += 1;
    }

    /// Builds the descriptor handed to the verifier, with any tamper applied.
    pub fn descriptor(&self, packet: &Packet) -> PacketDescriptor {
        let mut digest = self.digest;
        if let HopFate::Delivered { tamper: Some(byte) } = packet.fate {
            crate::delivery::tamper_digest(&mut digest, byte);
        }
        PacketDescriptor {
            id: packet.id,
            task: self.id,
            src: packet.src,
            dst: packet.dst,
            step: packet.arrives_at,
            payload_ref: self.payload_ref,
            payload: self.payload.clone(),
            digest,
            token: packet.token.clone(),
        }
    }

    /// Applies the receipt for a delivered packet.
    ///
    /// An `ok` receipt at a satellite moves the holder; at a ground station
    /// on or before the deadline it completes the task. A `bad` receipt
    /// leaves the holder in place for a retry.
    pub fn record_receipt(&mut self, packet: &mut Packet, receipt: Receipt) -> Result<(), SimError> {
        self.ensure_live("accept a receipt")?;
        if receipt.packet != packet.id {
            return Err(SimError::entity(format!(
                "receipt for {} applied to {}",
                receipt.packet, packet.id
            )));
        }

        packet.outcome = PacketOutcome::Delivered;
        self.counters.packets_delivered += 1;
        if packet.fate.is_tampered() {
            self.counters.tampered += 1;
        }
        if packet.dst.is_ground() {
            self.reached_ground = true;
        }

        match receipt.verdict {
            Verdict::Ok => {
                self.counters.receipts_ok += 1;
                if packet.dst.is_ground() {
                    if packet.arrives_at <= self.deadline {
                        self.complete(packet.arrives_at)?;
                    }
                } else {
                    self.holder = packet.dst;
                    self.hops += 1;
                }
            }
            Verdict::Bad => {
                self.counters.receipts_bad += 1;
                self.status = TaskStatus::DeliveredVerifiedBad;
            }
        }

        packet.receipt = Some(receipt);
        Ok(())
    }

    fn complete(&mut self, step: u64) -> Result<(), SimError> {
        if self.first_success_at.is_some() {
            return Err(SimError::entity(format!("{} completed twice", self.id)));
        }
        self.first_success_at = Some(step);
        self.hops += 1;
        self.status = TaskStatus::DeliveredVerifiedOk;
        Ok(())
    }

    /// Moves the task to `Expired`. Returns the packet that was still in
    /// flight, marked expired.
    pub fn expire(&mut self) -> Result<Option<Packet>, SimError> {
        self.ensure_live("expire")?;
        self.status = TaskStatus::Expired;
        Ok(self.in_flight.take().map(|mut p| {
            p.outcome = PacketOutcome::Expired;
            p
        }))
    }

    /// Task-level verdict: `ok` when completed, otherwise `bad` if any bad
    /// receipt arrived, otherwise `ok` if any hop verified.
    pub fn verdict(&self) -> Option<Verdict> {
        if self.first_success_at.is_some() {
            Some(Verdict::Ok)
        } else if self.counters.receipts_bad > 0 {
            Some(Verdict::Bad)
        } else if self.counters.receipts_ok > 0 {
            Some(Verdict::Ok)
        } else {
            None
        }
    }

    pub fn outcome(&self) -> OutcomeRecord {
        OutcomeRecord {
            task: self.id,
            origin: self.origin,
            mode: self.mode,
            created_at: self.created_at,
            injected_at: self.injected_at,
            deadline: self.deadline,
            admitted_at: self.admitted_at,
            first_success_at: self.first_success_at,
            completed: self.status == TaskStatus::DeliveredVerifiedOk,
            verified: self.verdict(),
            delivered: self.reached_ground,
            status: self.status,
            counters: self.counters,
            hops: self.hops,
        }
    }
}

/// Final (or last known) state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task: TaskId,
    pub origin: NodeId,
    pub mode: TaskingMode,
    pub created_at: u64,
    pub injected_at: Option<u64>,
    pub deadline: u64,
    pub admitted_at: Option<u64>,
    pub first_success_at: Option<u64>,
    pub completed: bool,
    pub verified: Option<Verdict>,

    /// A packet reached a ground station
    pub delivered: bool,

    pub status: TaskStatus,

    #[serde(flatten)]
    pub counters: TaskCounters,

    pub hops: u32,
}

impl OutcomeRecord {
    /// Steps from creation to the first ok delivery.
    pub fn ttfs(&self) -> Option<u64> {
        self.first_success_at.map(|t| t - self.created_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Admission was deferred to a later step.
    pub fn waited_for_admission(&self) -> bool {
        matches!(self.admitted_at, Some(t) if t > self.created_at)
    }
}
