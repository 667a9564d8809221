//! Admission and forwarding policy.
//!
//! One protocol, parameterized by [`TaskingMode`]:
//!
//! | Mode           | Admission                    | Admission scope    |
//! |----------------|------------------------------|--------------------|
//! | `GroundGated`  | ground-contact steps only    | `Unrestricted`     |
//! | `IslForwarded` | at arrival                   | `InterSatellite`   |
//!
//! In ISL mode a satellite that can see a ground station asks for a
//! `Downlink { relay: itself }` token derived from the admission token
//! before it may hand the payload to the ground.

use crate::entity::Task;
use crate::routing::LinkSnapshot;
use isltask_env::{CapabilityToken, NodeId, TokenId, TokenRequest, TokenScope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskingMode {
    /// Dispatch waits for a ground-contact window
    GroundGated,
    /// Dispatch immediately over inter-satellite links
    IslForwarded,
}

impl TaskingMode {
    pub const ALL: [TaskingMode; 2] = [TaskingMode::GroundGated, TaskingMode::IslForwarded];

    pub fn label(&self) -> &'static str {
        match self {
            TaskingMode::GroundGated => "ground",
            TaskingMode::IslForwarded => "isl",
        }
    }
}

impl fmt::Display for TaskingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TaskingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ground" | "ground_gated" | "ground-gated" => Ok(TaskingMode::GroundGated),
            "isl" | "isl_forwarded" | "isl-forwarded" => Ok(TaskingMode::IslForwarded),
            other => Err(format!("unknown tasking mode '{}'", other)),
        }
    }
}

/// Result of a forwarding decision.
#[derive(Debug, Clone, PartialEq)]
pub enum HopDecision {
    /// Send to `to`, presenting `token`
    Forward { to: NodeId, token: CapabilityToken },

    /// No eligible neighbour this step
    Stall(StallReason),

    /// The chosen hop is outside the presented token's scope
    ScopeViolation { to: NodeId, scope: TokenScope },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    NoToken,
    NoRoute,
    HopBudget,
    Deadline,
}

impl StallReason {
    pub fn label(&self) -> &'static str {
        match self {
            StallReason::NoToken => "no_token",
            StallReason::NoRoute => "no_route",
            StallReason::HopBudget => "hop_budget",
            StallReason::Deadline => "deadline",
        }
    }
}

/// Mode-specific admission and scope rules over shared forwarding machinery.
#[derive(Debug, Clone, Copy)]
pub struct TaskingProtocol {
    mode: TaskingMode,
    ground_contact_interval: u64,
    max_hops: u32,
    hop_latency: u64,
}

impl TaskingProtocol {
    pub fn new(mode: TaskingMode, ground_contact_interval: u64, max_hops: u32, hop_latency: u64) -> Self {
        Self {
            mode,
            ground_contact_interval: ground_contact_interval.max(1),
            max_hops,
            hop_latency: hop_latency.max(1),
        }
    }

    pub fn mode(&self) -> TaskingMode {
        self.mode
    }

    pub fn hop_latency(&self) -> u64 {
        self.hop_latency
    }

    /// True if a `Created` task may be admitted at `step`.
    pub fn is_admission_step(&self, step: u64) -> bool {
        match self.mode {
            TaskingMode::GroundGated => step % self.ground_contact_interval == 0,
            TaskingMode::IslForwarded => true,
        }
    }

    pub fn admission_scope(&self) -> TokenScope {
        match self.mode {
            TaskingMode::GroundGated => TokenScope::Unrestricted,
            TaskingMode::IslForwarded => TokenScope::InterSatellite,
        }
    }

    /// Token request for admitting `task` at `step`.
    pub fn admission_request(&self, task: &Task, token_id: TokenId, step: u64) -> TokenRequest {
        TokenRequest {
            token_id,
            task: task.id,
            origin: task.origin,
            scope: self.admission_scope(),
            issued_at: step,
            expiry: task.deadline,
            parent: None,
        }
    }

    /// Downlink upgrade request, if the holder needs one at `step`.
    ///
    /// Only ISL tasks ask, only from a satellite with a live ground link,
    /// and only when the holder does not already own a downlink token.
    pub fn downlink_request(
        &self,
        task: &Task,
        snapshot: &LinkSnapshot,
        token_id: TokenId,
        step: u64,
    ) -> Option<TokenRequest> {
        if self.mode != TaskingMode::IslForwarded {
            return None;
        }
        let admission = task.token()?;
        let holder = task.holder();
        if !holder.is_satellite() || task.has_downlink_at_holder() || !snapshot.has_ground_link(holder) {
            return None;
        }

        Some(TokenRequest {
            token_id,
            task: task.id,
            origin: task.origin,
            scope: TokenScope::Downlink { relay: holder },
            issued_at: step,
            expiry: task.deadline,
            parent: Some(admission.id),
        })
    }

    /// Chooses the next hop for `task` at `step`.
    pub fn decide(&self, task: &Task, snapshot: &LinkSnapshot, step: u64) -> HopDecision {
        let Some(scope) = task.effective_scope() else {
            return HopDecision::Stall(StallReason::NoToken);
        };
        if task.hops() >= self.max_hops {
            return HopDecision::Stall(StallReason::HopBudget);
        }
        if step.saturating_add(self.hop_latency) > task.deadline {
            return HopDecision::Stall(StallReason::Deadline);
        }

        let holder = task.holder();
        let Some(to) = snapshot.next_hop(holder, &scope) else {
            return HopDecision::Stall(StallReason::NoRoute);
        };

        match task.token_for(to, step) {
            Some(token) if token.authorizes(holder, to, step) => HopDecision::Forward {
                to,
                token: token.clone(),
            },
            Some(token) => HopDecision::ScopeViolation {
                to,
                scope: token.scope,
            },
            None => HopDecision::Stall(StallReason::NoToken),
        }
    }
}
