//! Time-stepped simulation engine.
//!
//! Each step:
//! 1. advance the topology and capture its links (an unavailable topology
//!    yields an all-down snapshot)
//! 2. inject the step's arrivals
//! 3. run the protocol for every live task, in ascending task id
//! 4. move tasks that reached a terminal state into the outcome log
//!
//! Nothing inside the loop panics or propagates a backend or topology
//! failure. Only a failing trace sink or a broken lifecycle rule halts the
//! run, and the outcomes gathered so far are still returned.

use crate::arrival::ArrivalStream;
use crate::config::SimConfig;
use crate::delivery::DeliveryModel;
use crate::entity::{OutcomeRecord, Packet, PacketOutcome, Task, TaskStatus};
use crate::error::SimError;
use crate::metrics::RunMetrics;
use crate::protocol::{HopDecision, TaskingMode, TaskingProtocol};
use crate::routing::LinkSnapshot;
use crate::trace::{TraceEvent, TraceRecord, TraceSink};
use isltask_env::{
    CapabilityToken, EnvError, NodeId, PacketDescriptor, PacketId, Receipt, SecurityBackend,
    TaskId, TokenId, TokenRequest, TopologyProvider, Verdict,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Halted { at_step: u64, reason: String },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Stops a run between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-wide counters that do not belong to any one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub tokens_issued: u64,
    pub downlink_upgrades: u64,
    pub backend_failures: u64,
    pub topology_outages: u64,

    /// Dispatches refused because the hop left the token's scope
    pub scope_violations: u64,
}

/// Everything a finished (or halted) run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: TaskingMode,
    pub backend: String,
    pub status: RunStatus,
    pub steps_run: u64,
    pub counters: RunCounters,
    pub metrics: RunMetrics,
    pub outcomes: Vec<OutcomeRecord>,
}

/// The simulation engine.
///
/// Owns its topology, backend, trace sink, random streams and tasks; two
/// engines never share state.
pub struct Engine<T, B, S>
where
    T: TopologyProvider,
    B: SecurityBackend,
    S: TraceSink,
{
    config: SimConfig,
    protocol: TaskingProtocol,
    topology: T,
    backend: B,
    trace: S,
    arrivals: ArrivalStream,
    delivery: DeliveryModel,
    satellites: Vec<NodeId>,

    tasks: BTreeMap<TaskId, Task>,
    outcomes: Vec<OutcomeRecord>,
    counters: RunCounters,

    step: u64,
    next_task: u64,
    next_packet: u64,
    next_token: u64,
    cancel: CancelHandle,
}

impl<T, B, S> Engine<T, B, S>
where
    T: TopologyProvider,
    B: SecurityBackend,
    S: TraceSink,
{
    /// Validates the configuration and wires the collaborators together.
    pub fn new(config: SimConfig, topology: T, backend: B, trace: S) -> Result<Self, SimError> {
        config.validate()?;

        let partition = topology.partition();
        if partition.satellites.is_empty() {
            return Err(SimError::config("topology", "no satellite nodes"));
        }
        if partition.ground.is_empty() {
            return Err(SimError::config("topology", "no ground nodes"));
        }
        let satellites = partition.satellites.clone();

        let protocol = TaskingProtocol::new(
            config.mode,
            config.ground_contact_interval,
            config.max_hops,
            config.hop_latency_steps,
        );
        let arrivals = ArrivalStream::new(config.arrival, config.arrival_seed())?;
        let delivery = DeliveryModel::new(config.loss, config.trial_seed())?;

        Ok(Self {
            config,
            protocol,
            topology,
            backend,
            trace,
            arrivals,
            delivery,
            satellites,
            tasks: BTreeMap::new(),
            outcomes: Vec::new(),
            counters: RunCounters::default(),
            step: 0,
            next_task: 1,
            next_packet: 1,
            next_token: 1,
            cancel: CancelHandle::default(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn live_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn outcomes(&self) -> &[OutcomeRecord] {
        &self.outcomes
    }

    pub fn trace_sink(&self) -> &S {
        &self.trace
    }

    pub fn into_trace_sink(self) -> S {
        self.trace
    }

    /// Handle that stops the run before the next step.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs until the configured step count, cancellation, or a halt.
    pub fn run(&mut self) -> RunReport {
        info!(
            mode = %self.config.mode,
            backend = self.backend.name(),
            steps = self.config.steps,
            seed = self.config.seed,
            "Starting run"
        );

        let mut status = RunStatus::Completed;
        while self.step < self.config.steps {
            if self.cancel.is_cancelled() {
                info!(step = self.step, "Run cancelled");
                status = RunStatus::Halted {
                    at_step: self.step,
                    reason: "cancelled".to_string(),
                };
                break;
            }
            if let Err(e) = self.step_once() {
                error!(step = self.step, error = %e, "Run halted");
                status = RunStatus::Halted {
                    at_step: self.step,
                    reason: e.to_string(),
                };
                break;
            }
        }

        if let Err(e) = self.trace.flush() {
            error!(error = %e, "Trace flush failed");
            if status.is_completed() {
                status = RunStatus::Halted {
                    at_step: self.step,
                    reason: e.to_string(),
                };
            }
        }

        self.finish(status)
    }

    /// Executes one step.
    pub fn step_once(&mut self) -> Result<(), SimError> {
        let step = self.step;
        let snapshot = self.capture(step)?;
        self.inject_arrivals(step)?;

        let ids: Vec<TaskId> = self.tasks.keys().copied().collect();
        for id in ids {
            let Some(mut task) = self.tasks.remove(&id) else {
                continue;
            };
            let result = self.process_task(&mut task, &snapshot, step);
            if task.is_terminal() {
                self.outcomes.push(task.outcome());
            } else {
                self.tasks.insert(id, task);
            }
            result?;
        }

        self.step += 1;
        Ok(())
    }

    fn finish(&mut self, status: RunStatus) -> RunReport {
        let live = std::mem::take(&mut self.tasks);
        self.outcomes.extend(live.values().map(Task::outcome));

        let metrics = RunMetrics::from_records(&self.outcomes);
        info!(
            mode = %self.config.mode,
            tasks = metrics.tasks,
            completed = metrics.completed,
            expired = metrics.expired,
            unresolved = metrics.unresolved,
            "Run finished"
        );

        RunReport {
            mode: self.config.mode,
            backend: self.backend.name().to_string(),
            status,
            steps_run: self.step,
            counters: self.counters,
            metrics,
            outcomes: self.outcomes.clone(),
        }
    }

    // =========================================================================
    // STEP PHASES
    // =========================================================================

    fn capture(&mut self, step: u64) -> Result<LinkSnapshot, SimError> {
        let now = self.topology.now();
        let advanced = if step > now {
            self.topology.advance(step - now)
        } else {
            Ok(())
        };

        match advanced.and_then(|_| LinkSnapshot::capture(&self.topology, step)) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                let err = SimError::from(e);
                warn!(step, error = %err, "Topology unavailable, treating all links as down");
                self.counters.topology_outages += 1;
                self.emit(
                    TraceRecord::run(step, TraceEvent::TopologyUnavailable, "all_links_down")
                        .with_detail(err.to_string()),
                )?;
                Ok(LinkSnapshot::empty(step, self.topology.partition()))
            }
        }
    }

    fn inject_arrivals(&mut self, step: u64) -> Result<(), SimError> {
        for arrival in self.arrivals.arrivals(step, &self.satellites) {
            let id = TaskId(self.next_task);
            self.next_task += 1;

            let task = Task::new(
                id,
                arrival.origin,
                self.config.mode,
                step,
                self.config.task_ttl_steps,
                arrival.payload_ref,
            );
            debug!(step, task = %id, origin = %arrival.origin, deadline = task.deadline, "Task created");

            let mut record = TraceRecord::task(step, id, TraceEvent::TaskCreated, "created");
            record.src = Some(arrival.origin);
            self.emit(record)?;
            self.tasks.insert(id, task);
        }
        Ok(())
    }

    fn process_task(
        &mut self,
        task: &mut Task,
        snapshot: &LinkSnapshot,
        step: u64,
    ) -> Result<(), SimError> {
        if let Some(mut packet) = task.take_arrived(step) {
            self.resolve(task, &mut packet, step)?;
            if task.is_terminal() {
                return Ok(());
            }
        }

        if task.is_expired_at(step) {
            return self.expire(task, step);
        }

        if task.status() == TaskStatus::Created {
            if !self.protocol.is_admission_step(step) {
                return Ok(());
            }
            if !self.admit(task, step)? {
                return Ok(());
            }
        }

        if task.in_flight().is_some() {
            return Ok(());
        }

        let token_id = TokenId(self.next_token);
        if let Some(request) = self.protocol.downlink_request(task, snapshot, token_id, step) {
            self.next_token += 1;
            match self
                .call_backend(|b| b.issue_token(&request))
                .and_then(|token| check_token(&request, token))
            {
                Ok(token) => {
                    self.counters.downlink_upgrades += 1;
                    let mut record =
                        TraceRecord::task(step, task.id, TraceEvent::TokenUpgraded, token.scope.name())
                            .with_detail(format!("{} parent={}", token.id, admission_id(task)));
                    record.src = Some(task.holder());
                    task.grant_downlink(token)?;
                    self.emit(record)?;
                }
                Err(e) => self.backend_unavailable(step, task.id, None, "issue_token", e)?,
            }
        }

        match self.protocol.decide(task, snapshot, step) {
            HopDecision::Forward { to, token } => self.dispatch(task, to, token, step),
            HopDecision::Stall(_) => Ok(()),
            HopDecision::ScopeViolation { to, scope } => {
                self.counters.scope_violations += 1;
                warn!(step, task = %task.id, from = %task.holder(), to = %to, scope = scope.name(), "Scope violation refused");
                self.emit(
                    TraceRecord::task(step, task.id, TraceEvent::ScopeViolation, "refused")
                        .with_hop(task.holder(), to)
                        .with_detail(scope.name()),
                )
            }
        }
    }

    /// Requests the admission token. Returns false if the backend failed.
    fn admit(&mut self, task: &mut Task, step: u64) -> Result<bool, SimError> {
        let request = self.protocol.admission_request(task, TokenId(self.next_token), step);
        self.next_token += 1;

        match self
            .call_backend(|b| b.issue_token(&request))
            .and_then(|token| check_token(&request, token))
        {
            Ok(token) => {
                self.counters.tokens_issued += 1;
                let record = TraceRecord::task(step, task.id, TraceEvent::TokenIssued, token.scope.name())
                    .with_detail(format!("{} expiry={}", token.id, token.expiry));
                task.admit(token, step)?;
                self.emit(record)?;
                Ok(true)
            }
            Err(e) => {
                self.backend_unavailable(step, task.id, None, "issue_token", e)?;
                Ok(false)
            }
        }
    }

    fn dispatch(
        &mut self,
        task: &mut Task,
        to: NodeId,
        token: CapabilityToken,
        step: u64,
    ) -> Result<(), SimError> {
        let id = PacketId(self.next_packet);
        self.next_packet += 1;

        let scope = token.scope.name();
        let packet = Packet {
            id,
            task: task.id,
            src: task.holder(),
            dst: to,
            injected_at: step,
            arrives_at: step.saturating_add(self.protocol.hop_latency()),
            token: Some(token),
            fate: self.delivery.trial(task.id, task.attempts()),
            receipt: None,
            outcome: PacketOutcome::InFlight,
        };
        let record = TraceRecord::task(step, task.id, TraceEvent::PacketInjected, "in_flight")
            .with_packet(id)
            .with_hop(packet.src, packet.dst)
            .with_detail(scope);

        task.dispatch(packet)?;
        self.emit(record)
    }

    fn resolve(&mut self, task: &mut Task, packet: &mut Packet, step: u64) -> Result<(), SimError> {
        if packet.fate.is_dropped() {
            task.record_drop(packet);
            debug!(step, task = %task.id, packet = %packet.id, cause = packet.fate.label(), "Packet dropped");
            return self.emit(
                TraceRecord::task(step, task.id, TraceEvent::PacketDropped, packet.fate.label())
                    .with_packet(packet.id)
                    .with_hop(packet.src, packet.dst),
            );
        }

        self.emit(
            TraceRecord::task(step, task.id, TraceEvent::PacketDelivered, packet.fate.label())
                .with_packet(packet.id)
                .with_hop(packet.src, packet.dst),
        )?;

        let descriptor = task.descriptor(packet);
        let receipt = match self
            .call_backend(|b| b.verify(&descriptor))
            .and_then(|receipt| check_receipt(&descriptor, receipt))
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.backend_unavailable(step, task.id, Some(packet.id), "verify", e)?;
                Receipt::rejected(&descriptor, "backend_unavailable")
            }
        };

        let mut record = TraceRecord::task(
            step,
            task.id,
            TraceEvent::ReceiptVerified,
            match receipt.verdict {
                Verdict::Ok => "ok",
                Verdict::Bad => "bad",
            },
        )
        .with_packet(packet.id)
        .with_hop(packet.src, packet.dst);
        record.detail = receipt.reason.clone();

        task.record_receipt(packet, receipt)?;
        self.emit(record)?;

        if let Some(done) = task.first_success_at().filter(|_| task.is_terminal()) {
            let ttfs = done - task.created_at;
            debug!(step, task = %task.id, ttfs, hops = task.hops(), "Task completed");
            self.emit(
                TraceRecord::task(step, task.id, TraceEvent::TaskCompleted, "ok")
                    .with_detail(format!("ttfs={}", ttfs)),
            )?;
        }
        Ok(())
    }

    fn expire(&mut self, task: &mut Task, step: u64) -> Result<(), SimError> {
        if let Some(stranded) = task.expire()? {
            self.emit(
                TraceRecord::task(step, task.id, TraceEvent::PacketExpired, "expired")
                    .with_packet(stranded.id)
                    .with_hop(stranded.src, stranded.dst),
            )?;
        }

        let verdict = match task.verdict() {
            Some(Verdict::Ok) => "ok",
            Some(Verdict::Bad) => "bad",
            None => "none",
        };
        debug!(step, task = %task.id, verdict, "Task expired");
        self.emit(TraceRecord::task(step, task.id, TraceEvent::TaskExpired, "expired").with_detail(verdict))
    }

    // =========================================================================
    // COLLABORATOR PLUMBING
    // =========================================================================

    /// Calls the backend, retrying up to `backend_retries` extra times.
    fn call_backend<R>(
        &mut self,
        mut call: impl FnMut(&mut B) -> Result<R, EnvError>,
    ) -> Result<R, EnvError> {
        let mut attempt = 0;
        loop {
            match call(&mut self.backend) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.backend_retries => {
                    debug!(attempt, error = %e, "Backend call failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backend_unavailable(
        &mut self,
        step: u64,
        task: TaskId,
        packet: Option<PacketId>,
        call: &str,
        err: EnvError,
    ) -> Result<(), SimError> {
        self.counters.backend_failures += 1;
        let err = SimError::from(err);
        warn!(step, task = %task, call, error = %err, "Security backend unavailable");

        let mut record = TraceRecord::task(step, task, TraceEvent::BackendUnavailable, call)
            .with_detail(err.to_string());
        record.packet = packet;
        self.emit(record)
    }

    fn emit(&mut self, record: TraceRecord) -> Result<(), SimError> {
        self.trace.record(&record)
    }
}

/// Rejects a token that does not answer `request`.
fn check_token(request: &TokenRequest, token: CapabilityToken) -> Result<CapabilityToken, EnvError> {
    if token.id != request.token_id || token.subject != request.task || token.parent != request.parent {
        return Err(EnvError::backend(format!(
            "issued {} for {} (parent {:?}), asked for {} for {} (parent {:?})",
            token.id, token.subject, token.parent, request.token_id, request.task, request.parent
        )));
    }
    Ok(token)
}

/// Rejects a receipt that names another packet.
fn check_receipt(descriptor: &PacketDescriptor, receipt: Receipt) -> Result<Receipt, EnvError> {
    if receipt.packet != descriptor.id {
        return Err(EnvError::backend(format!(
            "receipt for {} returned for {}",
            receipt.packet, descriptor.id
        )));
    }
    Ok(receipt)
}

fn admission_id(task: &Task) -> String {
    task.token()
        .map(|t| t.id.to_string())
        .unwrap_or_else(|| "none".to_string())
}
