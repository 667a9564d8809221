//! Structured per-event trace records.

use crate::error::SimError;
use isltask_env::{NodeId, PacketId, TaskId};
use serde::{Deserialize, Serialize};

/// Kind of traced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    TaskCreated,
    TokenIssued,
    TokenUpgraded,
    PacketInjected,
    PacketDropped,
    PacketDelivered,
    PacketExpired,
    ReceiptVerified,
    BackendUnavailable,
    ScopeViolation,
    TopologyUnavailable,
    TaskCompleted,
    TaskExpired,
}

/// One line of the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub step: u64,

    /// Absent only for run-wide events (topology outages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet: Option<PacketId>,

    pub event: TraceEvent,
    pub outcome: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TraceRecord {
    pub fn task(step: u64, task: TaskId, event: TraceEvent, outcome: impl Into<String>) -> Self {
        Self {
            step,
            task: Some(task),
            packet: None,
            event,
            outcome: outcome.into(),
            src: None,
            dst: None,
            detail: None,
        }
    }

    pub fn run(step: u64, event: TraceEvent, outcome: impl Into<String>) -> Self {
        Self {
            task: None,
            ..Self::task(step, TaskId(0), event, outcome)
        }
    }

    pub fn with_packet(mut self, packet: PacketId) -> Self {
        self.packet = Some(packet);
        self
    }

    pub fn with_hop(mut self, src: NodeId, dst: NodeId) -> Self {
        self.src = Some(src);
        self.dst = Some(dst);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receives trace records as the engine produces them.
///
/// A sink error halts the run; records already written stay valid.
pub trait TraceSink {
    fn record(&mut self, record: &TraceRecord) -> Result<(), SimError>;

    /// Called once after the last step.
    fn flush(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

impl<T: TraceSink + ?Sized> TraceSink for Box<T> {
    fn record(&mut self, record: &TraceRecord) -> Result<(), SimError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), SimError> {
        (**self).flush()
    }
}

impl<T: TraceSink + ?Sized> TraceSink for &mut T {
    fn record(&mut self, record: &TraceRecord) -> Result<(), SimError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), SimError> {
        (**self).flush()
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&mut self, _record: &TraceRecord) -> Result<(), SimError> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryTrace {
    pub records: Vec<TraceRecord>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event: TraceEvent) -> usize {
        self.records.iter().filter(|r| r.event == event).count()
    }

    pub fn events(&self, event: TraceEvent) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter().filter(move |r| r.event == event)
    }
}

impl TraceSink for MemoryTrace {
    fn record(&mut self, record: &TraceRecord) -> Result<(), SimError> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_compactly() {
        let record = TraceRecord::task(3, TaskId(2), TraceEvent::PacketDropped, "outage")
            .with_packet(PacketId(9))
            .with_hop(NodeId::satellite(1), NodeId::ground(0));

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"step":3,"task":2,"packet":9,"event":"packet_dropped","outcome":"outage","src":"sat-1","dst":"ground-0"}"#
        );
    }

    #[test]
    fn test_run_record_has_no_task() {
        let record = TraceRecord::run(5, TraceEvent::TopologyUnavailable, "empty");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("task").is_none());
        assert_eq!(json["event"], "topology_unavailable");
    }

    #[test]
    fn test_memory_trace_counts() {
        let mut sink = MemoryTrace::new();
        sink.record(&TraceRecord::task(0, TaskId(1), TraceEvent::TaskCreated, "created"))
            .unwrap();
        sink.record(&TraceRecord::task(1, TaskId(1), TraceEvent::TaskExpired, "expired"))
            .unwrap();

        assert_eq!(sink.count(TraceEvent::TaskCreated), 1);
        assert_eq!(sink.events(TraceEvent::TaskExpired).count(), 1);
        assert_eq!(sink.count(TraceEvent::PacketInjected), 0);
    }
}
