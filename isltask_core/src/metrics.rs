//! Run metrics
//! ===========
//!
//! Aggregates outcome records into:
//! - **avail**: delivered packets / injected packets
//! - **verified**: ok receipts / (ok + bad receipts)
//! - **reach**: completed tasks / terminal tasks
//! - **TTFS**: steps from creation to first ok delivery (mean, p50, p90, p99)
//!
//! Percentiles use the nearest-rank method on the ascending sample:
//! `rank = ceil(p / 100 * n)`, clamped to `1..=n`.

use crate::entity::{OutcomeRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A ratio that keeps its parts, so 0/0 is distinguishable from 0/n.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `None` when the denominator is zero.
    pub fn value(&self) -> Option<f64> {
        (self.denominator > 0).then(|| self.numerator as f64 / self.denominator as f64)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{:.3} ({}/{})", v, self.numerator, self.denominator),
            None => write!(f, "n/a (0/0)"),
        }
    }
}

/// Nearest-rank percentile of an ascending sample.
pub fn nearest_rank(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}

/// TTFS distribution in steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean: Option<f64>,
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p99: Option<u64>,
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        let mean = (!samples.is_empty())
            .then(|| samples.iter().sum::<u64>() as f64 / samples.len() as f64);

        Self {
            samples: samples.len(),
            mean,
            p50: nearest_rank(&samples, 50.0),
            p90: nearest_rank(&samples, 90.0),
            p99: nearest_rank(&samples, 99.0),
        }
    }
}

/// Aggregate metrics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Records seen (terminal and unresolved)
    pub tasks: u64,

    /// Tasks still live when the run stopped; excluded from reach and TTFS
    pub unresolved: u64,

    pub completed: u64,
    pub expired: u64,

    pub avail: Ratio,
    pub verified: Ratio,
    pub reach: Ratio,

    /// Expired / terminal
    pub deadline_miss: Ratio,

    pub ttfs: LatencySummary,

    pub packets_injected: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
    pub packets_tampered: u64,
    pub isl_packets: u64,

    /// Tasks whose admission waited for a ground contact
    pub blocked_waiting_ground: u64,
}

impl RunMetrics {
    pub fn from_records(records: &[OutcomeRecord]) -> Self {
        let mut m = RunMetrics {
            tasks: records.len() as u64,
            ..Default::default()
        };
        let mut receipts_ok = 0u64;
        let mut receipts_bad = 0u64;
        let mut ttfs = Vec::new();

        for r in records {
            let c = &r.counters;
            m.packets_injected += c.packets_injected as u64;
            m.packets_delivered += c.packets_delivered as u64;
            m.packets_dropped += c.packets_dropped as u64;
            m.packets_tampered += c.tampered as u64;
            m.isl_packets += c.isl_packets as u64;
            receipts_ok += c.receipts_ok as u64;
            receipts_bad += c.receipts_bad as u64;

            if r.waited_for_admission() {
                m.blocked_waiting_ground += 1;
            }

            match r.status {
                TaskStatus::DeliveredVerifiedOk => {
                    m.completed += 1;
                    if let Some(t) = r.ttfs() {
                        ttfs.push(t);
                    }
                }
                TaskStatus::Expired => m.expired += 1,
                _ => m.unresolved += 1,
            }
        }

        let terminal = m.completed + m.expired;
        m.avail = Ratio::new(m.packets_delivered, m.packets_injected);
        m.verified = Ratio::new(receipts_ok, receipts_ok + receipts_bad);
        m.reach = Ratio::new(m.completed, terminal);
        m.deadline_miss = Ratio::new(m.expired, terminal);
        m.ttfs = LatencySummary::from_samples(ttfs);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TaskCounters;
    use crate::protocol::TaskingMode;
    use approx::assert_relative_eq;
    use isltask_env::{NodeId, TaskId, Verdict};
    use proptest::prelude::*;

    fn record(id: u64, status: TaskStatus, created: u64, success: Option<u64>) -> OutcomeRecord {
        OutcomeRecord {
            task: TaskId(id),
            origin: NodeId::satellite(0),
            mode: TaskingMode::IslForwarded,
            created_at: created,
            injected_at: Some(created),
            deadline: created + 9,
            admitted_at: Some(created),
            first_success_at: success,
            completed: status == TaskStatus::DeliveredVerifiedOk,
            verified: success.map(|_| Verdict::Ok),
            delivered: success.is_some(),
            status,
            counters: TaskCounters {
                packets_injected: 2,
                packets_delivered: 2,
                receipts_ok: 2,
                isl_packets: 1,
                ..Default::default()
            },
            hops: 2,
        }
    }

    #[test]
    fn test_nearest_rank_known_values() {
        let sample: Vec<u64> = (1..=10).collect();
        assert_eq!(nearest_rank(&sample, 50.0), Some(5));
        assert_eq!(nearest_rank(&sample, 90.0), Some(9));
        assert_eq!(nearest_rank(&sample, 99.0), Some(10));
        assert_eq!(nearest_rank(&sample, 0.0), Some(1));
        assert_eq!(nearest_rank(&[7], 90.0), Some(7));
        assert_eq!(nearest_rank(&[], 90.0), None);
    }

    #[test]
    fn test_ratio_zero_over_zero_has_no_value() {
        assert_eq!(Ratio::new(0, 0).value(), None);
        assert_eq!(Ratio::new(0, 4).value(), Some(0.0));
        assert_eq!(Ratio::new(0, 0).to_string(), "n/a (0/0)");
    }

    #[test]
    fn test_empty_run_reports_no_data() {
        let m = RunMetrics::from_records(&[]);
        assert_eq!(m.reach.value(), None);
        assert_eq!(m.ttfs.mean, None);
        assert_eq!(m.ttfs.p90, None);
    }

    #[test]
    fn test_unresolved_excluded_from_reach() {
        let records = vec![
            record(1, TaskStatus::DeliveredVerifiedOk, 0, Some(2)),
            record(2, TaskStatus::DeliveredVerifiedOk, 1, Some(5)),
            record(3, TaskStatus::Expired, 2, None),
            record(4, TaskStatus::Forwarding, 3, None),
        ];
        let m = RunMetrics::from_records(&records);

        assert_eq!(m.tasks, 4);
        assert_eq!(m.unresolved, 1);
        assert_eq!(m.reach, Ratio::new(2, 3));
        assert_eq!(m.deadline_miss, Ratio::new(1, 3));
        assert_eq!(m.ttfs.samples, 2);
        assert_relative_eq!(m.ttfs.mean.unwrap(), 3.0);
        assert_eq!(m.ttfs.p90, Some(4));
        assert_eq!(m.packets_injected, 8);
        assert_eq!(m.isl_packets, 4);
    }

    #[test]
    fn test_blocked_waiting_ground_counted() {
        let mut r = record(1, TaskStatus::DeliveredVerifiedOk, 1, Some(7));
        r.admitted_at = Some(6);
        let m = RunMetrics::from_records(&[r, record(2, TaskStatus::Expired, 0, None)]);
        assert_eq!(m.blocked_waiting_ground, 1);
    }

    proptest! {
        #[test]
        fn prop_ratios_bounded(
            rows in prop::collection::vec((0u32..5, 0u32..5, 0u32..5, 0u32..3), 0..40)
        ) {
            let records: Vec<OutcomeRecord> = rows
                .iter()
                .enumerate()
                .map(|(i, &(delivered, dropped, bad, kind))| {
                    let status = match kind {
                        0 => TaskStatus::DeliveredVerifiedOk,
                        1 => TaskStatus::Expired,
                        _ => TaskStatus::Created,
                    };
                    let mut r = record(i as u64, status, 0, (kind == 0).then_some(1));
                    r.counters = TaskCounters {
                        packets_injected: delivered + dropped,
                        packets_delivered: delivered,
                        packets_dropped: dropped,
                        receipts_ok: delivered.saturating_sub(bad),
                        receipts_bad: bad.min(delivered),
                        ..Default::default()
                    };
                    r
                })
                .collect();

            let m = RunMetrics::from_records(&records);
            for ratio in [m.avail, m.verified, m.reach, m.deadline_miss] {
                prop_assert!(ratio.numerator <= ratio.denominator);
                if let Some(v) = ratio.value() {
                    prop_assert!((0.0..=1.0).contains(&v));
                }
            }
        }

        #[test]
        fn prop_percentiles_ordered(mut sample in prop::collection::vec(0u64..50, 1..60)) {
            sample.sort_unstable();
            let p50 = nearest_rank(&sample, 50.0).unwrap();
            let p90 = nearest_rank(&sample, 90.0).unwrap();
            let p99 = nearest_rank(&sample, 99.0).unwrap();
            prop_assert!(p50 <= p90 && p90 <= p99);
            prop_assert!(sample.contains(&p90));
        }
    }
}
