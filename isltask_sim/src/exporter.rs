//! JSON exporters for run artifacts.
//!
//! Writes the per-event trace and per-task outcomes as line-delimited JSON,
//! and a compact summary row per run for tables and sweeps.

use isltask_core::{OutcomeRecord, RunReport, RunStatus, SimConfig, SimError, TraceRecord, TraceSink};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Trace sink writing one JSON object per line.
pub struct JsonlTrace<W: Write> {
    writer: W,
    lines: u64,
}

impl JsonlTrace<BufWriter<File>> {
    /// Creates (or truncates) a trace file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| SimError::Trace(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonlTrace<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for JsonlTrace<W> {
    fn record(&mut self, record: &TraceRecord) -> Result<(), SimError> {
        write_line(&mut self.writer, record)?;
        self.lines += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimError> {
        self.writer.flush().map_err(|e| SimError::Trace(e.to_string()))
    }
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), SimError> {
    serde_json::to_writer(&mut *writer, value).map_err(|e| SimError::Trace(e.to_string()))?;
    writer
        .write_all(b"\n")
        .map_err(|e| SimError::Trace(e.to_string()))
}

/// Writes one outcome record per line.
pub fn write_outcomes<W: Write>(mut writer: W, outcomes: &[OutcomeRecord]) -> Result<(), SimError> {
    for outcome in outcomes {
        write_line(&mut writer, outcome)?;
    }
    writer.flush().map_err(|e| SimError::Trace(e.to_string()))
}

/// Writes outcomes to a JSONL file.
pub fn write_outcomes_file<P: AsRef<Path>>(path: P, outcomes: &[OutcomeRecord]) -> Result<(), SimError> {
    let path = path.as_ref();
    let file =
        File::create(path).map_err(|e| SimError::Trace(format!("{}: {}", path.display(), e)))?;
    write_outcomes(BufWriter::new(file), outcomes)
}

/// One row of a comparison or sweep table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    pub mode: String,
    pub backend: String,
    pub seed: u64,

    pub p_outage: f64,
    pub p_congestion: f64,
    pub p_attack: f64,

    pub tasks: u64,
    pub completed: u64,
    pub expired: u64,
    pub unresolved: u64,

    pub avail: Option<f64>,
    pub verified: Option<f64>,
    pub reach: Option<f64>,
    pub deadline_miss: Option<f64>,

    /// TTFS in steps
    pub ttfs_p50: Option<u64>,
    pub ttfs_p90: Option<u64>,
    pub ttfs_p99: Option<u64>,

    /// TTFS p90 in simulated seconds
    pub ttfs_p90_secs: Option<f64>,

    pub blocked_waiting_ground: u64,
    pub status: RunStatus,
}

impl SummaryRow {
    pub fn from_report(config: &SimConfig, report: &RunReport, scenario: Option<&str>) -> Self {
        let m = &report.metrics;
        Self {
            scenario: scenario.map(str::to_string),
            mode: report.mode.label().to_string(),
            backend: report.backend.clone(),
            seed: config.seed,
            p_outage: config.loss.p_outage,
            p_congestion: config.loss.p_congestion,
            p_attack: config.loss.p_attack,
            tasks: m.tasks,
            completed: m.completed,
            expired: m.expired,
            unresolved: m.unresolved,
            avail: m.avail.value(),
            verified: m.verified.value(),
            reach: m.reach.value(),
            deadline_miss: m.deadline_miss.value(),
            ttfs_p50: m.ttfs.p50,
            ttfs_p90: m.ttfs.p90,
            ttfs_p99: m.ttfs.p99,
            ttfs_p90_secs: m.ttfs.p90.map(|s| config.steps_to_secs(s as f64)),
            blocked_waiting_ground: m.blocked_waiting_ground,
            status: report.status.clone(),
        }
    }

    /// Fixed-width line for terminal output.
    pub fn to_table_line(&self) -> String {
        fn ratio(v: Option<f64>) -> String {
            v.map(|x| format!("{:.3}", x)).unwrap_or_else(|| "n/a".to_string())
        }
        fn steps(v: Option<u64>) -> String {
            v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
        }
        format!(
            "{:<7} out={:<4} cong={:<4} atk={:<4} avail={:<6} verified={:<6} reach={:<6} ttfs p50/p90/p99={}/{}/{}",
            self.mode,
            self.p_outage,
            self.p_congestion,
            self.p_attack,
            ratio(self.avail),
            ratio(self.verified),
            ratio(self.reach),
            steps(self.ttfs_p50),
            steps(self.ttfs_p90),
            steps(self.ttfs_p99),
        )
    }
}

/// Writes a value as pretty JSON.
pub fn write_json_file<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), SimError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(value).map_err(|e| SimError::Trace(e.to_string()))?;
    let mut file =
        File::create(path).map_err(|e| SimError::Trace(format!("{}: {}", path.display(), e)))?;
    file.write_all(json.as_bytes())
        .map_err(|e| SimError::Trace(e.to_string()))
}
