//! Result Aggregation & Reporting
//!
//! Folds per-iteration results into one [`AggregatedResult`] per catalog
//! entry and renders them, in catalog order, as text or JSON.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ReportFormat;
use crate::errors::ReportError;
use crate::host::{GroupRun, Outcome, Session, TestResult};
use crate::protocol::{BoardId, Criterion, Schedule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub matched: u32,
    pub mismatched: u32,
    pub timeouts: u32,
    pub routine_errors: u32,
    pub interrupt_errors: u32,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Match => &mut self.matched,
            Outcome::Mismatch => &mut self.mismatched,
            Outcome::Timeout => &mut self.timeouts,
            Outcome::RoutineError => &mut self.routine_errors,
            Outcome::InterruptError => &mut self.interrupt_errors,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u32 {
        self.matched + self.mismatched + self.timeouts + self.routine_errors + self.interrupt_errors
    }

    pub fn failures(&self) -> u32 {
        self.total() - self.matched
    }
}

fn serialize_millis<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => s.serialize_some(&(d.as_secs_f64() * 1000.0)),
        None => s.serialize_none(),
    }
}

/// Counters for one catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub name: String,
    pub group: usize,
    pub criterion: Criterion,
    pub schedule: Schedule,
    pub iterations: u32,
    pub counts: OutcomeCounts,
    /// Mean over matching iterations only; `None` without a single match
    #[serde(rename = "mean_latency_ms", serialize_with = "serialize_millis")]
    pub mean_latency: Option<Duration>,
}

pub fn aggregate(
    name: impl Into<String>,
    group: usize,
    criterion: Criterion,
    schedule: Schedule,
    results: &[TestResult],
) -> AggregatedResult {
    let mut counts = OutcomeCounts::default();
    let mut success_time = Duration::ZERO;
    for result in results {
        counts.record(result.outcome);
        if result.outcome == Outcome::Match {
            success_time += result.elapsed;
        }
    }
    let mean_latency = (counts.matched > 0).then(|| success_time / counts.matched);
    AggregatedResult {
        name: name.into(),
        group,
        criterion,
        schedule,
        iterations: results.len() as u32,
        counts,
        mean_latency,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub index: usize,
    pub schedule: Schedule,
    pub entries: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub board_name: String,
    pub board_id: BoardId,
    pub generated_at: DateTime<Utc>,
    pub groups: Vec<GroupSummary>,
    pub entries: Vec<AggregatedResult>,
}

impl Report {
    /// Build from the runs of every group, which must be in group order.
    pub fn new(session: &Session, runs: &[GroupRun]) -> Self {
        let mut groups = Vec::with_capacity(runs.len());
        let mut entries = Vec::with_capacity(session.catalog.len());
        for run in runs {
            let plan = run.plan;
            groups.push(GroupSummary {
                index: plan.index,
                schedule: plan.schedule,
                entries: plan.len,
                elapsed_ms: run.window.duration().as_millis() as u64,
            });
            for (entry, results) in plan.entries(&session.catalog).iter().zip(&run.results) {
                entries.push(aggregate(
                    entry.display_name(),
                    plan.index,
                    entry.criterion,
                    plan.schedule,
                    results,
                ));
            }
        }
        Self {
            board_name: session.identity.board_name().to_string(),
            board_id: session.board_id(),
            generated_at: Utc::now(),
            groups,
            entries,
        }
    }

    pub fn totals(&self) -> OutcomeCounts {
        let mut totals = OutcomeCounts::default();
        for entry in &self.entries {
            totals.matched += entry.counts.matched;
            totals.mismatched += entry.counts.mismatched;
            totals.timeouts += entry.counts.timeouts;
            totals.routine_errors += entry.counts.routine_errors;
            totals.interrupt_errors += entry.counts.interrupt_errors;
        }
        totals
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("board: {}\n", self.board_name));
        out.push_str(&format!("id: {}\n", self.board_id));
        out.push_str(&format!(
            "generated: {}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        for entry in &self.entries {
            out.push_str(&render_line(entry));
            out.push('\n');
        }
        out
    }

    pub fn render_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => self.render_json(),
        }
    }

    /// `loopcheck_<board>_<id0>-<id1>-<id2>.<ext>`
    pub fn file_name(&self, format: ReportFormat) -> String {
        let board: String = self
            .board_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let [a, b, c] = self.board_id.0;
        format!("loopcheck_{board}_{a}-{b}-{c}.{}", format.extension())
    }

    pub fn write(&self, dir: &Path, format: ReportFormat) -> Result<PathBuf, ReportError> {
        let path = dir.join(self.file_name(format));
        let body = self.render(format)?;
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, body).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn render_line(entry: &AggregatedResult) -> String {
    let n = entry.iterations;
    let latency = match entry.mean_latency {
        Some(d) => format!("{:6.3}ms", d.as_secs_f64() * 1000.0),
        None => "n/a".to_string(),
    };
    format!(
        "test {} data match = {}/{}. average time elapsed = {}. mismatch = {}/{}. \
         over time error = {}/{}. error interrupt = {}/{}. routine error = {}/{}.",
        entry.name,
        entry.counts.matched,
        n,
        latency,
        entry.counts.mismatched,
        n,
        entry.counts.timeouts,
        n,
        entry.counts.interrupt_errors,
        n,
        entry.counts.routine_errors,
        n,
    )
}
