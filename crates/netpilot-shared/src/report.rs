//! Batch reports. Every number and sentence here is computed from per-target
//! results; nothing is added that the checks did not produce.

use crate::threshold::{Severity, Violation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    Passed,
    Violated,
    /// Tool answered but a checked field was absent
    NoData { fields: Vec<String> },
    /// Unreachable, tool error or timeout
    Failed { error: String },
    /// Not run because an earlier failure stopped the job
    Skipped,
}

impl TargetStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TargetStatus::Passed => "pass",
            TargetStatus::Violated => "violation",
            TargetStatus::NoData { .. } => "no data",
            TargetStatus::Failed { .. } => "failed",
            TargetStatus::Skipped => "skipped",
        }
    }
}

/// Result of one check on one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: String,
    pub check: String,
    pub status: TargetStatus,
    #[serde(default)]
    pub violations: Vec<Violation>,
    pub records: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<String>,
    pub results: Vec<TargetOutcome>,
    /// Stop-on-failure tripped
    pub stopped_early: bool,
    pub summary: String,
}

impl BatchReport {
    /// Assemble a report; results are ordered by (check, target) so output
    /// does not depend on task completion order.
    pub fn new(
        name: &str,
        started_at: DateTime<Utc>,
        targets: Vec<String>,
        mut results: Vec<TargetOutcome>,
        stopped_early: bool,
    ) -> Self {
        let order: BTreeMap<&str, usize> =
            targets.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
        results.sort_by(|a, b| {
            a.check.cmp(&b.check).then_with(|| {
                let ia = order.get(a.target.as_str()).copied().unwrap_or(usize::MAX);
                let ib = order.get(b.target.as_str()).copied().unwrap_or(usize::MAX);
                ia.cmp(&ib)
            })
        });

        let mut report = Self {
            name: name.to_string(),
            started_at,
            finished_at: Utc::now(),
            targets,
            results,
            stopped_early,
            summary: String::new(),
        };
        report.summary = report.restate();
        report
    }

    fn count(&self, pred: impl Fn(&TargetStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Passed))
    }

    pub fn violated(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Violated))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Failed { .. }))
    }

    pub fn no_data(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::NoData { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TargetStatus::Skipped))
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.results.iter().flat_map(|r| r.violations.iter())
    }

    pub fn violations_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for v in self.violations() {
            *counts.entry(v.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Any target not passing
    pub fn has_findings(&self) -> bool {
        self.passed() != self.results.len()
    }

    /// Plain restatement of the computed counts
    fn restate(&self) -> String {
        let mut parts = vec![format!(
            "{}: {} result(s) over {} target(s): {} passed, {} with violations, {} failed",
            self.name,
            self.results.len(),
            self.targets.len(),
            self.passed(),
            self.violated(),
            self.failed()
        )];
        if self.no_data() > 0 {
            parts.push(format!("{} returned no data for the checked field", self.no_data()));
        }
        if self.skipped() > 0 {
            parts.push(format!("{} skipped after a failure", self.skipped()));
        }
        let by_sev = self.violations_by_severity();
        if !by_sev.is_empty() {
            let sev: Vec<String> = by_sev.iter().rev().map(|(s, n)| format!("{} {}", n, s)).collect();
            parts.push(format!("violations: {}", sev.join(", ")));
        }
        parts.join("; ")
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Inspection report: {}\n\n", self.name));
        out.push_str(&format!(
            "- started: {}\n- finished: {}\n- targets: {}\n",
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339(),
            self.targets.join(", ")
        ));
        if self.stopped_early {
            out.push_str("- stopped early: failure policy is stop_on_failure\n");
        }
        out.push_str(&format!("\n{}\n\n", self.summary));

        out.push_str("| check | target | result | records | detail |\n");
        out.push_str("|---|---|---|---|---|\n");
        for r in &self.results {
            let detail = match &r.status {
                TargetStatus::Failed { error } => error.clone(),
                TargetStatus::NoData { fields } => format!("missing: {}", fields.join(", ")),
                _ => r
                    .violations
                    .iter()
                    .map(|v| v.message.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                r.check,
                r.target,
                r.status.label(),
                r.records,
                detail.replace('|', "\\|")
            ));
        }

        let violations: Vec<&Violation> = self.violations().collect();
        if !violations.is_empty() {
            out.push_str("\n## Violations\n\n");
            for v in violations {
                out.push_str(&format!("- **{}** {}: {}\n", v.severity, v.target, v.message));
            }
        }
        out
    }
}
