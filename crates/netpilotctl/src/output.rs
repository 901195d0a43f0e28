//! Terminal rendering. ASCII only; colour only when stdout is a terminal.
//!
//! Every function builds a `String` so the text can be checked in tests
//! and printed by the caller.

use netpilot_core::{HealthReport, HealthState};
use netpilot_shared::{
    ApprovalRequest, BatchReport, ConclusionStatus, DiagnosticConclusion, Outcome, OutcomeStatus, TargetStatus,
};
use owo_colors::OwoColorize;
use std::fmt::Write;
use std::io::IsTerminal;

pub const SEPARATOR: &str = "------------------------------------------------------------";

#[derive(Debug, Clone, Copy)]
pub struct Style {
    color: bool,
}

impl Style {
    pub fn auto() -> Self {
        Self { color: std::io::stdout().is_terminal() }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    fn good(&self, s: &str) -> String {
        if self.color { s.bright_green().to_string() } else { s.to_string() }
    }

    fn warn(&self, s: &str) -> String {
        if self.color { s.yellow().to_string() } else { s.to_string() }
    }

    fn bad(&self, s: &str) -> String {
        if self.color { s.bright_red().to_string() } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.color { s.dimmed().to_string() } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        if self.color { s.bold().to_string() } else { s.to_string() }
    }
}

/// Reliability tag from the same bands the answer text uses
fn reliability(style: Style, confidence: f64) -> String {
    let value = format!("{:.2}", confidence);
    if confidence >= 0.9 {
        format!("{} {}", style.good("[OK]"), style.good(&value))
    } else if confidence >= 0.6 {
        format!("{} {}", style.warn("[PARTIAL]"), style.warn(&value))
    } else {
        format!("{} {}", style.bad("[LOW]"), style.bad(&value))
    }
}

pub fn render_outcome(style: Style, outcome: &Outcome) -> String {
    let mut out = String::new();
    let status = match outcome.status {
        OutcomeStatus::Answered => style.good("[ANSWER]"),
        OutcomeStatus::AwaitingApproval => style.warn("[APPROVAL]"),
        OutcomeStatus::Aborted => style.bad("[ABORTED]"),
        OutcomeStatus::Clarification => style.warn("[QUESTION]"),
        OutcomeStatus::Incomplete => style.warn("[INCOMPLETE]"),
    };
    let _ = writeln!(
        out,
        "{}  strategy: {}  reliability: {}",
        status,
        outcome.strategy,
        reliability(style, outcome.confidence)
    );
    if outcome.memory_hit {
        let _ = writeln!(out, "{}", style.dim("(plan reused from memory)"));
    }
    if outcome.low_confidence && outcome.status != OutcomeStatus::Clarification {
        let _ = writeln!(out, "{}", style.warn("[NOTE] low classification confidence"));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", outcome.answer);

    if let Some(conclusion) = &outcome.conclusion {
        let _ = writeln!(out);
        out.push_str(&render_conclusion(style, conclusion));
    }
    if let Some(report) = &outcome.report {
        let _ = writeln!(out);
        out.push_str(&render_report(style, report));
    }
    if let Some(request) = &outcome.pending_approval {
        let _ = writeln!(out);
        out.push_str(&approval_hint(style, request));
    }
    out
}

pub fn render_conclusion(style: Style, conclusion: &DiagnosticConclusion) -> String {
    let mut out = String::new();
    let label = match conclusion.status {
        ConclusionStatus::Confirmed => style.good(conclusion.status.label()),
        ConclusionStatus::Aborted { .. } => style.bad(conclusion.status.label()),
        _ => style.warn(conclusion.status.label()),
    };
    let _ = writeln!(out, "{} {}", style.bold("[DIAGNOSIS]"), label);
    for (i, hypothesis) in conclusion.chain.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}{} ({:.2}) {}",
            "  ".repeat(i),
            hypothesis.layer,
            hypothesis.confidence(),
            hypothesis.claim
        );
        if i > 0 {
            continue;
        }
        for evidence in &hypothesis.evidence {
            let _ = writeln!(out, "      * {}", style.dim(&format!("[{}] {}", evidence.tool, evidence.summary)));
        }
    }
    let _ = writeln!(
        out,
        "  {}",
        style.dim(&format!(
            "iterations: {}  depth: {}",
            conclusion.iterations, conclusion.max_depth_reached
        ))
    );
    out
}

pub fn render_report(style: Style, report: &BatchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", style.bold("[INSPECTION]"), report.name);
    let _ = writeln!(out, "{}", SEPARATOR);
    for result in &report.results {
        let label = match &result.status {
            TargetStatus::Passed => style.good(result.status.label()),
            TargetStatus::Violated | TargetStatus::Failed { .. } => style.bad(result.status.label()),
            _ => style.warn(result.status.label()),
        };
        let _ = writeln!(out, "  {:<10} {:<20} {}", result.target, result.check, label);
        for violation in &result.violations {
            let _ = writeln!(out, "      {} {}", violation.severity, violation.message);
        }
        if let TargetStatus::Failed { error } = &result.status {
            let _ = writeln!(out, "      {}", style.dim(error));
        }
    }
    let _ = writeln!(out, "{}", SEPARATOR);
    if report.stopped_early {
        let _ = writeln!(out, "{}", style.warn("stopped early after a failure"));
    }
    let _ = writeln!(out, "{}", report.summary);
    out
}

pub fn approval_hint(style: Style, request: &ApprovalRequest) -> String {
    format!(
        "{}\n  netpilotctl approve {}            apply\n  netpilotctl approve {} --reject why\n  netpilotctl approve {} --edit '{{...}}'\n  expires: {}\n",
        style.warn("Nothing has been changed. Decide with:"),
        request.session_id,
        request.session_id,
        request.session_id,
        request.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn render_pending(style: Style, pending: &[ApprovalRequest]) -> String {
    if pending.is_empty() {
        return format!("{}\n", style.dim("No pending approvals."));
    }
    let mut out = String::new();
    for request in pending {
        let _ = writeln!(
            out,
            "{}  session {}  {} on {}  risk {}",
            request.id,
            request.session_id,
            request.plan.tool,
            request.target.as_deref().unwrap_or("-"),
            request.risk
        );
    }
    out
}

pub fn render_health(style: Style, report: &HealthReport) -> String {
    let mut out = String::new();
    let state = match report.state {
        HealthState::Healthy => style.good(report.state.as_str()),
        HealthState::Degraded => style.warn(report.state.as_str()),
        HealthState::Broken => style.bad(report.state.as_str()),
    };
    let _ = writeln!(out, "netpilot {}  [{}]", report.version, state);
    let _ = writeln!(out, "{}", SEPARATOR);
    let _ = writeln!(out, "  classifier:   {}", report.classifier);
    let _ = writeln!(out, "  tools:        {} ({} mutating)", report.tools, report.mutating_tools);
    let adapters: Vec<String> = report.adapters.iter().map(|(k, v)| format!("{} {}", v, k)).collect();
    if !adapters.is_empty() {
        let _ = writeln!(out, "  adapters:     {}", adapters.join(", "));
    }
    let layers: Vec<&str> = report.layers.iter().map(|l| l.as_str()).collect();
    let _ = writeln!(out, "  layers:       {}", if layers.is_empty() { "-".to_string() } else { layers.join(", ") });
    let _ = writeln!(out, "  inventory:    {} devices", report.inventory);
    let _ = writeln!(
        out,
        "  memory:       {}/{} records, {} hits, {} misses",
        report.memory.records, report.memory.capacity, report.memory.hits, report.memory.misses
    );
    let _ = writeln!(out, "  sessions:     {} ({} pending approval)", report.sessions, report.pending_approvals);
    if !report.problems.is_empty() {
        let _ = writeln!(out);
        for problem in &report.problems {
            let _ = writeln!(out, "  {} {}", style.warn("[WARN]"), problem);
        }
    }
    out
}
