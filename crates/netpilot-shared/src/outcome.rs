//! Router response returned to the CLI for every turn.

use crate::approval::ApprovalRequest;
use crate::diagnosis::DiagnosticConclusion;
use crate::error::{EXIT_REJECTED, EXIT_SUCCESS};
use crate::plan::ExecutionPlan;
use crate::query::Strategy;
use crate::report::BatchReport;
use crate::tool::ToolOutput;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Answered,
    AwaitingApproval,
    /// Operator rejected (or the request timed out); nothing was changed
    Aborted,
    /// The router needs a narrower question
    Clarification,
    /// Diagnosis hit a limit, or lacked the data to reach a verdict
    Incomplete,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Answered => "answered",
            OutcomeStatus::AwaitingApproval => "awaiting_approval",
            OutcomeStatus::Aborted => "aborted",
            OutcomeStatus::Clarification => "clarification",
            OutcomeStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub strategy: Strategy,
    pub confidence: f64,
    /// Classification fell below the floor or failed
    #[serde(default)]
    pub low_confidence: bool,
    /// Classification was skipped because episodic memory matched
    #[serde(default)]
    pub memory_hit: bool,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<ApprovalRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<DiagnosticConclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

impl Outcome {
    pub fn new(status: OutcomeStatus, strategy: Strategy, confidence: f64, answer: impl Into<String>) -> Self {
        Self {
            status,
            strategy,
            confidence,
            low_confidence: false,
            memory_hit: false,
            answer: answer.into(),
            session_id: None,
            plan: None,
            output: None,
            pending_approval: None,
            conclusion: None,
            report: None,
        }
    }

    pub fn answered(strategy: Strategy, confidence: f64, answer: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Answered, strategy, confidence, answer)
    }

    pub fn clarification(confidence: f64, question: impl Into<String>) -> Self {
        let mut outcome = Self::new(OutcomeStatus::Clarification, Strategy::Fast, confidence, question);
        outcome.low_confidence = true;
        outcome
    }

    pub fn aborted(strategy: Strategy, reason: &str) -> Self {
        Self::new(
            OutcomeStatus::Aborted,
            strategy,
            0.0,
            format!("Aborted by operator: {}", reason),
        )
    }

    pub fn awaiting(strategy: Strategy, confidence: f64, request: ApprovalRequest) -> Self {
        let mut outcome = Self::new(OutcomeStatus::AwaitingApproval, strategy, confidence, request.prompt());
        outcome.session_id = Some(request.session_id.clone());
        outcome.plan = Some(request.plan.clone());
        outcome.pending_approval = Some(request);
        outcome
    }

    pub fn with_low_confidence(mut self, low: bool) -> Self {
        self.low_confidence = self.low_confidence || low;
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// CLI exit code for a completed turn
    pub fn exit_code(&self) -> i32 {
        match self.status {
            OutcomeStatus::Aborted => EXIT_REJECTED,
            _ => EXIT_SUCCESS,
        }
    }
}
