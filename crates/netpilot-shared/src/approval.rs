//! Approval gate data: requests, decisions, resolutions and the audit trail.

use crate::diagnosis::DiagnosticConclusion;
use crate::plan::ExecutionPlan;
use crate::tool::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a mutating plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Operator asked for the change directly
    Fast,
    /// Remediation proposed by a diagnosis
    Remediation,
}

/// Everything needed to continue after a decision, possibly in a new process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeSnapshot {
    pub origin: PlanOrigin,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<DiagnosticConclusion>,
}

/// A suspended mutating invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub plan: ExecutionPlan,
    pub risk: RiskLevel,
    pub snapshot: ResumeSnapshot,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Operator-facing prompt: target, operation, parameters, risk
    pub fn prompt(&self) -> String {
        format!(
            "Approval required [{}]\n  target:     {}\n  operation:  {}\n  parameters: {}\n  risk:       {}",
            self.id,
            self.target.as_deref().unwrap_or("-"),
            self.plan.tool,
            Value::Object(self.plan.params.clone()),
            self.risk
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject {
        #[serde(default)]
        reason: String,
    },
    /// Revised parameters, re-validated before they are applied
    Edit { params: Map<String, Value> },
}

impl ApprovalDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        ApprovalDecision::Reject { reason: reason.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Reject { .. } => "reject",
            ApprovalDecision::Edit { .. } => "edit",
        }
    }

    /// Parse operator input: `approve`, `reject [reason]`, `edit {json}`
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (input, ""),
        };
        match head.to_lowercase().as_str() {
            "approve" | "yes" | "y" => Ok(ApprovalDecision::Approve),
            "reject" | "no" | "n" => Ok(ApprovalDecision::reject(if rest.is_empty() {
                "rejected by operator"
            } else {
                rest
            })),
            "edit" => match serde_json::from_str::<Value>(rest) {
                Ok(Value::Object(params)) => Ok(ApprovalDecision::Edit { params }),
                Ok(_) => Err("edit expects a JSON object of parameters".to_string()),
                Err(e) => Err(format!("edit parameters are not valid JSON: {}", e)),
            },
            other => Err(format!("unknown decision '{}': use approve, reject or edit", other)),
        }
    }
}

/// Final state of a request after resume, timeout or cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// Plan to execute (edited parameters already applied)
    Approved { plan: ExecutionPlan, edited: bool },
    Rejected { reason: String },
    TimedOut,
}

impl Resolution {
    pub fn is_approved(&self) -> bool {
        matches!(self, Resolution::Approved { .. })
    }
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub session_id: String,
    pub tool: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_decisions() {
        assert_eq!(ApprovalDecision::parse("approve").unwrap(), ApprovalDecision::Approve);
        assert_eq!(
            ApprovalDecision::parse("reject   change window closed").unwrap(),
            ApprovalDecision::reject("change window closed")
        );
        match ApprovalDecision::parse(r#"edit {"neighbor": "10.0.0.9"}"#).unwrap() {
            ApprovalDecision::Edit { params } => assert_eq!(params.get("neighbor"), Some(&json!("10.0.0.9"))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(ApprovalDecision::parse("edit [1]").is_err());
        assert!(ApprovalDecision::parse("maybe").is_err());
    }

    #[test]
    fn test_decision_json_roundtrip_shape() {
        let d: ApprovalDecision = serde_json::from_str(r#"{"decision":"reject"}"#).unwrap();
        assert_eq!(d, ApprovalDecision::reject(""));
    }
}
