//! Persisted conversation state, one JSON document per session id.

use crate::approval::{ApprovalRequest, Resolution};
use crate::diagnosis::DiagnosticConclusion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum turns kept in a session file
pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Operator,
    Netpilot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// A request that has been resolved, kept so replays are no-ops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub request_id: String,
    pub resolution: Resolution,
    /// The mutating invocation was issued
    pub applied: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<ApprovalRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_conclusion: Option<DiagnosticConclusion>,
    #[serde(default)]
    pub resolved: Vec<ResolvedRequest>,
}

impl SessionState {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            pending: None,
            last_conclusion: None,
            resolved: Vec::new(),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.history.push(Turn { speaker, text: text.into(), at: Utc::now() });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.updated_at = Utc::now();
    }

    pub fn resolution_of(&self, request_id: &str) -> Option<&ResolvedRequest> {
        self.resolved.iter().find(|r| r.request_id == request_id)
    }

    /// Record a resolution and clear the matching pending request
    pub fn resolve(&mut self, request_id: &str, resolution: Resolution, applied: bool) {
        if self.pending.as_ref().map(|p| p.id == request_id).unwrap_or(false) {
            self.pending = None;
        }
        if self.resolution_of(request_id).is_none() {
            self.resolved.push(ResolvedRequest {
                request_id: request_id.to_string(),
                resolution,
                applied,
                at: Utc::now(),
            });
        }
        self.updated_at = Utc::now();
    }

    /// Recent turns, oldest first
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}
