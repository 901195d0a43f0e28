//! Query and routing decision types.

use crate::error::NetpilotError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operator input for one turn. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Device scope given explicitly by the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            targets: Vec::new(),
            session_id: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Execution strategy picked by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Fast,
    Diagnostic,
    Batch,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fast => "fast",
            Strategy::Diagnostic => "diagnostic",
            Strategy::Batch => "batch",
        }
    }

}

impl std::str::FromStr for Strategy {
    type Err = NetpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "fast_path" | "simple" => Ok(Strategy::Fast),
            "diagnostic" | "deep_path" | "diagnose" => Ok(Strategy::Diagnostic),
            "batch" | "batch_path" | "inspection" => Ok(Strategy::Batch),
            other => Err(NetpilotError::Validation(format!("unknown strategy '{}'", other))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured output of the single classification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub strategy: Strategy,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Classifier failed and the keyword fallback produced this decision
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl RouteDecision {
    pub fn new(strategy: Strategy, confidence: f64) -> Self {
        Self {
            strategy,
            confidence: confidence.clamp(0.0, 1.0),
            tool: None,
            params: Map::new(),
            targets: Vec::new(),
            fallback: false,
            reasoning: None,
        }
    }

    pub fn with_tool(mut self, tool: &str, params: Map<String, Value>) -> Self {
        self.tool = Some(tool.to_string());
        self.params = params;
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}
