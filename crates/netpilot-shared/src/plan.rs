//! Execution plans: one bound invocation of one registry tool.

use crate::tool::Capability;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Copied from the descriptor when the plan is bound
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Why this plan exists (remediation text, classifier reasoning)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ExecutionPlan {
    pub fn new(tool: &str, capability: Capability, params: Map<String, Value>) -> Self {
        Self {
            tool: tool.to_string(),
            params,
            capability,
            target: None,
            rationale: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.capability.is_mutating()
    }

    /// Same plan with replaced parameters (operator edit)
    pub fn with_params(&self, params: Map<String, Value>) -> Self {
        Self { params, ..self.clone() }
    }

    /// One-line rendering for approval prompts and logs
    pub fn describe(&self) -> String {
        let params = Value::Object(self.params.clone()).to_string();
        match &self.target {
            Some(t) => format!("{} {} on {}", self.tool, params, t),
            None => format!("{} {}", self.tool, params),
        }
    }
}
