//! Fast executor: one plan, one invocation.
//!
//! Reads run immediately (one retry for idempotent reads on a transient
//! failure). Mutations are parked at the approval gate and only run through
//! [`FastExecutor::apply`] with the gate's token.

use crate::approval::{ApprovalGate, ApprovedPlan};
use crate::registry::ToolRegistry;
use netpilot_shared::{
    ApprovalRequest, ExecutionPlan, NetpilotError, PlanOrigin, Result, ResumeSnapshot, ToolOutput,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What happened to a plan
#[derive(Debug, Clone)]
pub enum FastResult {
    Answered {
        plan: ExecutionPlan,
        output: ToolOutput,
        answer: String,
    },
    /// Mutating plan waiting for an operator decision
    Suspended(ApprovalRequest),
}

pub struct FastExecutor {
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    timeout: Duration,
    preview_records: usize,
}

impl FastExecutor {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ApprovalGate>, timeout: Duration, preview_records: usize) -> Self {
        Self { registry, gate, timeout, preview_records }
    }

    /// Run a plan. Parameters are re-validated against the descriptor.
    pub async fn execute(&self, plan: ExecutionPlan, session_id: &str, query: &str) -> Result<FastResult> {
        let bound = self.registry.bind(&plan.tool, plan.params.clone())?;
        let plan = ExecutionPlan { rationale: plan.rationale, ..bound };

        if plan.is_mutating() {
            let snapshot = ResumeSnapshot {
                origin: PlanOrigin::Fast,
                query: query.to_string(),
                conclusion: None,
            };
            let request = self.gate.request(session_id, plan, snapshot).await?;
            return Ok(FastResult::Suspended(request));
        }

        let output = self.read_with_retry(&plan).await?;
        let answer = self.restate(&output);
        Ok(FastResult::Answered { plan, output, answer })
    }

    async fn read_with_retry(&self, plan: &ExecutionPlan) -> Result<ToolOutput> {
        let descriptor = self.registry.get(&plan.tool)?;
        match self.registry.invoke_read(&plan.tool, &plan.params, self.timeout).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_retryable() && descriptor.retry_allowed() => {
                warn!("{} failed ({}), retrying once", plan.tool, e);
                self.registry.invoke_read(&plan.tool, &plan.params, self.timeout).await
            }
            Err(e) => Err(e),
        }
    }

    /// Issue an approved mutation. Never retried.
    pub async fn apply(&self, approved: ApprovedPlan) -> Result<FastResult> {
        let plan = approved.plan().clone();
        info!("Applying {} (request {})", plan.describe(), approved.request_id());
        let output = self.registry.invoke_approved(&approved, self.timeout).await?;
        let answer = format!("Applied {}. {}", plan.tool, self.restate(&output));
        Ok(FastResult::Answered { plan, output, answer })
    }

    /// Deterministic restatement of tool output
    pub fn restate(&self, output: &ToolOutput) -> String {
        let target = output.target.as_deref().map(|t| format!(" for {}", t)).unwrap_or_default();
        if output.is_empty() {
            return format!("{} returned no records{}.", output.tool, target);
        }
        let mut answer = format!(
            "{} returned {} record(s){}:\n{}",
            output.tool,
            output.records.len(),
            target,
            output.preview(self.preview_records)
        );
        if output.records.len() > self.preview_records {
            answer.push_str(&format!("\n... {} more", output.records.len() - self.preview_records));
        }
        answer
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

impl FastResult {
    pub fn plan(&self) -> &ExecutionPlan {
        match self {
            FastResult::Answered { plan, .. } => plan,
            FastResult::Suspended(request) => &request.plan,
        }
    }
}

/// Error text shown to the operator for a failed read
pub fn describe_failure(error: &NetpilotError) -> String {
    match error {
        NetpilotError::ToolTimeout { tool, timeout_ms } => {
            format!("{} did not answer within {}ms; no data was returned.", tool, timeout_ms)
        }
        other => format!("No answer: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedAdapter;
    use netpilot_shared::tool::{Capability, FieldKind, FieldSpec, RiskLevel};
    use netpilot_shared::{ApprovalDecision, ToolDescriptor, ToolSchema};
    use serde_json::{json, Map, Value};

    fn setup(adapter: &ScriptedAdapter) -> FastExecutor {
        let schema = ToolSchema::new(vec![FieldSpec::required("hostname", FieldKind::String)]);
        let registry = Arc::new(
            ToolRegistry::builder()
                .tool(ToolDescriptor::read("interface_status", "", schema.clone()), Arc::new(adapter.clone()))
                .tool(
                    ToolDescriptor::mutate("interface_shutdown", "", schema, RiskLevel::High),
                    Arc::new(adapter.clone()),
                )
                .build(),
        );
        let gate = Arc::new(ApprovalGate::new(registry.clone(), Duration::from_secs(60)));
        FastExecutor::new(registry, gate, Duration::from_millis(200), 2)
    }

    fn plan(tool: &str, capability: Capability) -> ExecutionPlan {
        let params: Map<String, Value> = json!({"hostname": "R1"}).as_object().cloned().unwrap_or_default();
        ExecutionPlan::new(tool, capability, params)
    }

    #[tokio::test]
    async fn test_read_answers_with_restatement() {
        let adapter = ScriptedAdapter::new();
        adapter.respond("interface_status", None, json!([{"name": "eth0"}, {"name": "eth1"}, {"name": "eth2"}]));
        let fast = setup(&adapter);
        match fast.execute(plan("interface_status", Capability::Read), "s1", "q").await.unwrap() {
            FastResult::Answered { answer, output, .. } => {
                assert_eq!(output.records.len(), 3);
                assert!(answer.starts_with("interface_status returned 3 record(s) for R1"));
                assert!(answer.ends_with("... 1 more"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_retried_once() {
        let adapter = ScriptedAdapter::new();
        adapter
            .respond("interface_status", None, json!([]))
            .fail_once("interface_status", None, "connection reset");
        let fast = setup(&adapter);
        assert!(fast.execute(plan("interface_status", Capability::Read), "s1", "q").await.is_ok());
        assert_eq!(adapter.calls("interface_status"), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces() {
        let adapter = ScriptedAdapter::new();
        adapter.fail("interface_status", None, "unreachable");
        let fast = setup(&adapter);
        let err = fast.execute(plan("interface_status", Capability::Read), "s1", "q").await.unwrap_err();
        assert!(matches!(err, NetpilotError::ToolInvocation { .. }));
        assert_eq!(adapter.calls("interface_status"), 2);
    }

    #[tokio::test]
    async fn test_mutation_suspends_even_if_plan_claims_read() {
        let adapter = ScriptedAdapter::new();
        let fast = setup(&adapter);
        let result = fast.execute(plan("interface_shutdown", Capability::Read), "s1", "q").await.unwrap();
        assert!(matches!(result, FastResult::Suspended(_)));
        assert_eq!(adapter.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_apply_failure_not_retried() {
        let adapter = ScriptedAdapter::new();
        adapter.fail("interface_shutdown", None, "commit failed");
        let fast = setup(&adapter);
        let FastResult::Suspended(request) =
            fast.execute(plan("interface_shutdown", Capability::Mutate), "s1", "q").await.unwrap()
        else {
            panic!("expected suspension");
        };
        fast.gate.resume(&request.id, ApprovalDecision::Approve).await.unwrap();
        let token = fast.gate.claim(&request.id).await.unwrap();
        assert!(fast.apply(token).await.is_err());
        assert_eq!(adapter.calls("interface_shutdown"), 1);
    }
}
