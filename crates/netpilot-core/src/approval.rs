//! Approval gate (human in the loop).
//!
//! Every mutating plan is parked here as an [`ApprovalRequest`] until an
//! operator decides. Approval produces exactly one [`ApprovedPlan`] token,
//! which is the only way to reach a mutating adapter; replaying a decision
//! returns the earlier resolution and no new token.

use crate::registry::ToolRegistry;
use chrono::{Duration as ChronoDuration, Utc};
use netpilot_shared::{
    ApprovalDecision, ApprovalRequest, AuditEntry, ExecutionPlan, NetpilotError, Resolution, Result, ResumeSnapshot,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Authorization to issue one mutating invocation. Only the gate creates it.
#[derive(Debug)]
pub struct ApprovedPlan {
    request_id: String,
    plan: ExecutionPlan,
}

impl ApprovedPlan {
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

/// Result of `resume`
#[derive(Debug, Clone, PartialEq)]
pub struct Resumed {
    pub resolution: Resolution,
    /// The request was already resolved; nothing changed
    pub replay: bool,
}

struct PendingEntry {
    request: ApprovalRequest,
    notify: watch::Sender<bool>,
}

struct ResolvedEntry {
    resolution: Resolution,
    token: Option<ApprovedPlan>,
}

#[derive(Default)]
struct GateState {
    pending: HashMap<String, PendingEntry>,
    resolved: HashMap<String, ResolvedEntry>,
    audit: Vec<AuditEntry>,
}

impl GateState {
    fn record(&mut self, request: &ApprovalRequest, action: &str, detail: Option<String>) {
        info!(
            "Approval {} {} ({} on {}){}",
            request.id,
            action,
            request.plan.tool,
            request.target.as_deref().unwrap_or("-"),
            detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
        );
        self.audit.push(AuditEntry {
            request_id: request.id.clone(),
            session_id: request.session_id.clone(),
            tool: request.plan.tool.clone(),
            action: action.to_string(),
            detail,
            at: Utc::now(),
        });
    }

    /// Move a pending request to resolved and wake waiters
    fn settle(&mut self, request_id: &str, resolution: Resolution) -> Option<Resolution> {
        let entry = self.pending.remove(request_id)?;
        let (action, detail) = match &resolution {
            Resolution::Approved { edited: true, plan } => ("approved_with_edit", Some(plan.describe())),
            Resolution::Approved { .. } => ("approved", None),
            Resolution::Rejected { reason } => ("rejected", Some(reason.clone())),
            Resolution::TimedOut => ("timed_out", None),
        };
        self.record(&entry.request, action, detail);

        let token = match &resolution {
            Resolution::Approved { plan, .. } => Some(ApprovedPlan {
                request_id: request_id.to_string(),
                plan: plan.clone(),
            }),
            _ => None,
        };
        self.resolved.insert(
            request_id.to_string(),
            ResolvedEntry { resolution: resolution.clone(), token },
        );
        let _ = entry.notify.send(true);
        Some(resolution)
    }
}

pub struct ApprovalGate {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    state: Mutex<GateState>,
}

impl ApprovalGate {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Suspend a mutating plan. Parameters are validated first.
    pub async fn request(&self, session_id: &str, mut plan: ExecutionPlan, snapshot: ResumeSnapshot) -> Result<ApprovalRequest> {
        let descriptor = self.registry.get(&plan.tool)?;
        plan.capability = descriptor.capability;
        if !descriptor.is_mutating() {
            return Err(NetpilotError::Validation(format!(
                "tool '{}' is read-only and needs no approval",
                plan.tool
            )));
        }
        descriptor.input.validate(&plan.params).map_err(|violations| NetpilotError::SchemaViolation {
            tool: plan.tool.clone(),
            violations,
        })?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::from_std(self.timeout).unwrap_or_else(|_| ChronoDuration::seconds(900));
        let request = ApprovalRequest {
            id: format!("apr-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            session_id: session_id.to_string(),
            target: plan.target.clone(),
            risk: descriptor.risk,
            plan,
            snapshot,
            created_at: now,
            expires_at,
        };

        let mut state = self.state.lock().await;
        let (notify, _) = watch::channel(false);
        state.record(&request, "requested", Some(format!("risk {}", request.risk)));
        state.pending.insert(request.id.clone(), PendingEntry { request: request.clone(), notify });
        Ok(request)
    }

    /// Re-register a request persisted by an earlier process
    pub async fn restore(&self, request: ApprovalRequest) {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(&request.id) || state.resolved.contains_key(&request.id) {
            return;
        }
        let (notify, _) = watch::channel(false);
        state.record(&request, "restored", None);
        state.pending.insert(request.id.clone(), PendingEntry { request, notify });
    }

    /// Mark a request resolved without a pending entry (replay after restart)
    pub async fn remember(&self, request_id: &str, resolution: Resolution) {
        let mut state = self.state.lock().await;
        state
            .resolved
            .entry(request_id.to_string())
            .or_insert(ResolvedEntry { resolution, token: None });
    }

    /// Apply an operator decision. Idempotent per request id.
    pub async fn resume(&self, request_id: &str, decision: ApprovalDecision) -> Result<Resumed> {
        let mut state = self.state.lock().await;

        if let Some(done) = state.resolved.get(request_id) {
            info!("Approval {} already resolved, replayed {}", request_id, decision.label());
            return Ok(Resumed { resolution: done.resolution.clone(), replay: true });
        }

        let request = match state.pending.get(request_id) {
            Some(entry) => entry.request.clone(),
            None => return Err(NetpilotError::ApprovalNotFound(request_id.to_string())),
        };

        if request.is_expired(Utc::now()) {
            warn!("Approval {} arrived after expiry, treating as rejected", request_id);
            let resolution = state
                .settle(request_id, Resolution::TimedOut)
                .unwrap_or(Resolution::TimedOut);
            return Ok(Resumed { resolution, replay: false });
        }

        let resolution = match decision {
            ApprovalDecision::Approve => Resolution::Approved { plan: request.plan.clone(), edited: false },
            ApprovalDecision::Reject { reason } => Resolution::Rejected {
                reason: if reason.is_empty() { "rejected by operator".to_string() } else { reason },
            },
            ApprovalDecision::Edit { params } => {
                let descriptor = self.registry.get(&request.plan.tool)?;
                if let Err(violations) = descriptor.input.validate(&params) {
                    // Request stays pending so the operator can try again
                    state.record(&request, "edit_rejected", Some(violations.join("; ")));
                    return Err(NetpilotError::SchemaViolation { tool: request.plan.tool.clone(), violations });
                }
                let mut plan = request.plan.with_params(params);
                plan.target = crate::adapters::target_of(&plan.params)
                    .map(str::to_string)
                    .or(plan.target);
                Resolution::Approved { plan, edited: true }
            }
        };

        let resolution = state.settle(request_id, resolution.clone()).unwrap_or(resolution);
        Ok(Resumed { resolution, replay: false })
    }

    /// Take the execution token of an approved request (at most once)
    pub async fn claim(&self, request_id: &str) -> Option<ApprovedPlan> {
        let mut state = self.state.lock().await;
        state.resolved.get_mut(request_id).and_then(|r| r.token.take())
    }

    /// Record that the approved mutation was issued
    pub async fn mark_applied(&self, request: &ApprovalRequest, ok: bool) {
        let mut state = self.state.lock().await;
        state.record(request, if ok { "applied" } else { "apply_failed" }, None);
    }

    /// Block until the request is resolved, expires, or the session is cancelled
    pub async fn wait(&self, request_id: &str, cancel: &CancellationToken) -> Result<Resolution> {
        let (mut rx, expires_at) = {
            let state = self.state.lock().await;
            if let Some(done) = state.resolved.get(request_id) {
                return Ok(done.resolution.clone());
            }
            let entry = state
                .pending
                .get(request_id)
                .ok_or_else(|| NetpilotError::ApprovalNotFound(request_id.to_string()))?;
            (entry.notify.subscribe(), entry.request.expires_at)
        };

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = rx.wait_for(|resolved| *resolved) => {}
            _ = tokio::time::sleep(remaining) => {
                let mut state = self.state.lock().await;
                state.settle(request_id, Resolution::TimedOut);
            }
            _ = cancel.cancelled() => {
                let mut state = self.state.lock().await;
                state.settle(request_id, Resolution::Rejected { reason: "session cancelled".to_string() });
            }
        }

        self.resolution(request_id)
            .await
            .ok_or_else(|| NetpilotError::ApprovalNotFound(request_id.to_string()))
    }

    pub async fn resolution(&self, request_id: &str) -> Option<Resolution> {
        let state = self.state.lock().await;
        state.resolved.get(request_id).map(|r| r.resolution.clone())
    }

    /// Reject every pending request of a session; returns how many
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state
            .pending
            .values()
            .filter(|p| p.request.session_id == session_id)
            .map(|p| p.request.id.clone())
            .collect();
        for id in &ids {
            state.settle(id, Resolution::Rejected { reason: "session cancelled".to_string() });
        }
        ids.len()
    }

    /// Resolve overdue requests as timed out; returns their ids
    pub async fn expire_overdue(&self) -> Vec<String> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let ids: Vec<String> = state
            .pending
            .values()
            .filter(|p| p.request.is_expired(now))
            .map(|p| p.request.id.clone())
            .collect();
        for id in &ids {
            state.settle(id, Resolution::TimedOut);
        }
        ids
    }

    pub async fn pending(&self, session_id: Option<&str>) -> Vec<ApprovalRequest> {
        let state = self.state.lock().await;
        let mut out: Vec<ApprovalRequest> = state
            .pending
            .values()
            .filter(|p| session_id.map(|s| p.request.session_id == s).unwrap_or(true))
            .map(|p| p.request.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    pub async fn audit(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedAdapter;
    use netpilot_shared::tool::{FieldKind, FieldSpec, RiskLevel};
    use netpilot_shared::{PlanOrigin, ToolDescriptor, ToolSchema};
    use serde_json::{json, Map, Value};

    fn gate(timeout: Duration) -> ApprovalGate {
        let schema = ToolSchema::new(vec![
            FieldSpec::required("hostname", FieldKind::String),
            FieldSpec::required("neighbor", FieldKind::String),
        ]);
        let registry = ToolRegistry::builder()
            .tool(
                ToolDescriptor::mutate("bgp_neighbor_set", "", schema, RiskLevel::High),
                Arc::new(ScriptedAdapter::new()),
            )
            .build();
        ApprovalGate::new(Arc::new(registry), timeout)
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn plan() -> ExecutionPlan {
        ExecutionPlan::new(
            "bgp_neighbor_set",
            netpilot_shared::Capability::Mutate,
            params(json!({"hostname": "R1", "neighbor": "10.0.0.2"})),
        )
        .with_target("R1")
    }

    fn snapshot() -> ResumeSnapshot {
        ResumeSnapshot { origin: PlanOrigin::Fast, query: "fix R1".into(), conclusion: None }
    }

    #[tokio::test]
    async fn test_approve_issues_one_token() {
        let gate = gate(Duration::from_secs(60));
        let req = gate.request("s1", plan(), snapshot()).await.unwrap();
        assert_eq!(req.risk, RiskLevel::High);

        let first = gate.resume(&req.id, ApprovalDecision::Approve).await.unwrap();
        assert!(first.resolution.is_approved());
        assert!(!first.replay);
        assert!(gate.claim(&req.id).await.is_some());

        let again = gate.resume(&req.id, ApprovalDecision::Approve).await.unwrap();
        assert!(again.replay);
        assert!(gate.claim(&req.id).await.is_none());
    }

    #[tokio::test]
    async fn test_edit_violation_keeps_pending() {
        let gate = gate(Duration::from_secs(60));
        let req = gate.request("s1", plan(), snapshot()).await.unwrap();
        let err = gate
            .resume(&req.id, ApprovalDecision::Edit { params: params(json!({"hostname": "R1"})) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'neighbor'"));
        assert_eq!(gate.pending(Some("s1")).await.len(), 1);

        let ok = gate
            .resume(
                &req.id,
                ApprovalDecision::Edit { params: params(json!({"hostname": "R1", "neighbor": "10.0.0.9"})) },
            )
            .await
            .unwrap();
        match ok.resolution {
            Resolution::Approved { plan, edited } => {
                assert!(edited);
                assert_eq!(plan.params.get("neighbor"), Some(&json!("10.0.0.9")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_as_rejection() {
        let gate = gate(Duration::from_millis(30));
        let req = gate.request("s1", plan(), snapshot()).await.unwrap();
        let res = gate.wait(&req.id, &CancellationToken::new()).await.unwrap();
        assert_eq!(res, Resolution::TimedOut);
        assert!(gate.claim(&req.id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_session_rejects_pending() {
        let gate = gate(Duration::from_secs(60));
        let req = gate.request("s1", plan(), snapshot()).await.unwrap();
        gate.request("s2", plan(), snapshot()).await.unwrap();
        assert_eq!(gate.cancel_session("s1").await, 1);
        assert!(matches!(gate.resolution(&req.id).await, Some(Resolution::Rejected { .. })));
        assert_eq!(gate.pending(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_descriptor_decides_capability() {
        let gate = gate(Duration::from_secs(60));
        let mislabeled = ExecutionPlan::new(
            "bgp_neighbor_set",
            netpilot_shared::Capability::Read,
            params(json!({"hostname": "R1", "neighbor": "10.0.0.2"})),
        );
        assert!(gate.request("s1", mislabeled, snapshot()).await.is_ok());
    }

    #[tokio::test]
    async fn test_audit_trail() {
        let gate = gate(Duration::from_secs(60));
        let req = gate.request("s1", plan(), snapshot()).await.unwrap();
        gate.resume(&req.id, ApprovalDecision::reject("window closed")).await.unwrap();
        let actions: Vec<String> = gate.audit().await.into_iter().map(|a| a.action).collect();
        assert_eq!(actions, vec!["requested", "rejected"]);
    }
}
