//! Orchestrator - wires every component from one `Config` and owns the
//! session lifecycle: turns, suspension at the approval gate, resume and
//! cancellation.

use crate::approval::ApprovalGate;
use crate::batch::BatchExecutor;
use crate::classifier::{IntentClassifier, KeywordClassifier, LlmClassifier};
use crate::config::{ClassifierKind, Config};
use crate::diagnosis::DiagnosticEngine;
use crate::fast::{FastExecutor, FastResult};
use crate::health::HealthReport;
use crate::knowledge::StaticKnowledge;
use crate::memory::EpisodicMemory;
use crate::registry::ToolRegistry;
use crate::router::{RouterParts, StrategyRouter};
use crate::session::{SessionStore, SessionSummary};
use anyhow::Context;
use netpilot_shared::{
    ApprovalDecision, ApprovalRequest, AuditEntry, BatchReport, InspectionConfig, NetpilotError, Outcome,
    PlanOrigin, Query, Resolution, Result, SessionState, Speaker, Strategy,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Orchestrator {
    config: Config,
    registry: Arc<ToolRegistry>,
    memory: Arc<EpisodicMemory>,
    gate: Arc<ApprovalGate>,
    fast: Arc<FastExecutor>,
    engine: Arc<DiagnosticEngine>,
    batch: Arc<BatchExecutor>,
    router: StrategyRouter,
    sessions: SessionStore,
    classifier: Arc<dyn IntentClassifier>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    /// Held around every load -> save of a session file
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    /// Build everything from configuration and restore the memory snapshot
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = ToolRegistry::from_config(&config).context("Failed to build tool registry")?;
        let inventory: Vec<String> = config.inventory.iter().map(|d| d.name.clone()).collect();
        let classifier: Arc<dyn IntentClassifier> = match config.router.classifier {
            ClassifierKind::Keyword => Arc::new(KeywordClassifier::new(inventory)),
            ClassifierKind::Llm => Arc::new(LlmClassifier::new(
                &config.llm.endpoint,
                &config.llm.model,
                Duration::from_secs(config.llm.timeout_secs),
            )),
        };
        let orchestrator = Self::with_parts(config, registry, classifier);
        if let Err(e) = orchestrator.memory.load().await {
            warn!("Starting with empty memory: {}", e);
        }
        Ok(orchestrator)
    }

    /// Build from an already constructed registry and classifier
    pub fn with_parts(config: Config, registry: ToolRegistry, classifier: Arc<dyn IntentClassifier>) -> Self {
        let registry = Arc::new(registry);
        let inventory_names: Vec<String> = config.inventory.iter().map(|d| d.name.clone()).collect();

        let mut memory = EpisodicMemory::new(config.memory.clone());
        if config.memory.persist {
            memory = memory.with_snapshot(config.paths.memory_snapshot());
        }
        let memory = Arc::new(memory);

        let gate = Arc::new(ApprovalGate::new(
            registry.clone(),
            Duration::from_secs(config.approval.timeout_secs),
        ));
        let fast = Arc::new(FastExecutor::new(
            registry.clone(),
            gate.clone(),
            Duration::from_millis(config.fast.tool_timeout_ms),
            config.fast.preview_records,
        ));
        let knowledge = Arc::new(StaticKnowledge::new(&config.diagnosis.layers));
        let engine = Arc::new(
            DiagnosticEngine::new(registry.clone(), memory.clone(), knowledge, config.diagnosis.clone())
                .with_default_targets(inventory_names.clone()),
        );
        let batch = Arc::new(BatchExecutor::new(
            registry.clone(),
            classifier.clone(),
            config.inventory.clone(),
            config.batch.max_workers,
            Duration::from_millis(config.batch.target_timeout_ms),
        ));
        let router = StrategyRouter::new(RouterParts {
            classifier: classifier.clone(),
            fallback: KeywordClassifier::new(inventory_names),
            memory: memory.clone(),
            registry: registry.clone(),
            gate: gate.clone(),
            fast: fast.clone(),
            engine: engine.clone(),
            batch: batch.clone(),
            floor: config.router.confidence_floor,
            inspections_dir: Some(config.paths.inspections_dir.clone()),
        });
        let sessions = SessionStore::new(config.paths.sessions_dir());

        Self {
            config,
            registry,
            memory,
            gate,
            fast,
            engine,
            batch,
            router,
            sessions,
            classifier,
            cancels: Mutex::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &EpisodicMemory {
        &self.memory
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn engine(&self) -> &DiagnosticEngine {
        &self.engine
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// One-shot query in a fresh session
    pub async fn query(&self, text: &str, targets: Vec<String>) -> Result<Outcome> {
        let session_id = SessionStore::new_id();
        self.turn(&session_id, Query::new(text).with_targets(targets)).await
    }

    /// One turn of an interactive session. While a request is pending, an
    /// `approve` / `reject` / `edit` line resolves it instead of routing.
    pub async fn chat_turn(&self, session_id: &str, text: &str) -> Result<Outcome> {
        let pending = {
            let _guard = self.lock_session(session_id).await;
            self.sessions.load_or_create(session_id).await?.pending.is_some()
        };
        if pending {
            if let Ok(decision) = ApprovalDecision::parse(text) {
                return self.resume(session_id, None, decision).await;
            }
        }
        self.turn(session_id, Query::new(text)).await
    }

    async fn turn(&self, session_id: &str, query: Query) -> Result<Outcome> {
        let query = query.in_session(session_id);
        let cancel = self.cancel_token(session_id).await;
        let _guard = self.lock_session(session_id).await;
        let mut state = self.sessions.load_or_create(session_id).await?;
        state.push(Speaker::Operator, &query.text);

        let routed = self.router.route(&query, session_id, &cancel).await;
        match &routed {
            Ok(outcome) => {
                state.push(Speaker::Netpilot, &outcome.answer);
                if let Some(request) = &outcome.pending_approval {
                    if let Some(previous) = state.pending.replace(request.clone()) {
                        // Only one request may be pending per session
                        self.supersede(&mut state, previous).await;
                    }
                }
                if let Some(conclusion) = &outcome.conclusion {
                    state.last_conclusion = Some(conclusion.clone());
                }
            }
            Err(e) => state.push(Speaker::Netpilot, format!("error: {}", e)),
        }
        self.sessions.save(&state).await?;
        routed.map(|outcome| outcome.with_session(session_id))
    }

    async fn supersede(&self, state: &mut SessionState, previous: ApprovalRequest) {
        info!("Request {} superseded in session {}", previous.id, state.id);
        self.gate.restore(previous.clone()).await;
        let reason = "superseded by a newer request".to_string();
        if self.gate.resume(&previous.id, ApprovalDecision::reject(reason.clone())).await.is_err() {
            self.gate.remember(&previous.id, Resolution::Rejected { reason: reason.clone() }).await;
        }
        state.resolve(&previous.id, Resolution::Rejected { reason }, false);
    }

    // ========================================================================
    // Approval
    // ========================================================================

    /// Apply an operator decision to a suspended request. Replaying a
    /// decision returns the earlier result and issues nothing.
    pub async fn resume(
        &self,
        session_id: &str,
        request_id: Option<&str>,
        decision: ApprovalDecision,
    ) -> Result<Outcome> {
        let _guard = self.lock_session(session_id).await;
        let mut state = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| NetpilotError::Session(format!("unknown session '{}'", session_id)))?;
        let request_id = match request_id {
            Some(id) => id.to_string(),
            None => state
                .pending
                .as_ref()
                .map(|p| p.id.clone())
                .or_else(|| state.resolved.last().map(|r| r.request_id.clone()))
                .ok_or_else(|| NetpilotError::ApprovalNotFound(format!("session '{}' has none", session_id)))?,
        };

        if let Some(done) = state.resolution_of(&request_id).cloned() {
            info!("Request {} already resolved in session {}", request_id, session_id);
            self.gate.remember(&request_id, done.resolution.clone()).await;
            return Ok(replayed(session_id, &request_id, &done.resolution, done.applied));
        }

        let pending = state
            .pending
            .clone()
            .filter(|p| p.id == request_id)
            .ok_or_else(|| NetpilotError::ApprovalNotFound(request_id.clone()))?;
        self.gate.restore(pending.clone()).await;
        state.push(Speaker::Operator, decision.label());

        // A schema violation on edit leaves the request pending and the session untouched
        let resumed = self.gate.resume(&request_id, decision).await?;
        let strategy = strategy_of(&pending);

        let outcome = match &resumed.resolution {
            Resolution::Approved { .. } => match self.gate.claim(&request_id).await {
                Some(token) => match self.fast.apply(token).await {
                    Ok(FastResult::Answered { plan, output, answer }) => {
                        self.gate.mark_applied(&pending, true).await;
                        state.resolve(&request_id, resumed.resolution.clone(), true);
                        let answer = match &pending.snapshot.conclusion {
                            Some(conclusion) if pending.snapshot.origin == PlanOrigin::Remediation => {
                                format!("{}\n{}", conclusion.summary, answer)
                            }
                            _ => answer,
                        };
                        let mut outcome = Outcome::answered(strategy, 1.0, answer);
                        outcome.plan = Some(plan);
                        outcome.output = Some(output);
                        outcome.conclusion = pending.snapshot.conclusion.clone();
                        outcome
                    }
                    Ok(FastResult::Suspended(_)) => {
                        return Err(NetpilotError::Internal("approved plan was suspended again".to_string()))
                    }
                    Err(e) => {
                        self.gate.mark_applied(&pending, false).await;
                        state.resolve(&request_id, resumed.resolution.clone(), false);
                        state.push(Speaker::Netpilot, format!("error: {}", e));
                        self.sessions.save(&state).await?;
                        return Err(e);
                    }
                },
                None => replayed(session_id, &request_id, &resumed.resolution, true),
            },
            Resolution::Rejected { reason } => {
                state.resolve(&request_id, resumed.resolution.clone(), false);
                Outcome::aborted(strategy, reason)
            }
            Resolution::TimedOut => {
                state.resolve(&request_id, resumed.resolution.clone(), false);
                Outcome::aborted(strategy, "approval timed out")
            }
        };

        state.push(Speaker::Netpilot, &outcome.answer);
        self.sessions.save(&state).await?;
        Ok(outcome.with_session(session_id))
    }

    /// Block until the pending request of a session is decided, times out
    /// or the session is cancelled.
    pub async fn wait_for_decision(&self, session_id: &str, request_id: &str) -> Result<Resolution> {
        let cancel = self.cancel_token(session_id).await;
        let resolution = self.gate.wait(request_id, &cancel).await?;
        if !resolution.is_approved() {
            let _guard = self.lock_session(session_id).await;
            let mut state = self.sessions.load_or_create(session_id).await?;
            state.resolve(request_id, resolution.clone(), false);
            self.sessions.save(&state).await?;
        }
        Ok(resolution)
    }

    pub async fn pending_approvals(&self, session_id: Option<&str>) -> Vec<ApprovalRequest> {
        self.gate.pending(session_id).await
    }

    pub async fn audit(&self) -> Vec<AuditEntry> {
        self.gate.audit().await
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Load an inspection by file path or by name from the inspections dir
    pub fn load_inspection(&self, name_or_path: &str) -> Result<InspectionConfig> {
        let direct = Path::new(name_or_path);
        if direct.is_file() {
            return InspectionConfig::load(direct);
        }
        for ext in ["yaml", "yml"] {
            let candidate = self.config.paths.inspections_dir.join(format!("{}.{}", name_or_path, ext));
            if candidate.is_file() {
                return InspectionConfig::load(&candidate);
            }
        }
        Err(NetpilotError::Validation(format!(
            "no inspection '{}' (looked in {})",
            name_or_path,
            self.config.paths.inspections_dir.display()
        )))
    }

    /// Run an inspection outside any session; `cancel` stops the fan-out
    pub async fn run_inspection(&self, config: &InspectionConfig, cancel: &CancellationToken) -> Result<BatchReport> {
        self.batch.run_inspection(config, cancel).await
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    async fn cancel_token(&self, session_id: &str) -> CancellationToken {
        let mut cancels = self.cancels.lock().await;
        let token = cancels.entry(session_id.to_string()).or_default();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.session_locks.lock().await.entry(session_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Cancel in-flight work of a session and reject its pending request.
    /// A turn still running on the session finishes first; its save is
    /// never written over the cancelled state.
    pub async fn cancel_session(&self, session_id: &str) -> Result<usize> {
        if let Some(token) = self.cancels.lock().await.get(session_id) {
            token.cancel();
        }
        let _guard = self.lock_session(session_id).await;
        let mut rejected = self.gate.cancel_session(session_id).await;
        if let Some(mut state) = self.sessions.load(session_id).await? {
            if let Some(pending) = state.pending.clone() {
                state.resolve(&pending.id, Resolution::Rejected { reason: "session cancelled".to_string() }, false);
                if rejected == 0 {
                    rejected = 1;
                }
            }
            self.sessions.save(&state).await?;
        }
        info!("Session {} cancelled ({} request(s) rejected)", session_id, rejected);
        Ok(rejected)
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.sessions.load(session_id).await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        self.sessions.list().await
    }

    pub async fn health(&self) -> HealthReport {
        let sessions = self.sessions.list().await.unwrap_or_default();
        let pending = sessions.iter().filter(|s| s.pending.is_some()).count();
        HealthReport::gather(
            &self.config,
            &self.registry,
            self.classifier.name(),
            self.memory.stats().await,
            pending,
            &sessions,
        )
    }
}

fn strategy_of(request: &ApprovalRequest) -> Strategy {
    match request.snapshot.origin {
        PlanOrigin::Fast => Strategy::Fast,
        PlanOrigin::Remediation => Strategy::Diagnostic,
    }
}

/// Outcome for a decision on an already resolved request
fn replayed(session_id: &str, request_id: &str, resolution: &Resolution, applied: bool) -> Outcome {
    let outcome = match resolution {
        Resolution::Approved { plan, .. } => {
            let verb = if applied { "was already applied" } else { "was approved but failed to apply" };
            let mut outcome = Outcome::answered(Strategy::Fast, 1.0, format!("Request {} {} ({}).", request_id, verb, plan.tool));
            outcome.plan = Some(plan.clone());
            outcome
        }
        Resolution::Rejected { reason } => Outcome::aborted(Strategy::Fast, reason),
        Resolution::TimedOut => Outcome::aborted(Strategy::Fast, "approval timed out"),
    };
    outcome.with_session(session_id)
}
