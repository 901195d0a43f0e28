//! Strategy router - top-level entry for every operator turn.
//!
//! Memory first (fast plans only), then one bounded classification call,
//! then dispatch to the fast, diagnostic or batch path. Low confidence and
//! classifier failures degrade to a read-only fast answer or a clarification,
//! never to a mutating plan.

use crate::adapters::TARGET_PARAMS;
use crate::approval::ApprovalGate;
use crate::batch::BatchExecutor;
use crate::classifier::{is_network_related, IntentClassifier, KeywordClassifier};
use crate::diagnosis::DiagnosticEngine;
use crate::fast::{FastExecutor, FastResult};
use crate::memory::{EpisodicMemory, Fingerprint, MemoryPayload};
use crate::registry::ToolRegistry;
use netpilot_shared::inspection::SelectorSpec;
use netpilot_shared::{
    ApprovalRequest, ConclusionStatus, DiagnosticConclusion, ExecutionPlan, InspectionConfig, NetpilotError,
    Outcome, OutcomeStatus, PlanOrigin, Query, Result, ResumeSnapshot, RouteDecision, Strategy, TargetSelector,
    ToolDescriptor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Asked when a query is below the floor and has no network vocabulary
pub const SCOPE_QUESTION: &str =
    "That does not look like a network question. Which devices, protocols or interfaces should I look at?";

/// Clarification for a low-confidence query
pub fn clarification_for(decision: &RouteDecision, registry: &ToolRegistry) -> String {
    if let Some(tool) = decision.tool.as_deref().and_then(|t| registry.get(t).ok()) {
        if tool.is_mutating() {
            return format!(
                "I am not confident enough to propose a change with {}. Please state the device and the exact change.",
                tool.name
            );
        }
    }
    match decision.targets.first() {
        Some(target) => format!("What would you like to know about {}? For example BGP peers, interfaces or routes.", target),
        None => "Which device and which data do you need? For example: \"show BGP peers on R1\".".to_string(),
    }
}

/// Where the decision came from
struct Classified {
    decision: RouteDecision,
    low_confidence: bool,
}

pub struct StrategyRouter {
    classifier: Arc<dyn IntentClassifier>,
    fallback: KeywordClassifier,
    memory: Arc<EpisodicMemory>,
    registry: Arc<ToolRegistry>,
    gate: Arc<ApprovalGate>,
    fast: Arc<FastExecutor>,
    engine: Arc<DiagnosticEngine>,
    batch: Arc<BatchExecutor>,
    floor: f64,
    inspections_dir: Option<PathBuf>,
}

pub struct RouterParts {
    pub classifier: Arc<dyn IntentClassifier>,
    pub fallback: KeywordClassifier,
    pub memory: Arc<EpisodicMemory>,
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<ApprovalGate>,
    pub fast: Arc<FastExecutor>,
    pub engine: Arc<DiagnosticEngine>,
    pub batch: Arc<BatchExecutor>,
    pub floor: f64,
    pub inspections_dir: Option<PathBuf>,
}

impl StrategyRouter {
    pub fn new(parts: RouterParts) -> Self {
        Self {
            classifier: parts.classifier,
            fallback: parts.fallback,
            memory: parts.memory,
            registry: parts.registry,
            gate: parts.gate,
            fast: parts.fast,
            engine: parts.engine,
            batch: parts.batch,
            floor: parts.floor,
            inspections_dir: parts.inspections_dir,
        }
    }

    pub async fn route(&self, query: &Query, session_id: &str, cancel: &CancellationToken) -> Result<Outcome> {
        let fingerprint = Fingerprint::of(&query.text);

        // Memory hit short-circuits classification only
        if let Some(hit) = self.memory.lookup(&fingerprint, Some(Strategy::Fast)).await {
            if let MemoryPayload::Plan { plan } = hit.record.payload {
                if hit.stale {
                    debug!("Stale memory plan, executing as confirmation read");
                }
                match self.fast.execute(plan, session_id, &query.text).await {
                    Ok(result) => {
                        let mut outcome = self.fast_outcome(result, hit.effective_confidence, session_id);
                        outcome.memory_hit = true;
                        return Ok(outcome);
                    }
                    Err(e @ (NetpilotError::UnknownTool(_) | NetpilotError::SchemaViolation { .. })) => {
                        warn!("Remembered plan no longer valid ({}), classifying", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let Classified { decision, low_confidence } = self.classify(query).await;
        info!(
            "Routed to {} ({:.2}{})",
            decision.strategy,
            decision.confidence,
            if low_confidence { ", low confidence" } else { "" }
        );

        if low_confidence {
            return self.low_confidence(query, decision, session_id, &fingerprint).await;
        }

        match decision.strategy {
            Strategy::Fast => self.dispatch_fast(query, decision, session_id, &fingerprint, false).await,
            Strategy::Diagnostic => self.dispatch_diagnostic(query, &decision, session_id, cancel).await,
            Strategy::Batch => self.dispatch_batch(query, &decision, session_id, cancel).await,
        }
    }

    fn catalog(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors().cloned().collect()
    }

    async fn classify(&self, query: &Query) -> Classified {
        let catalog = self.catalog();
        match self.classifier.classify(query, &catalog).await {
            Ok(decision) => {
                let low = decision.confidence < self.floor;
                Classified { decision, low_confidence: low }
            }
            Err(e) => {
                warn!("Classifier {} failed ({}), using keyword fallback", self.classifier.name(), e);
                let decision = match self.fallback.classify(query, &catalog).await {
                    Ok(d) => d,
                    Err(_) => RouteDecision::new(Strategy::Fast, 0.0),
                };
                Classified { decision: decision.as_fallback(), low_confidence: true }
            }
        }
    }

    /// Below the floor: read-only fast answer, or a clarification
    async fn low_confidence(
        &self,
        query: &Query,
        decision: RouteDecision,
        session_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Outcome> {
        if !is_network_related(&query.text) && !self.registry.mentions(&query.text) {
            return Ok(Outcome::clarification(decision.confidence, SCOPE_QUESTION).with_session(session_id));
        }

        let runnable = decision
            .tool
            .as_deref()
            .and_then(|t| self.registry.get(t).ok())
            .map(|d| !d.is_mutating() && d.input.validate(&decision.params).is_ok())
            .unwrap_or(false);
        if !runnable {
            let question = clarification_for(&decision, &self.registry);
            return Ok(Outcome::clarification(decision.confidence, question).with_session(session_id));
        }

        let outcome = self.dispatch_fast(query, decision, session_id, fingerprint, true).await?;
        Ok(outcome.with_low_confidence(true))
    }

    // ========================================================================
    // Fast
    // ========================================================================

    async fn dispatch_fast(
        &self,
        query: &Query,
        decision: RouteDecision,
        session_id: &str,
        fingerprint: &Fingerprint,
        low_confidence: bool,
    ) -> Result<Outcome> {
        let Some(tool) = decision.tool.clone() else {
            let question = clarification_for(&decision, &self.registry);
            return Ok(Outcome::clarification(decision.confidence, question).with_session(session_id));
        };
        let mut plan = self.registry.bind(&tool, decision.params.clone())?;
        plan.rationale = decision.reasoning.clone();

        let result = self.fast.execute(plan, session_id, &query.text).await?;
        if !low_confidence && !decision.fallback {
            self.memory
                .store(
                    fingerprint.clone(),
                    &query.text,
                    Strategy::Fast,
                    MemoryPayload::Plan { plan: result.plan().clone() },
                    decision.confidence,
                )
                .await;
        }
        Ok(self.fast_outcome(result, decision.confidence, session_id))
    }

    fn fast_outcome(&self, result: FastResult, confidence: f64, session_id: &str) -> Outcome {
        match result {
            FastResult::Answered { plan, output, answer } => {
                let mut outcome = Outcome::answered(Strategy::Fast, confidence, answer).with_session(session_id);
                outcome.plan = Some(plan);
                outcome.output = Some(output);
                outcome
            }
            FastResult::Suspended(request) => Outcome::awaiting(Strategy::Fast, confidence, request),
        }
    }

    // ========================================================================
    // Diagnostic
    // ========================================================================

    async fn dispatch_diagnostic(
        &self,
        query: &Query,
        decision: &RouteDecision,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let scoped = if query.targets.is_empty() && !decision.targets.is_empty() {
            query.clone().with_targets(decision.targets.clone())
        } else {
            query.clone()
        };
        let conclusion = self.engine.run(&scoped, cancel).await?;
        self.engine.remember(&conclusion).await;

        let status = match &conclusion.status {
            ConclusionStatus::Aborted { .. } => OutcomeStatus::Aborted,
            ConclusionStatus::Incomplete { .. } | ConclusionStatus::Inconclusive { .. } => OutcomeStatus::Incomplete,
            _ => OutcomeStatus::Answered,
        };
        let mut answer = conclusion.summary.clone();
        for plan in &conclusion.remediation {
            answer.push_str(&format!("\nProposed: {}", plan.describe()));
        }

        if status == OutcomeStatus::Answered {
            if let Some(plan) = conclusion.remediation.first().cloned() {
                match self.submit_remediation(session_id, &conclusion, plan).await {
                    Ok(Some(request)) => {
                        let mut outcome = Outcome::awaiting(Strategy::Diagnostic, conclusion.confidence, request);
                        outcome.answer = format!("{}\n\n{}", answer, outcome.answer);
                        outcome.conclusion = Some(conclusion);
                        return Ok(outcome);
                    }
                    Ok(None) => answer.push_str("\nThe fault is no longer present; remediation withdrawn."),
                    Err(e) => answer.push_str(&format!("\nRemediation not submitted: {}", e)),
                }
            }
        }

        let mut outcome = Outcome::new(status, Strategy::Diagnostic, conclusion.confidence, answer).with_session(session_id);
        outcome.conclusion = Some(conclusion);
        Ok(outcome)
    }

    /// Re-run the winning layer's live probe, then park the plan at the gate.
    /// `None` when the fault cleared in the meantime.
    pub async fn submit_remediation(
        &self,
        session_id: &str,
        conclusion: &DiagnosticConclusion,
        plan: ExecutionPlan,
    ) -> Result<Option<ApprovalRequest>> {
        let target = plan
            .target
            .clone()
            .ok_or_else(|| NetpilotError::Validation(format!("remediation {} has no target", plan.tool)))?;
        if !self.engine.revalidate(conclusion, &target).await? {
            info!("Fault on {} cleared before remediation was submitted", target);
            return Ok(None);
        }
        let snapshot = ResumeSnapshot {
            origin: PlanOrigin::Remediation,
            query: conclusion.query.clone(),
            conclusion: Some(conclusion.clone()),
        };
        self.gate.request(session_id, plan, snapshot).await.map(Some)
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Inspection document whose name appears in the query
    async fn find_inspection(&self, text: &str) -> Option<InspectionConfig> {
        let dir = self.inspections_dir.as_ref()?;
        let lower = text.to_lowercase();
        let mut entries = tokio::fs::read_dir(dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            if !is_yaml || !lower.contains(&stem.to_lowercase()) {
                continue;
            }
            let loaded = match tokio::fs::read_to_string(&path).await {
                Ok(text) => InspectionConfig::from_yaml(&text),
                Err(e) => Err(e.into()),
            };
            match loaded {
                Ok(config) => return Some(config),
                Err(e) => warn!("Skipping inspection {}: {}", path.display(), e),
            }
        }
        None
    }

    async fn dispatch_batch(
        &self,
        query: &Query,
        decision: &RouteDecision,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let report = if let Some(config) = self.find_inspection(&query.text).await {
            self.batch.run_inspection(&config, cancel).await?
        } else {
            let Some(tool) = decision.tool.as_deref() else {
                return Ok(Outcome::clarification(
                    decision.confidence,
                    "Which inspection should I run? Name an inspection document or a read tool.",
                )
                .with_session(session_id));
            };
            let targets = if !query.targets.is_empty() {
                query.targets.clone()
            } else if !decision.targets.is_empty() {
                decision.targets.clone()
            } else {
                self.batch.resolve_targets(&TargetSelector::Selector(SelectorSpec {
                    regex: Some(".*".to_string()),
                    ..Default::default()
                }))?
            };
            let descriptor = self.registry.get(tool)?;
            let params = decision
                .params
                .iter()
                .filter(|(k, _)| !TARGET_PARAMS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let plan = ExecutionPlan::new(tool, descriptor.capability, params);
            self.batch.execute(&plan, &targets, &[], cancel).await?
        };

        let mut outcome =
            Outcome::answered(Strategy::Batch, decision.confidence, report.summary.clone()).with_session(session_id);
        outcome.report = Some(report);
        Ok(outcome)
    }
}
