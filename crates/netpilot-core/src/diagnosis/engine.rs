//! Diagnostic engine: QUICK_PASS -> SUPERVISE -> INSPECT -> {RECURSE | CONCLUDE}.

use super::probes::{probe_layer, run_probes, target_params, ProbeOutcome, ProbeRequest};
use super::state::{DiagnosticState, SubProblem};
use crate::config::{DiagnosisConfig, LayerConfig};
use crate::knowledge::KnowledgeBase;
use crate::memory::{EpisodicMemory, Fingerprint, MemoryPayload};
use crate::registry::ToolRegistry;
use netpilot_shared::threshold::{count_violating, evaluate_records, RECORD_COUNT_FIELD};
use netpilot_shared::{
    ConclusionStatus, DiagnosticConclusion, Evidence, EvidenceSource, ExecutionPlan, Hypothesis, Layer,
    NetpilotError, Phase, Query, Result, RuleOutcome, Strategy, LIVE_CONFIDENCE_CEILING, QUICK_PASS_CEILING,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Confidence of a layer with no cached anomaly
const NO_ANOMALY_CONFIDENCE: f64 = 0.1;

/// QUICK_PASS confidence from the share of violating cached records
pub fn quick_pass_confidence(anomalous: usize, total: usize) -> f64 {
    if anomalous == 0 || total == 0 {
        return NO_ANOMALY_CONFIDENCE;
    }
    (0.4 + 0.2 * (anomalous as f64 / total as f64)).min(QUICK_PASS_CEILING)
}

/// Layers examined without a single successful cached or live reading
fn layers_without_data(hypotheses: &[Hypothesis]) -> Vec<Layer> {
    let mut blind: Vec<Layer> = Vec::new();
    for h in hypotheses {
        let layer_has_data = hypotheses.iter().any(|o| o.layer == h.layer && o.has_data());
        if !layer_has_data && !blind.contains(&h.layer) {
            blind.push(h.layer);
        }
    }
    blind.sort();
    blind
}

/// SUPERVISE: rank candidate hypotheses and pick the ones worth a live probe.
/// Pure; never touches tools.
pub fn supervise(
    candidates: &[&Hypothesis],
    knowledge: &BTreeMap<Layer, f64>,
    memory: &BTreeMap<Layer, f64>,
    config: &DiagnosisConfig,
) -> Vec<u32> {
    let mut scored: Vec<(u32, f64)> = candidates
        .iter()
        .map(|h| {
            let score = h.confidence()
                + config.knowledge_weight * knowledge.get(&h.layer).copied().unwrap_or(0.0)
                + config.memory_weight * memory.get(&h.layer).copied().unwrap_or(0.0);
            (h.id, score)
        })
        .filter(|(_, score)| *score >= config.inspect_floor)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(config.max_inspect_layers);
    scored.into_iter().map(|(id, _)| id).collect()
}

/// Why the run stopped
enum Stop {
    Concluded,
    Limit(String),
    Cancelled,
}

pub struct DiagnosticEngine {
    registry: Arc<ToolRegistry>,
    memory: Arc<EpisodicMemory>,
    knowledge: Arc<dyn KnowledgeBase>,
    config: DiagnosisConfig,
    default_targets: Vec<String>,
}

impl DiagnosticEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        memory: Arc<EpisodicMemory>,
        knowledge: Arc<dyn KnowledgeBase>,
        config: DiagnosisConfig,
    ) -> Self {
        Self { registry, memory, knowledge, config, default_targets: Vec::new() }
    }

    /// Targets used when the query names none
    pub fn with_default_targets(mut self, targets: Vec<String>) -> Self {
        self.default_targets = targets;
        self
    }

    pub fn config(&self) -> &DiagnosisConfig {
        &self.config
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.probe_timeout_ms)
    }

    fn layer_config(&self, layer: Layer) -> Result<&LayerConfig> {
        self.config
            .layer(layer)
            .ok_or_else(|| NetpilotError::Config(format!("no diagnosis layer '{}' configured", layer)))
    }

    /// Run a diagnosis to completion. Always ends in CONCLUDE (or ABORTED on
    /// cancellation); limits become a marker on the conclusion.
    pub async fn run(&self, query: &Query, cancel: &CancellationToken) -> Result<DiagnosticConclusion> {
        if self.config.layers.is_empty() {
            return Err(NetpilotError::Config("no diagnosis layers configured".to_string()));
        }
        let targets = if query.targets.is_empty() { self.default_targets.clone() } else { query.targets.clone() };
        if targets.is_empty() {
            return Err(NetpilotError::Validation("diagnosis needs at least one target".to_string()));
        }

        let layers: Vec<Layer> = Layer::ALL.iter().copied().filter(|l| self.config.layer(*l).is_some()).collect();
        let mut state = DiagnosticState::new(query.clone(), self.config.max_iterations, self.config.max_depth);
        state.push(SubProblem::root(layers, targets))?;
        info!("Diagnosis started: {}", query.text);

        let stop = self.drive(&mut state, cancel).await?;
        Ok(self.conclude(state, stop))
    }

    async fn drive(&self, state: &mut DiagnosticState, cancel: &CancellationToken) -> Result<Stop> {
        while let Some(sub) = state.next_subproblem() {
            if cancel.is_cancelled() {
                return Ok(Stop::Cancelled);
            }
            if let Err(e) = state.begin_iteration(&sub) {
                return Ok(Stop::Limit(e.to_string()));
            }

            let candidates = tokio::select! {
                _ = cancel.cancelled() => return Ok(Stop::Cancelled),
                ids = self.quick_pass(state, &sub) => ids,
            };

            state.transition(Phase::Supervise, format!("{} candidate(s)", candidates.len()));
            let knowledge = self.knowledge.layer_priors(&state.query).await;
            let memory = self.memory_priors(&state.query).await;
            let refs: Vec<&Hypothesis> = candidates.iter().filter_map(|id| state.hypothesis(*id)).collect();
            let selected = supervise(&refs, &knowledge, &memory, &self.config);
            if selected.is_empty() {
                state.transition(Phase::Conclude, "no layer cleared the inspect floor");
                return Ok(Stop::Concluded);
            }

            state.transition(Phase::Inspect, format!("probing {} layer(s)", selected.len()));
            match self.inspect(state, &selected, cancel).await {
                Ok(()) => {}
                Err(NetpilotError::Session(_)) => return Ok(Stop::Cancelled),
                Err(e) => return Err(e),
            }

            let Some((top, gap)) = state.leader().map(|(h, gap)| (h.clone(), gap)) else {
                state.transition(Phase::Conclude, "no hypotheses");
                return Ok(Stop::Concluded);
            };
            if top.confidence() >= self.config.conclude_threshold && gap >= self.config.recursion_margin {
                state.transition(Phase::Conclude, format!("{} leads at {:.2}", top.layer, top.confidence()));
                return Ok(Stop::Concluded);
            }

            let Some(child) = self.narrow(&top) else {
                state.transition(Phase::Conclude, "nothing left to narrow");
                return Ok(Stop::Concluded);
            };
            if !state.can_iterate() {
                let reason = format!("iteration limit ({}) reached", self.config.max_iterations);
                state.transition(Phase::Conclude, reason.clone());
                return Ok(Stop::Limit(reason));
            }
            if !state.can_descend() {
                let reason = format!("depth limit ({}) reached", self.config.max_depth);
                state.transition(Phase::Conclude, reason.clone());
                return Ok(Stop::Limit(reason));
            }

            state.transition(
                Phase::Recurse,
                format!("{} on {} (gap {:.2})", child.layers[0], child.targets.join(", "), gap),
            );
            state.push(child)?;
            state.transition(Phase::QuickPass, "");
        }
        Ok(Stop::Concluded)
    }

    /// Narrower sub-problem for an unconfirmed leader: its anomalous targets
    /// first, otherwise the next layer down.
    fn narrow(&self, top: &Hypothesis) -> Option<SubProblem> {
        let child = |layer: Layer, targets: Vec<String>| SubProblem {
            layers: vec![layer],
            targets,
            depth: top.depth + 1,
            parent: Some(top.id),
        };
        if !top.anomalous_targets.is_empty() && top.anomalous_targets.len() < top.targets.len() {
            return Some(child(top.layer, top.anomalous_targets.clone()));
        }
        let mut deeper = top.layer.deeper();
        while let Some(layer) = deeper {
            if self.config.layer(layer).is_some() {
                let targets = if top.anomalous_targets.is_empty() {
                    top.targets.clone()
                } else {
                    top.anomalous_targets.clone()
                };
                return Some(child(layer, targets));
            }
            deeper = layer.deeper();
        }
        None
    }

    // ========================================================================
    // QUICK_PASS
    // ========================================================================

    async fn quick_pass(&self, state: &mut DiagnosticState, sub: &SubProblem) -> Vec<u32> {
        let mut ids = Vec::new();
        for layer in &sub.layers {
            let Ok(cfg) = self.layer_config(*layer) else { continue };
            let mut anomalous_units = 0;
            let mut total_units = 0;
            let mut evaluated = 0;
            let mut anomalous_targets = Vec::new();
            let mut first_message = None;
            let mut failures = Vec::new();

            for target in &sub.targets {
                let params = target_params(&cfg.target_param, target);
                match self.registry.invoke_read(&cfg.cached_tool, &params, self.probe_timeout()).await {
                    Ok(output) => {
                        evaluated += 1;
                        let outcome = evaluate_records(&cfg.health, target, &output.records);
                        if cfg.health.field == RECORD_COUNT_FIELD {
                            total_units += 1;
                            anomalous_units += usize::from(outcome.is_violation());
                        } else {
                            total_units += output
                                .records
                                .iter()
                                .filter(|r| netpilot_shared::threshold::lookup_field(r, &cfg.health.field).is_some())
                                .count();
                            anomalous_units += count_violating(&cfg.health, &output.records);
                        }
                        if let RuleOutcome::Violation(v) = outcome {
                            anomalous_targets.push(target.clone());
                            first_message.get_or_insert(v.message);
                        }
                    }
                    Err(e) => {
                        debug!("Cached lookup {} for {} failed: {}", cfg.cached_tool, target, e);
                        failures.push(format!("{}: {}", target, e));
                    }
                }
            }

            let claim = match &first_message {
                Some(message) => format!("{} fault on {}: {}", layer, anomalous_targets.join(", "), message),
                None if evaluated == 0 => format!("no cached {} data ({} lookup(s) failed)", layer, failures.len()),
                None => format!("no {} anomaly in cached data for {}/{} target(s)", layer, evaluated, sub.targets.len()),
            };
            let id = state.add_hypothesis(*layer, claim, sub.targets.clone(), sub);
            if let Some(h) = state.hypothesis_mut(id) {
                h.anomalous_targets = anomalous_targets;
                if evaluated > 0 {
                    let summary = format!(
                        "{}/{} cached value(s) violate {} {} {}",
                        anomalous_units,
                        total_units,
                        cfg.health.field,
                        cfg.health.comparator.symbol(),
                        cfg.health.value
                    );
                    let confidence = quick_pass_confidence(anomalous_units, total_units);
                    h.record(Evidence::new(EvidenceSource::Cached, &cfg.cached_tool, sub.targets.clone(), summary), confidence);
                } else {
                    h.set_confidence(0.0);
                }
                if !failures.is_empty() {
                    h.attach(Evidence::new(
                        EvidenceSource::Inconclusive,
                        &cfg.cached_tool,
                        sub.targets.clone(),
                        failures.join("; "),
                    ));
                }
                debug!("QUICK_PASS {} -> {:.2} ({} of {} read)", layer, h.confidence(), evaluated, sub.targets.len());
            }
            ids.push(id);
        }
        ids
    }

    // ========================================================================
    // SUPERVISE priors
    // ========================================================================

    /// Past conclusions for similar queries, per layer
    async fn memory_priors(&self, query: &Query) -> BTreeMap<Layer, f64> {
        let mut priors = BTreeMap::new();
        let hits = self.memory.similar(&Fingerprint::of(&query.text), Some(Strategy::Diagnostic), 5).await;
        for hit in hits {
            if let MemoryPayload::Conclusion { layer: Some(layer), .. } = hit.record.payload {
                let score = hit.similarity * hit.effective_confidence;
                let entry = priors.entry(layer).or_insert(0.0);
                if score > *entry {
                    *entry = score;
                }
            }
        }
        priors
    }

    // ========================================================================
    // INSPECT
    // ========================================================================

    async fn inspect(&self, state: &mut DiagnosticState, selected: &[u32], cancel: &CancellationToken) -> Result<()> {
        let mut requests = Vec::new();
        for id in selected {
            let Some(h) = state.hypothesis(*id) else { continue };
            let cfg = self.layer_config(h.layer)?;
            requests.push(ProbeRequest {
                hypothesis: h.id,
                layer: h.layer,
                tool: cfg.live_tool.clone(),
                target_param: cfg.target_param.clone(),
                targets: if h.anomalous_targets.is_empty() { h.targets.clone() } else { h.anomalous_targets.clone() },
                health: cfg.health.clone(),
            });
        }

        let results = run_probes(self.registry.clone(), requests, self.probe_timeout(), cancel).await?;

        // Applied only once every probe has finished
        for result in results {
            let Some(h) = state.hypothesis_mut(result.hypothesis) else { continue };
            match result.outcome {
                ProbeOutcome::Anomalous { targets, detail } => {
                    let evidence = Evidence::new(EvidenceSource::Live, &result.tool, targets.clone(), detail);
                    h.anomalous_targets = targets;
                    h.record(evidence, LIVE_CONFIDENCE_CEILING);
                }
                ProbeOutcome::Healthy { targets } => {
                    let halved = h.confidence() / 2.0;
                    let evidence = Evidence::new(EvidenceSource::Live, &result.tool, targets, "live data healthy");
                    h.record(evidence, halved);
                }
                ProbeOutcome::Inconclusive { reason } => {
                    let targets = h.targets.clone();
                    h.attach(Evidence::new(EvidenceSource::Inconclusive, &result.tool, targets, reason));
                }
            }
            debug!("INSPECT {} -> {:.2}", result.layer, h.confidence());
        }
        Ok(())
    }

    // ========================================================================
    // CONCLUDE
    // ========================================================================

    fn conclude(&self, mut state: DiagnosticState, stop: Stop) -> DiagnosticConclusion {
        let winner = state.leader().map(|(h, _)| h.clone());
        let any_anomaly = state.hypotheses().iter().any(|h| !h.anomalous_targets.is_empty());
        let blind = layers_without_data(state.hypotheses());

        let status = match &stop {
            Stop::Cancelled => ConclusionStatus::Aborted { reason: "session cancelled".to_string() },
            Stop::Limit(reason) => ConclusionStatus::Incomplete { reason: reason.clone() },
            Stop::Concluded if !any_anomaly && !blind.is_empty() => ConclusionStatus::Inconclusive {
                reason: format!("no data from {} layer", blind.iter().map(Layer::as_str).collect::<Vec<_>>().join(", ")),
            },
            Stop::Concluded if !any_anomaly => ConclusionStatus::NoFaultFound,
            Stop::Concluded => match &winner {
                Some(w) if w.confidence() >= self.config.conclude_threshold && w.has_live_evidence() => {
                    ConclusionStatus::Confirmed
                }
                _ => ConclusionStatus::Unconfirmed,
            },
        };

        let (final_phase, note) = match status {
            ConclusionStatus::Aborted { .. } => (Phase::Aborted, "cancelled"),
            _ => (Phase::Done, status.label()),
        };
        state.transition(final_phase, note);

        let chain = match (&status, &winner) {
            (
                ConclusionStatus::NoFaultFound | ConclusionStatus::Inconclusive { .. } | ConclusionStatus::Aborted { .. },
                _,
            ) => Vec::new(),
            (_, Some(w)) => state.chain(w.id),
            _ => Vec::new(),
        };
        let confidence = chain.first().map(Hypothesis::confidence).unwrap_or(0.0);
        let remediation = match (&status, chain.first()) {
            (ConclusionStatus::Confirmed, Some(w)) => self.propose_remediation(w),
            _ => Vec::new(),
        };

        let summary = match chain.first() {
            Some(w) => format!(
                "{}: {} (confidence {:.2}, {} iteration(s))",
                status.label(),
                w.claim,
                confidence,
                state.iteration()
            ),
            None => match &status {
                ConclusionStatus::Inconclusive { reason } => {
                    format!("{}: {} ({} iteration(s))", status.label(), reason, state.iteration())
                }
                _ => format!("{} ({} iteration(s))", status.label(), state.iteration()),
            },
        };
        info!("Diagnosis finished: {}", summary);

        DiagnosticConclusion {
            query: state.query.text.clone(),
            confidence,
            chain,
            hypotheses: state.hypotheses().to_vec(),
            remediation,
            iterations: state.iteration(),
            max_depth_reached: state.max_depth_reached(),
            trail: state.take_trail(),
            summary,
            status,
        }
    }

    /// Remediation template of the winning layer, one plan per faulty target
    fn propose_remediation(&self, winner: &Hypothesis) -> Vec<ExecutionPlan> {
        let Some(template) = self.config.layer(winner.layer).and_then(|l| l.remediation.as_ref()) else {
            return Vec::new();
        };
        let targets = if winner.anomalous_targets.is_empty() { &winner.targets } else { &winner.anomalous_targets };

        let mut plans = Vec::new();
        for target in targets {
            let params = template
                .params
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => Value::String(s.replace("{target}", target)),
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect();
            match self.registry.bind(&template.tool, params) {
                Ok(plan) if plan.is_mutating() => {
                    let rationale = if template.description.is_empty() {
                        winner.claim.clone()
                    } else {
                        template.description.clone()
                    };
                    plans.push(plan.with_target(target).with_rationale(rationale));
                }
                Ok(_) => warn!("Remediation tool {} is read-only, not proposed", template.tool),
                Err(e) => warn!("Remediation for {} on {} not proposed: {}", winner.layer, target, e),
            }
        }
        plans
    }

    /// Re-run the winning layer's live probe for one target. True when the
    /// fault is still present.
    pub async fn revalidate(&self, conclusion: &DiagnosticConclusion, target: &str) -> Result<bool> {
        let winner = conclusion
            .winner()
            .ok_or_else(|| NetpilotError::Validation("conclusion has no winning hypothesis".to_string()))?;
        let cfg = self.layer_config(winner.layer)?;
        let request = ProbeRequest {
            hypothesis: winner.id,
            layer: winner.layer,
            tool: cfg.live_tool.clone(),
            target_param: cfg.target_param.clone(),
            targets: vec![target.to_string()],
            health: cfg.health.clone(),
        };
        match probe_layer(&self.registry, &request, self.probe_timeout()).await {
            ProbeOutcome::Anomalous { .. } => Ok(true),
            ProbeOutcome::Healthy { .. } => Ok(false),
            ProbeOutcome::Inconclusive { reason } => Err(NetpilotError::tool(&cfg.live_tool, reason)),
        }
    }

    /// Remember a conclusion so later similar queries get a layer prior
    pub async fn remember(&self, conclusion: &DiagnosticConclusion) {
        let Some(winner) = conclusion.winner() else { return };
        if !matches!(conclusion.status, ConclusionStatus::Confirmed) {
            return;
        }
        self.memory
            .store(
                Fingerprint::of(&conclusion.query),
                &conclusion.query,
                Strategy::Diagnostic,
                MemoryPayload::Conclusion { layer: Some(winner.layer), summary: conclusion.summary.clone() },
                conclusion.confidence,
            )
            .await;
    }
}
