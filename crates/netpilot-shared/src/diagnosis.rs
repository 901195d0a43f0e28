//! Diagnostic data model: layers, evidence, hypotheses, conclusions.
//!
//! Confidence rules live on the types so no caller can break them:
//! cached evidence never lifts a hypothesis above [`QUICK_PASS_CEILING`], and
//! anything above it requires live evidence.

use crate::error::NetpilotError;
use crate::plan::ExecutionPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest confidence reachable from cached data alone
pub const QUICK_PASS_CEILING: f64 = 0.6;

/// Confidence assigned when a live probe confirms an anomaly
pub const LIVE_CONFIDENCE_CEILING: f64 = 0.95;

/// Fault domain, ordered from the top of the stack downwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Application,
    Overlay,
    Routing,
    Link,
}

impl Layer {
    pub const ALL: [Layer; 4] = [Layer::Application, Layer::Overlay, Layer::Routing, Layer::Link];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Application => "application",
            Layer::Overlay => "overlay",
            Layer::Routing => "routing",
            Layer::Link => "link",
        }
    }

    /// Next layer further down the stack
    pub fn deeper(&self) -> Option<Layer> {
        match self {
            Layer::Application => Some(Layer::Overlay),
            Layer::Overlay => Some(Layer::Routing),
            Layer::Routing => Some(Layer::Link),
            Layer::Link => None,
        }
    }
}

impl std::str::FromStr for Layer {
    type Err = NetpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "application" | "app" | "l7" => Ok(Layer::Application),
            "overlay" | "tunnel" | "vxlan" => Ok(Layer::Overlay),
            "routing" | "l3" => Ok(Layer::Routing),
            "link" | "physical" | "l1" | "l2" => Ok(Layer::Link),
            other => Err(NetpilotError::Validation(format!("unknown layer '{}'", other))),
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Cached,
    Live,
    /// Probe timed out or failed; carries no weight
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub source: EvidenceSource,
    pub tool: String,
    #[serde(default)]
    pub targets: Vec<String>,
    pub summary: String,
    pub captured_at: DateTime<Utc>,
}

impl Evidence {
    pub fn new(source: EvidenceSource, tool: &str, targets: Vec<String>, summary: impl Into<String>) -> Self {
        Self {
            id: format!("ev-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            source,
            tool: tool.to_string(),
            targets,
            summary: summary.into(),
            captured_at: Utc::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.source == EvidenceSource::Live
    }
}

/// Candidate explanation for the observed symptoms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: u32,
    pub layer: Layer,
    pub claim: String,
    confidence: f64,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Targets whose data violated the layer's health rule
    #[serde(default)]
    pub anomalous_targets: Vec<String>,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
}

impl Hypothesis {
    pub fn new(id: u32, layer: Layer, claim: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id,
            layer,
            claim: claim.into(),
            confidence: 0.0,
            evidence: Vec::new(),
            targets,
            anomalous_targets: Vec::new(),
            depth: 0,
            parent: None,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn has_live_evidence(&self) -> bool {
        self.evidence.iter().any(Evidence::is_live)
    }

    /// At least one cached or live reading succeeded
    pub fn has_data(&self) -> bool {
        self.evidence.iter().any(|e| e.source != EvidenceSource::Inconclusive)
    }

    /// Set confidence, clamped to [0,1] and to the quick-pass ceiling unless
    /// live evidence is attached.
    pub fn set_confidence(&mut self, value: f64) {
        let mut value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        if value > QUICK_PASS_CEILING && !self.has_live_evidence() {
            value = QUICK_PASS_CEILING;
        }
        self.confidence = value;
    }

    /// Attach evidence and set confidence in one step (evidence first, so a
    /// live reading may lift the value above the quick-pass ceiling).
    pub fn record(&mut self, evidence: Evidence, confidence: f64) {
        self.evidence.push(evidence);
        self.set_confidence(confidence);
    }

    /// Attach evidence without touching confidence
    pub fn attach(&mut self, evidence: Evidence) {
        self.evidence.push(evidence);
    }

    pub fn invariant_holds(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && (self.confidence <= QUICK_PASS_CEILING || self.has_live_evidence())
    }
}

/// Engine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    QuickPass,
    Supervise,
    Inspect,
    Recurse,
    Conclude,
    Done,
    Aborted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::QuickPass => "QUICK_PASS",
            Phase::Supervise => "SUPERVISE",
            Phase::Inspect => "INSPECT",
            Phase::Recurse => "RECURSE",
            Phase::Conclude => "CONCLUDE",
            Phase::Done => "DONE",
            Phase::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// One entry of the transition trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub iteration: u32,
    pub depth: u32,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConclusionStatus {
    /// Winner confirmed by live evidence above the conclude threshold
    Confirmed,
    /// Best available hypothesis, not confirmed
    Unconfirmed,
    /// Iteration or depth limit reached before confirmation
    Incomplete { reason: String },
    /// Every layer had data and none of it was anomalous
    NoFaultFound,
    /// Some layer produced no data at all, so a clean result cannot be claimed
    Inconclusive { reason: String },
    Aborted { reason: String },
}

impl ConclusionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConclusionStatus::Confirmed => "confirmed",
            ConclusionStatus::Unconfirmed => "unconfirmed",
            ConclusionStatus::Incomplete { .. } => "diagnosis incomplete",
            ConclusionStatus::NoFaultFound => "no fault found",
            ConclusionStatus::Inconclusive { .. } => "inconclusive",
            ConclusionStatus::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticConclusion {
    pub query: String,
    pub status: ConclusionStatus,
    /// Always the winner's own confidence (0 when there is no winner)
    pub confidence: f64,
    /// Winner first, then its parents up to the root
    #[serde(default)]
    pub chain: Vec<Hypothesis>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    /// Proposed, never executed by the engine
    #[serde(default)]
    pub remediation: Vec<ExecutionPlan>,
    pub iterations: u32,
    pub max_depth_reached: u32,
    #[serde(default)]
    pub trail: Vec<Transition>,
    pub summary: String,
}

impl DiagnosticConclusion {
    pub fn winner(&self) -> Option<&Hypothesis> {
        self.chain.first()
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self.status, ConclusionStatus::Incomplete { .. })
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self.status, ConclusionStatus::Inconclusive { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, ConclusionStatus::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hyp() -> Hypothesis {
        Hypothesis::new(1, Layer::Routing, "BGP session down", vec!["R1".into()])
    }

    #[test]
    fn test_cached_confidence_capped() {
        let mut h = hyp();
        h.record(Evidence::new(EvidenceSource::Cached, "telemetry_bgp", vec![], "1/2 down"), 0.9);
        assert_eq!(h.confidence(), QUICK_PASS_CEILING);
        assert!(h.invariant_holds());
    }

    #[test]
    fn test_live_evidence_lifts_ceiling() {
        let mut h = hyp();
        h.record(Evidence::new(EvidenceSource::Live, "show_bgp", vec![], "neighbor idle"), LIVE_CONFIDENCE_CEILING);
        assert_eq!(h.confidence(), LIVE_CONFIDENCE_CEILING);
        assert!(h.invariant_holds());
    }

    #[test]
    fn test_inconclusive_evidence_does_not_lift() {
        let mut h = hyp();
        h.attach(Evidence::new(EvidenceSource::Inconclusive, "show_bgp", vec![], "timeout"));
        h.set_confidence(0.8);
        assert_eq!(h.confidence(), QUICK_PASS_CEILING);
    }

    #[test]
    fn test_failed_reads_are_not_data() {
        let mut h = hyp();
        h.attach(Evidence::new(EvidenceSource::Inconclusive, "telemetry_bgp", vec![], "R1: refused"));
        assert!(!h.has_data());
        h.attach(Evidence::new(EvidenceSource::Cached, "telemetry_bgp", vec![], "0/1 violate"));
        assert!(h.has_data());
    }

    #[test]
    fn test_layer_order() {
        assert_eq!(Layer::Routing.deeper(), Some(Layer::Link));
        assert_eq!(Layer::Link.deeper(), None);
        assert_eq!("L3".parse::<Layer>().ok(), Some(Layer::Routing));
        assert!(matches!("l9".parse::<Layer>(), Err(NetpilotError::Validation(_))));
    }
}
