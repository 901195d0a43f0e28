//! Live probes for INSPECT.
//!
//! One task per selected layer, all bounded by the probe timeout. Results
//! are collected only after every task finished; a cancelled session aborts
//! the whole set.

use crate::registry::ToolRegistry;
use netpilot_shared::threshold::evaluate_records;
use netpilot_shared::{Layer, NetpilotError, Result, RuleOutcome, ThresholdRule};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub hypothesis: u32,
    pub layer: Layer,
    pub tool: String,
    pub target_param: String,
    pub targets: Vec<String>,
    pub health: ThresholdRule,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Live data violates the health rule on these targets
    Anomalous { targets: Vec<String>, detail: String },
    /// Live data shows every probed target healthy
    Healthy { targets: Vec<String> },
    Inconclusive { reason: String },
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub hypothesis: u32,
    pub layer: Layer,
    pub tool: String,
    pub outcome: ProbeOutcome,
}

pub fn target_params(param: &str, target: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(param.to_string(), Value::String(target.to_string()));
    params
}

/// Probe every target of one layer with the live tool
pub async fn probe_layer(registry: &ToolRegistry, request: &ProbeRequest, limit: Duration) -> ProbeOutcome {
    let mut anomalous = Vec::new();
    let mut healthy = Vec::new();
    let mut details = Vec::new();
    let mut unknown = Vec::new();

    for target in &request.targets {
        let params = target_params(&request.target_param, target);
        match registry.invoke_read(&request.tool, &params, limit).await {
            Ok(output) => match evaluate_records(&request.health, target, &output.records) {
                RuleOutcome::Violation(v) => {
                    anomalous.push(target.clone());
                    details.push(v.message);
                }
                RuleOutcome::Pass => healthy.push(target.clone()),
                RuleOutcome::Missing { field } => unknown.push(format!("{}: no '{}' in live data", target, field)),
            },
            Err(e) => unknown.push(format!("{}: {}", target, e)),
        }
    }

    if !anomalous.is_empty() {
        ProbeOutcome::Anomalous { targets: anomalous, detail: details.join("; ") }
    } else if unknown.is_empty() && !healthy.is_empty() {
        ProbeOutcome::Healthy { targets: healthy }
    } else if unknown.is_empty() {
        ProbeOutcome::Inconclusive { reason: "no targets to probe".to_string() }
    } else {
        ProbeOutcome::Inconclusive { reason: unknown.join("; ") }
    }
}

/// Run all probes concurrently and wait for every one of them
pub async fn run_probes(
    registry: Arc<ToolRegistry>,
    requests: Vec<ProbeRequest>,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<ProbeResult>> {
    let mut set = JoinSet::new();
    for request in requests {
        let registry = registry.clone();
        set.spawn(async move {
            let outcome = match timeout(limit, probe_layer(&registry, &request, limit)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Live probe {} for {} timed out after {}ms", request.tool, request.layer, limit.as_millis());
                    ProbeOutcome::Inconclusive {
                        reason: format!("{} timed out after {}ms", request.tool, limit.as_millis()),
                    }
                }
            };
            ProbeResult {
                hypothesis: request.hypothesis,
                layer: request.layer,
                tool: request.tool,
                outcome,
            }
        });
    }

    let mut results = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                set.abort_all();
                return Err(NetpilotError::Session("diagnosis cancelled".to_string()));
            }
            next = set.join_next() => match next {
                Some(Ok(result)) => {
                    debug!("Probe for {} finished: {:?}", result.layer, result.outcome);
                    results.push(result);
                }
                Some(Err(e)) => warn!("Probe task failed: {}", e),
                None => break,
            }
        }
    }

    results.sort_by_key(|r| r.hypothesis);
    Ok(results)
}
