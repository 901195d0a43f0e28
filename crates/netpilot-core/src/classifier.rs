//! Intent classification - the router's single bounded inference call.
//!
//! `KeywordClassifier` is deterministic and always available; the router
//! falls back to it whenever the configured classifier errors or times out.
//! `LlmClassifier` talks to an Ollama-compatible `/api/chat` endpoint and
//! must return a structured decision.

use crate::adapters::TARGET_PARAMS;
use async_trait::async_trait;
use netpilot_shared::tool::FieldKind;
use netpilot_shared::{NetpilotError, Query, Result, RouteDecision, Strategy, ToolDescriptor};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Words that make a query about networking
const NETWORK_TERMS: &[&str] = &[
    "bgp", "ospf", "isis", "route", "routes", "routing", "interface", "interfaces", "vlan", "vxlan", "evpn",
    "mpls", "lldp", "arp", "mac", "link", "links", "port", "ports", "peer", "peers", "neighbor", "neighbors",
    "router", "routers", "switch", "switches", "device", "devices", "firewall", "acl", "prefix", "prefixes",
    "latency", "packet", "packets", "loss", "mtu", "tunnel", "overlay", "network", "ip", "ipv4", "ipv6",
    "subnet", "gateway", "dns", "nat", "qos", "uplink", "config", "configuration", "session", "sessions",
    "optic", "optics", "transceiver", "cpu", "memory", "errors", "crc", "lag", "lacp", "stp", "spanning",
];

const DIAGNOSTIC_TERMS: &[&str] = &[
    "why", "diagnose", "diagnosis", "troubleshoot", "root", "cause", "down", "flapping", "flap", "broken",
    "failing", "failed", "unreachable", "slow", "degraded", "intermittent", "drops", "dropping", "outage",
];

const BATCH_TERMS: &[&str] = &[
    "inspect", "inspection", "audit", "all", "every", "fleet", "batch", "compliance", "sweep",
];

const MUTATING_VERBS: &[&str] = &[
    "set", "change", "configure", "push", "shutdown", "shut", "enable", "disable", "apply", "update",
    "delete", "add", "remove", "restart", "bounce", "reset", "fix",
];

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Query mentions networking vocabulary
pub fn is_network_related(text: &str) -> bool {
    tokens(text).iter().any(|t| NETWORK_TERMS.contains(&t.as_str()))
}

// ============================================================================
// Classifier Trait
// ============================================================================

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &Query, catalog: &[ToolDescriptor]) -> Result<RouteDecision>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// Keyword Classifier
// ============================================================================

pub struct KeywordClassifier {
    inventory: Vec<String>,
    device_pattern: Option<Regex>,
}

impl KeywordClassifier {
    pub fn new(inventory: Vec<String>) -> Self {
        Self {
            inventory,
            // R1, core-sw01, leaf-2a
            device_pattern: Regex::new(r"\b[A-Za-z]+(?:[-_][A-Za-z]+)*[-_]?\d+[A-Za-z0-9]*\b").ok(),
        }
    }

    /// Known inventory names first, then anything shaped like a device name
    pub fn extract_targets(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut out: Vec<String> = self
            .inventory
            .iter()
            .filter(|d| tokens(&lower).contains(&d.to_lowercase()))
            .cloned()
            .collect();
        if let (true, Some(pattern)) = (out.is_empty(), &self.device_pattern) {
            for m in pattern.find_iter(text) {
                let candidate = m.as_str();
                if candidate.contains('=') || candidate.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                if !out.iter().any(|o| o.eq_ignore_ascii_case(candidate)) {
                    out.push(candidate.to_string());
                }
            }
        }
        out
    }

    fn pick_strategy(&self, words: &[String]) -> (Strategy, f64) {
        let has = |terms: &[&str]| words.iter().filter(|w| terms.contains(&w.as_str())).count();
        let batch = has(BATCH_TERMS);
        let diag = has(DIAGNOSTIC_TERMS);
        if batch > 0 && batch >= diag {
            (Strategy::Batch, (0.65 + 0.1 * batch as f64).min(0.9))
        } else if diag > 0 {
            (Strategy::Diagnostic, (0.65 + 0.1 * diag as f64).min(0.9))
        } else {
            (Strategy::Fast, 0.6)
        }
    }

    /// Best tool by name and description overlap. Mutating tools are only
    /// candidates when the query uses a change verb.
    fn pick_tool<'a>(&self, words: &[String], catalog: &'a [ToolDescriptor]) -> Option<(&'a ToolDescriptor, usize)> {
        let wants_change = words.iter().any(|w| MUTATING_VERBS.contains(&w.as_str()));
        catalog
            .iter()
            .filter(|d| wants_change || !d.is_mutating())
            .map(|d| {
                let name_hits = tokens(&d.name).iter().filter(|t| words.contains(t)).count();
                let desc_hits = tokens(&d.description)
                    .iter()
                    .filter(|t| t.len() > 2 && words.contains(t))
                    .count();
                let verb_bonus = usize::from(wants_change && d.is_mutating());
                (d, name_hits * 2 + desc_hits + verb_bonus)
            })
            .filter(|(_, score)| *score > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.name.cmp(&a.0.name)))
    }

    fn bind_params(&self, text: &str, tool: &ToolDescriptor, targets: &[String]) -> Map<String, Value> {
        let mut params = Map::new();
        for field in &tool.input.fields {
            if TARGET_PARAMS.contains(&field.name.as_str()) {
                if let Some(target) = targets.first() {
                    params.insert(field.name.clone(), Value::String(target.clone()));
                }
            }
        }
        for (key, raw) in text.split_whitespace().filter_map(|w| w.split_once('=')) {
            if let Some(field) = tool.input.field(key) {
                let value = match field.kind {
                    FieldKind::Integer => raw.parse::<i64>().map(Value::from).unwrap_or_else(|_| raw.into()),
                    FieldKind::Number => raw.parse::<f64>().map(Value::from).unwrap_or_else(|_| raw.into()),
                    FieldKind::Boolean => raw.parse::<bool>().map(Value::from).unwrap_or_else(|_| raw.into()),
                    _ => Value::String(raw.to_string()),
                };
                params.insert(field.name.clone(), value);
            }
        }
        params
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, query: &Query, catalog: &[ToolDescriptor]) -> Result<RouteDecision> {
        let words = tokens(&query.text);
        let (strategy, mut confidence) = self.pick_strategy(&words);
        let targets = if query.targets.is_empty() {
            self.extract_targets(&query.text)
        } else {
            query.targets.clone()
        };

        let mut decision = RouteDecision::new(strategy, confidence).with_targets(targets.clone());
        if strategy == Strategy::Fast {
            match self.pick_tool(&words, catalog) {
                Some((tool, score)) => {
                    confidence = (0.5 + 0.1 * score as f64).min(0.9);
                    let params = self.bind_params(&query.text, tool, &targets);
                    decision = RouteDecision::new(strategy, confidence)
                        .with_targets(targets)
                        .with_tool(&tool.name, params);
                }
                None => {
                    decision.confidence = 0.3;
                }
            }
        }
        debug!(
            "Keyword classification: {} ({:.2}) tool={:?}",
            decision.strategy, decision.confidence, decision.tool
        );
        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

// ============================================================================
// LLM Classifier
// ============================================================================

/// Decision shape requested from the model
#[derive(Debug, Deserialize)]
struct LlmDecision {
    strategy: String,
    confidence: f64,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct LlmClassifier {
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl LlmClassifier {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }

    fn system_prompt(catalog: &[ToolDescriptor]) -> String {
        let mut prompt = String::from(
            "You route network operations questions. Reply with JSON only: \
             {\"strategy\": \"fast|diagnostic|batch\", \"confidence\": 0..1, \"tool\": name or null, \
             \"params\": {}, \"targets\": [], \"reasoning\": \"...\"}.\n\
             fast = one lookup; diagnostic = find the cause of a fault; batch = same check on many devices.\n\
             Tools:\n",
        );
        for tool in catalog {
            let params: Vec<String> = tool
                .input
                .fields
                .iter()
                .map(|f| format!("{}:{}{}", f.name, f.kind.as_str(), if f.required { "" } else { "?" }))
                .collect();
            prompt.push_str(&format!(
                "- {} [{}] ({}) {}\n",
                tool.name,
                tool.capability,
                params.join(", "),
                tool.description
            ));
        }
        prompt
    }

    /// Parse the model's JSON content into a decision
    pub fn parse_decision(content: &str) -> Result<RouteDecision> {
        let raw: LlmDecision = serde_json::from_str(content.trim())
            .map_err(|e| NetpilotError::Internal(format!("classifier returned invalid JSON: {}", e)))?;
        let strategy: Strategy = raw
            .strategy
            .parse()
            .map_err(|_| NetpilotError::Internal(format!("classifier returned unknown strategy '{}'", raw.strategy)))?;
        if !raw.confidence.is_finite() {
            return Err(NetpilotError::Internal("classifier returned non-finite confidence".to_string()));
        }
        let mut decision = RouteDecision::new(strategy, raw.confidence).with_targets(raw.targets);
        if let Some(tool) = raw.tool.filter(|t| !t.is_empty()) {
            decision = decision.with_tool(&tool, raw.params);
        }
        decision.reasoning = raw.reasoning;
        Ok(decision)
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, query: &Query, catalog: &[ToolDescriptor]) -> Result<RouteDecision> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| NetpilotError::Internal(format!("http client: {}", e)))?;

        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "messages": [
                {"role": "system", "content": Self::system_prompt(catalog)},
                {"role": "user", "content": query.text},
            ],
        });

        let response = client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NetpilotError::ToolTimeout {
                        tool: "classifier".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    NetpilotError::tool("classifier", e.to_string())
                }
            })?;

        if !response.status().is_success() {
            warn!("Classifier request failed: {}", response.status());
            return Err(NetpilotError::tool("classifier", format!("HTTP {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| NetpilotError::tool("classifier", e.to_string()))?;
        let content = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let mut decision = Self::parse_decision(content)?;
        if decision.targets.is_empty() {
            decision.targets = query.targets.clone();
        }
        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

// ============================================================================
// Scripted Classifier (tests)
// ============================================================================

/// Returns queued decisions (or errors) in order; counts calls
#[derive(Clone, Default)]
pub struct ScriptedClassifier {
    queue: Arc<Mutex<VecDeque<std::result::Result<RouteDecision, String>>>>,
    fallback: Arc<Mutex<Option<RouteDecision>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decision returned once the queue is empty
    pub fn always(decision: RouteDecision) -> Self {
        let c = Self::default();
        if let Ok(mut f) = c.fallback.lock() {
            *f = Some(decision);
        }
        c
    }

    pub fn push(&self, decision: RouteDecision) -> &Self {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(Ok(decision));
        }
        self
    }

    pub fn push_error(&self, message: &str) -> &Self {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(Err(message.to_string()));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentClassifier for ScriptedClassifier {
    async fn classify(&self, _query: &Query, _catalog: &[ToolDescriptor]) -> Result<RouteDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(NetpilotError::tool("classifier", message)),
            None => self
                .fallback
                .lock()
                .ok()
                .and_then(|f| f.clone())
                .ok_or_else(|| NetpilotError::tool("classifier", "no scripted decision")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
