//! Health model for `netpilotctl status`.
//!
//! Built from live component state; nothing here is persisted.

use crate::config::Config;
use crate::memory::MemoryStats;
use crate::registry::ToolRegistry;
use crate::session::SessionSummary;
use netpilot_shared::{Layer, VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Tools, layers and inventory all present
    Healthy,
    /// Usable, but some strategy cannot run
    Degraded,
    /// Configuration does not validate
    Broken,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Broken => "BROKEN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub version: String,
    pub state: HealthState,
    pub classifier: String,
    pub tools: usize,
    pub mutating_tools: usize,
    /// Tool count per adapter kind
    pub adapters: BTreeMap<String, usize>,
    pub layers: Vec<Layer>,
    pub inventory: usize,
    pub memory: MemoryStats,
    pub pending_approvals: usize,
    pub sessions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl HealthReport {
    pub fn gather(
        config: &Config,
        registry: &ToolRegistry,
        classifier: &str,
        memory: MemoryStats,
        pending_approvals: usize,
        sessions: &[SessionSummary],
    ) -> Self {
        let mut adapters = BTreeMap::new();
        for descriptor in registry.descriptors() {
            let kind = registry.adapter_kind(&descriptor.name).unwrap_or("unknown");
            *adapters.entry(kind.to_string()).or_insert(0) += 1;
        }

        let mut problems = Vec::new();
        let mut state = HealthState::Healthy;
        if let Err(e) = config.validate() {
            problems.push(e.to_string());
            state = HealthState::Broken;
        }
        if registry.is_empty() {
            problems.push("no tools registered".to_string());
        }
        if config.diagnosis.layers.is_empty() {
            problems.push("no diagnosis layers configured; diagnostic queries will fail".to_string());
        }
        if config.inventory.is_empty() {
            problems.push("inventory is empty; selectors and default targets resolve to nothing".to_string());
        }
        for layer in &config.diagnosis.layers {
            for tool in [&layer.cached_tool, &layer.live_tool] {
                if registry.get(tool).is_err() {
                    problems.push(format!("diagnosis layer '{}' uses unknown tool '{}'", layer.layer, tool));
                }
            }
        }
        if state == HealthState::Healthy && !problems.is_empty() {
            state = HealthState::Degraded;
        }

        Self {
            version: VERSION.to_string(),
            state,
            classifier: classifier.to_string(),
            tools: registry.len(),
            mutating_tools: registry.descriptors().filter(|d| d.is_mutating()).count(),
            adapters,
            layers: config.diagnosis.layers.iter().map(|l| l.layer).collect(),
            inventory: config.inventory.len(),
            memory,
            pending_approvals,
            sessions: sessions.len(),
            problems,
        }
    }
}
