//! Shared fixtures: a six-router lab behind one ScriptedAdapter.

#![allow(dead_code)]

use netpilot_core::config::{DeviceConfig, LayerConfig, MemoryConfig, RemediationTemplate};
use netpilot_core::{Config, Orchestrator, ScriptedAdapter, ScriptedClassifier, ToolAdapter, ToolRegistry};
use netpilot_shared::tool::{FieldKind, FieldSpec, RiskLevel};
use netpilot_shared::{Comparator, Layer, RouteDecision, Strategy, ThresholdRule, ToolDescriptor, ToolSchema};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const ROUTERS: [&str; 6] = ["R1", "R2", "R3", "R4", "R5", "R6"];

pub struct Lab {
    pub orchestrator: Orchestrator,
    pub adapter: ScriptedAdapter,
    pub classifier: ScriptedClassifier,
    pub dir: TempDir,
}

impl Lab {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        tweak(&mut config);
        let adapter = ScriptedAdapter::new();
        let classifier = ScriptedClassifier::new();
        let orchestrator = Orchestrator::with_parts(config, registry(&adapter), Arc::new(classifier.clone()));
        Self { orchestrator, adapter, classifier, dir }
    }

    /// A second process over the same state directory and devices
    pub fn restart(&self) -> Orchestrator {
        Orchestrator::with_parts(
            self.orchestrator.config().clone(),
            registry(&self.adapter),
            Arc::new(self.classifier.clone()),
        )
    }
}

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn host() -> ToolSchema {
    ToolSchema::new(vec![FieldSpec::required("hostname", FieldKind::String)])
}

pub fn registry(adapter: &ScriptedAdapter) -> ToolRegistry {
    let a = || -> Arc<dyn ToolAdapter> { Arc::new(adapter.clone()) };
    let neighbor = ToolSchema::new(vec![
        FieldSpec::required("hostname", FieldKind::String),
        FieldSpec::required("neighbor", FieldKind::String),
    ]);
    ToolRegistry::builder()
        .tool(ToolDescriptor::read("bgp_peers", "Show BGP peers and their state", host()), a())
        .tool(ToolDescriptor::read("bgp_summary", "BGP established session count", host()), a())
        .tool(ToolDescriptor::read("bgp_cached", "Cached BGP telemetry", host()), a())
        .tool(ToolDescriptor::read("bgp_live", "Live BGP neighbor state", host()), a())
        .tool(ToolDescriptor::read("link_cached", "Cached interface telemetry", host()), a())
        .tool(ToolDescriptor::read("link_live", "Live interface state", host()), a())
        .tool(
            ToolDescriptor::mutate("bgp_neighbor_set", "Set the BGP neighbor address", neighbor, RiskLevel::High),
            a(),
        )
        .tool(
            ToolDescriptor::mutate("bgp_neighbor_fix", "Restore the BGP neighbor from intent", host(), RiskLevel::High),
            a(),
        )
        .build()
}

fn layer(layer: Layer, cached: &str, live: &str, field: &str, expected: Value) -> LayerConfig {
    LayerConfig {
        layer,
        cached_tool: cached.to_string(),
        live_tool: live.to_string(),
        target_param: "hostname".to_string(),
        health: ThresholdRule::new(field, Comparator::Eq, expected),
        keywords: Vec::new(),
        remediation: None,
    }
}

pub fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths.state_dir = dir.join("state");
    config.paths.inspections_dir = dir.join("inspections");
    config.memory = MemoryConfig { persist: false, ..MemoryConfig::default() };
    config.approval.timeout_secs = 60;
    config.inventory = ROUTERS
        .iter()
        .map(|name| {
            let mut attributes = BTreeMap::new();
            attributes.insert("role".to_string(), if *name <= "R3" { "core" } else { "edge" }.to_string());
            DeviceConfig { name: name.to_string(), attributes }
        })
        .collect();

    let mut routing = layer(Layer::Routing, "bgp_cached", "bgp_live", "state", json!("Established"));
    routing.remediation = Some(RemediationTemplate {
        tool: "bgp_neighbor_fix".to_string(),
        params: params(json!({"hostname": "{target}"})),
        description: "Restore the intended neighbor address".to_string(),
    });
    config.diagnosis.layers = vec![routing, layer(Layer::Link, "link_cached", "link_live", "oper", json!("up"))];
    config
}

pub fn fast(tool: &str, args: Value) -> RouteDecision {
    RouteDecision::new(Strategy::Fast, 0.9).with_tool(tool, params(args))
}

pub fn diagnose(targets: &[&str]) -> RouteDecision {
    RouteDecision::new(Strategy::Diagnostic, 0.85).with_targets(targets.iter().map(|t| t.to_string()).collect())
}
