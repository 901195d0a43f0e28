//! Inspection documents: declarative batch jobs loaded from YAML.
//!
//! ```yaml
//! name: bgp_health
//! description: Core routers must keep two established BGP sessions
//! devices:
//!   regex: "^core-"
//! checks:
//!   - name: bgp_peers
//!     tool: telemetry_bgp_summary
//!     threshold:
//!       field: bgp_established_count
//!       operator: ">="
//!       value: 2
//!       severity: critical
//!   - name: interface_errors
//!     intent: count interfaces with input errors
//! mode: parallel
//! max_workers: 10
//! failure_policy: continue
//! schedule:
//!   interval_secs: 3600
//! ```

use crate::error::{NetpilotError, Result};
use crate::threshold::ThresholdRule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Continue,
    StopOnFailure,
}

/// Target selection: an explicit list or a selector block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSelector {
    List(Vec<String>),
    Selector(SelectorSpec),
}

impl Default for TargetSelector {
    fn default() -> Self {
        TargetSelector::List(Vec::new())
    }
}

/// Exactly one of the fields must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit: Option<Vec<String>>,
    /// Regular expression over inventory names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// `key=value[,key=value]` over inventory attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl TargetSelector {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            TargetSelector::List(items) if items.is_empty() => {
                Err("no devices selected".to_string())
            }
            TargetSelector::List(_) => Ok(()),
            TargetSelector::Selector(spec) => {
                let set = [spec.explicit.is_some(), spec.regex.is_some(), spec.filter.is_some()]
                    .iter()
                    .filter(|s| **s)
                    .count();
                if set != 1 {
                    return Err("device selector needs exactly one of explicit, regex, filter".to_string());
                }
                if let Some(pattern) = &spec.regex {
                    regex::Regex::new(pattern).map_err(|e| format!("invalid device regex: {}", e))?;
                }
                if let Some(filter) = &spec.filter {
                    parse_attribute_filter(filter)?;
                }
                if matches!(&spec.explicit, Some(items) if items.is_empty()) {
                    return Err("no devices selected".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Parse `role=core,site=ams` into ordered pairs
pub fn parse_attribute_filter(filter: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for part in filter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                pairs.push((k.trim().to_string(), v.trim().to_string()));
            }
            _ => return Err(format!("invalid filter term '{}', expected key=value", part)),
        }
    }
    if pairs.is_empty() {
        return Err("empty device filter".to_string());
    }
    Ok(pairs)
}

/// One named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, alias = "params")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ThresholdRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thresholds: Vec<ThresholdRule>,
    /// Natural-language description resolved by the compile step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CheckSpec {
    pub fn rules(&self) -> Vec<ThresholdRule> {
        self.threshold
            .iter()
            .chain(self.thresholds.iter())
            .cloned()
            .collect()
    }

    /// Has a concrete tool bound
    pub fn is_compiled(&self) -> bool {
        self.tool.is_some()
    }
}

/// Recurring runs for the inspection daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "targets")]
    pub devices: TargetSelector,
    pub checks: Vec<CheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    /// Older documents use `parallel: true|false`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_failure: Option<bool>,
    /// Per-target timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl InspectionConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: InspectionConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match (self.mode, self.parallel) {
            (Some(mode), _) => mode,
            (None, Some(false)) => ExecutionMode::Serial,
            _ => ExecutionMode::Parallel,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match (self.failure_policy, self.stop_on_failure) {
            (Some(policy), _) => policy,
            (None, Some(true)) => FailurePolicy::StopOnFailure,
            _ => FailurePolicy::Continue,
        }
    }

    /// Worker cap actually used (serial mode runs one at a time)
    pub fn workers(&self) -> usize {
        match self.execution_mode() {
            ExecutionMode::Serial => 1,
            ExecutionMode::Parallel => self.max_workers.max(1),
        }
    }

    /// Daemon interval; `None` without an enabled schedule
    pub fn interval(&self) -> Option<Duration> {
        self.schedule
            .as_ref()
            .filter(|s| s.enabled)
            .map(|s| Duration::from_secs(s.interval_secs))
    }

    pub fn enabled_checks(&self) -> impl Iterator<Item = &CheckSpec> {
        self.checks.iter().filter(|c| c.enabled)
    }

    /// Structural validation; every problem is reported at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("inspection name must not be empty".to_string());
        }
        if let Err(e) = self.devices.validate() {
            problems.push(e);
        }
        if self.max_workers == 0 {
            problems.push("max_workers must be at least 1".to_string());
        }
        if matches!(&self.schedule, Some(s) if s.enabled && s.interval_secs == 0) {
            problems.push("schedule interval_secs must be at least 1".to_string());
        }
        if self.enabled_checks().next().is_none() {
            problems.push("inspection has no enabled checks".to_string());
        }

        let mut names = std::collections::HashSet::new();
        for check in &self.checks {
            if !names.insert(check.name.as_str()) {
                problems.push(format!("duplicate check name '{}'", check.name));
            }
            if check.tool.is_none() && check.intent.is_none() {
                problems.push(format!("check '{}' needs a tool or an intent", check.name));
            }
            for rule in check.rules() {
                if let Err(e) = rule.validate() {
                    problems.push(format!("check '{}': {}", check.name, e));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(NetpilotError::Validation(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_flags() {
        let cfg = InspectionConfig::from_yaml(
            "name: x\ndevices: [R1]\nparallel: false\nstop_on_failure: true\nchecks:\n  - name: c\n    tool: t\n",
        )
        .unwrap();
        assert_eq!(cfg.execution_mode(), ExecutionMode::Serial);
        assert_eq!(cfg.failure_policy(), FailurePolicy::StopOnFailure);
        assert_eq!(cfg.workers(), 1);
    }

    #[test]
    fn test_schedule() {
        let doc = "name: x\ndevices: [R1]\nchecks:\n  - name: c\n    tool: t\n";
        assert_eq!(InspectionConfig::from_yaml(doc).unwrap().interval(), None);

        let every = format!("{}schedule:\n  interval_secs: 300\n", doc);
        assert_eq!(InspectionConfig::from_yaml(&every).unwrap().interval(), Some(Duration::from_secs(300)));

        let off = format!("{}schedule:\n  enabled: false\n  interval_secs: 300\n", doc);
        assert_eq!(InspectionConfig::from_yaml(&off).unwrap().interval(), None);

        let zero = format!("{}schedule:\n  interval_secs: 0\n", doc);
        assert!(InspectionConfig::from_yaml(&zero).unwrap_err().to_string().contains("interval_secs"));
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!(
            parse_attribute_filter("role=core, site=ams").unwrap(),
            vec![("role".into(), "core".into()), ("site".into(), "ams".into())]
        );
        assert!(parse_attribute_filter("role").is_err());
    }

    #[test]
    fn test_validation_collects_problems() {
        let err = InspectionConfig::from_yaml(
            "name: x\ndevices:\n  regex: \"([\"\nchecks:\n  - name: c\n  - name: c\n    tool: t\n",
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("invalid device regex"));
        assert!(msg.contains("needs a tool or an intent"));
        assert!(msg.contains("duplicate check name"));
    }
}
