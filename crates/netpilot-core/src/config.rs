//! Configuration management for netpilot.
//!
//! Lookup order: `--config` flag, `$NETPILOT_CONFIG`, /etc/netpilot/config.toml,
//! then built-in defaults. Every section is optional.

use anyhow::{bail, Context, Result};
use netpilot_shared::tool::{Capability, FieldSpec, RiskLevel};
use netpilot_shared::{Layer, ThresholdRule};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// System config file path
pub const CONFIG_PATH: &str = "/etc/netpilot/config.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "NETPILOT_CONFIG";

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Deterministic keyword rules only
    Keyword,
    /// Ollama-compatible chat endpoint, keyword rules as fallback
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Below this a decision is treated as low confidence
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    #[serde(default = "default_classifier")]
    pub classifier: ClassifierKind,
}

fn default_confidence_floor() -> f64 {
    0.6
}

fn default_classifier() -> ClassifierKind {
    ClassifierKind::Keyword
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            classifier: default_classifier(),
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Jaccard acceptance threshold
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,

    /// Older records are flagged stale
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,

    /// Confidence halves every `half_life_secs`
    #[serde(default = "default_half_life")]
    pub half_life_secs: u64,

    /// Records whose decayed confidence drops below this are misses
    #[serde(default = "default_memory_floor")]
    pub confidence_floor: f64,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Write a snapshot to the state directory after each store
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_similarity() -> f64 {
    0.8
}

fn default_staleness() -> u64 {
    300
}

fn default_half_life() -> u64 {
    7 * 24 * 3600
}

fn default_memory_floor() -> f64 {
    0.3
}

fn default_capacity() -> usize {
    1024
}

fn default_persist() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity(),
            staleness_secs: default_staleness(),
            half_life_secs: default_half_life(),
            confidence_floor: default_memory_floor(),
            capacity: default_capacity(),
            persist: default_persist(),
        }
    }
}

// ============================================================================
// Fast executor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastConfig {
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_ms: u64,

    /// Records echoed in the answer text
    #[serde(default = "default_preview_records")]
    pub preview_records: usize,
}

fn default_tool_timeout() -> u64 {
    10_000
}

fn default_preview_records() -> usize {
    5
}

impl Default for FastConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout(),
            preview_records: default_preview_records(),
        }
    }
}

// ============================================================================
// Diagnosis
// ============================================================================

/// Proposed fix for a layer; `{target}` in string values is substituted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationTemplate {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub layer: Layer,

    /// Read tool over cached telemetry (QUICK_PASS)
    pub cached_tool: String,

    /// Read tool querying the device (INSPECT)
    pub live_tool: String,

    /// Parameter that carries the target name
    #[serde(default = "default_target_param")]
    pub target_param: String,

    /// A record violating this rule is an anomaly
    pub health: ThresholdRule,

    /// Query words that raise this layer's prior
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationTemplate>,
}

fn default_target_param() -> String {
    "hostname".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Winner confidence needed to stop recursing
    #[serde(default = "default_conclude_threshold")]
    pub conclude_threshold: f64,

    /// Minimum gap between the top two hypotheses
    #[serde(default = "default_recursion_margin")]
    pub recursion_margin: f64,

    /// Minimum SUPERVISE score for a layer to be inspected
    #[serde(default = "default_inspect_floor")]
    pub inspect_floor: f64,

    #[serde(default = "default_max_inspect_layers")]
    pub max_inspect_layers: usize,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_knowledge_weight")]
    pub knowledge_weight: f64,

    #[serde(default = "default_memory_weight")]
    pub memory_weight: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerConfig>,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_depth() -> u32 {
    3
}

fn default_conclude_threshold() -> f64 {
    0.8
}

fn default_recursion_margin() -> f64 {
    0.15
}

fn default_inspect_floor() -> f64 {
    0.3
}

fn default_max_inspect_layers() -> usize {
    2
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_knowledge_weight() -> f64 {
    0.2
}

fn default_memory_weight() -> f64 {
    0.1
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_depth: default_max_depth(),
            conclude_threshold: default_conclude_threshold(),
            recursion_margin: default_recursion_margin(),
            inspect_floor: default_inspect_floor(),
            max_inspect_layers: default_max_inspect_layers(),
            probe_timeout_ms: default_probe_timeout(),
            knowledge_weight: default_knowledge_weight(),
            memory_weight: default_memory_weight(),
            layers: Vec::new(),
        }
    }
}

impl DiagnosisConfig {
    pub fn layer(&self, layer: Layer) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.layer == layer)
    }
}

// ============================================================================
// Batch, approval, LLM, paths
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_target_timeout")]
    pub target_timeout_ms: u64,
}

fn default_max_workers() -> usize {
    10
}

fn default_target_timeout() -> u64 {
    10_000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            target_timeout_ms: default_target_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Unresolved requests older than this count as rejected
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

fn default_approval_timeout() -> u64 {
    900
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { timeout_secs: default_approval_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Hard limit on the single classification call
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:3b-instruct".to_string()
}

fn default_llm_timeout() -> u64 {
    4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Sessions and the memory snapshot live here
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Named inspection documents (`<name>.yaml`)
    #[serde(default = "default_inspections_dir")]
    pub inspections_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("netpilot"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/netpilot"))
}

fn default_inspections_dir() -> PathBuf {
    PathBuf::from("/etc/netpilot/inspections")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            inspections_dir: default_inspections_dir(),
        }
    }
}

impl PathsConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn memory_snapshot(&self) -> PathBuf {
        self.state_dir.join("memory.json")
    }
}

// ============================================================================
// Tools and inventory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AdapterConfig {
    /// Canned records keyed by target (`_default` for any target)
    Fixture {
        #[serde(default)]
        data: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
    },
    /// Shell command template; `{param}` placeholders are substituted
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub capability: Capability,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,

    #[serde(default)]
    pub risk: RiskLevel,

    #[serde(default)]
    pub input: Vec<FieldSpec>,

    #[serde(default)]
    pub output: Vec<FieldSpec>,

    pub adapter: AdapterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub fast: FastConfig,

    #[serde(default)]
    pub diagnosis: DiagnosisConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inventory: Vec<DeviceConfig>,
}

impl Config {
    /// Resolve and load the config. An explicitly named file must exist;
    /// the system path falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = explicit {
            Self::load_from_path(path)?
        } else if let Ok(path) = std::env::var(CONFIG_ENV) {
            Self::load_from_path(Path::new(&path))
                .with_context(|| format!("{} points to an unusable file", CONFIG_ENV))?
        } else if Path::new(CONFIG_PATH).exists() {
            Self::load_from_path(Path::new(CONFIG_PATH))?
        } else {
            warn!("Config not found, using defaults");
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.resolve_relative_paths(path.parent());
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Fixture files are relative to the config file
    fn resolve_relative_paths(&mut self, base: Option<&Path>) {
        let Some(base) = base else { return };
        for tool in &mut self.tools {
            if let AdapterConfig::Fixture { file: Some(file), .. } = &mut tool.adapter {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        if self.paths.inspections_dir.is_relative() {
            self.paths.inspections_dir = base.join(&self.paths.inspections_dir);
        }
    }

    /// Range and cross-reference checks
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let unit = [
            ("router.confidence_floor", self.router.confidence_floor),
            ("memory.similarity_threshold", self.memory.similarity_threshold),
            ("memory.confidence_floor", self.memory.confidence_floor),
            ("diagnosis.conclude_threshold", self.diagnosis.conclude_threshold),
            ("diagnosis.recursion_margin", self.diagnosis.recursion_margin),
            ("diagnosis.inspect_floor", self.diagnosis.inspect_floor),
            ("diagnosis.knowledge_weight", self.diagnosis.knowledge_weight),
            ("diagnosis.memory_weight", self.diagnosis.memory_weight),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                problems.push(format!("{} must be within [0, 1], got {}", name, value));
            }
        }

        if self.diagnosis.max_iterations == 0 {
            problems.push("diagnosis.max_iterations must be at least 1".to_string());
        }
        if self.batch.max_workers == 0 {
            problems.push("batch.max_workers must be at least 1".to_string());
        }
        if self.memory.capacity == 0 {
            problems.push("memory.capacity must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                problems.push(format!("tool '{}' is declared twice", tool.name));
            }
        }

        let mut layers = std::collections::HashSet::new();
        for layer in &self.diagnosis.layers {
            if !layers.insert(layer.layer) {
                problems.push(format!("diagnosis layer '{}' is declared twice", layer.layer));
            }
            for tool_name in [&layer.cached_tool, &layer.live_tool] {
                if let Some(tool) = self.tools.iter().find(|t| &t.name == tool_name) {
                    if tool.capability.is_mutating() {
                        problems.push(format!(
                            "diagnosis layer '{}' references mutating tool '{}'",
                            layer.layer, tool_name
                        ));
                    }
                }
            }
            if let Err(e) = layer.health.validate() {
                problems.push(format!("diagnosis layer '{}': {}", layer.layer, e));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!("Invalid configuration: {}", problems.join("; "))
        }
    }

    /// Save config to path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.router.confidence_floor, 0.6);
        assert_eq!(config.memory.similarity_threshold, 0.8);
        assert_eq!(config.memory.staleness_secs, 300);
        assert_eq!(config.diagnosis.max_iterations, 5);
        assert_eq!(config.batch.max_workers, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config = Config::from_toml(
            r#"
[router]
confidence_floor = 0.5

[[tools]]
name = "telemetry_bgp"
capability = "read"
input = [{ name = "hostname", kind = "string", required = true }]
adapter = { kind = "fixture", data = { R1 = [{ peer = "10.0.0.2", state = "Established" }] } }

[[tools]]
name = "device_config_push"
capability = "mutate"
risk = "high"
adapter = { kind = "command", command = "echo '{}'" }
"#,
        )
        .unwrap();
        assert_eq!(config.router.confidence_floor, 0.5);
        assert_eq!(config.memory.capacity, 1024);
        assert_eq!(config.tools.len(), 2);
        assert!(config.tools[1].capability.is_mutating());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = Config::from_toml("[memory]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("memory.similarity_threshold"));
    }

    #[test]
    fn test_rejects_unknown_adapter_kind() {
        let err = Config::from_toml(
            "[[tools]]\nname = \"x\"\ncapability = \"read\"\nadapter = { kind = \"snmp\" }\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_mutating_diagnosis_tool() {
        let err = Config::from_toml(
            r#"
[[tools]]
name = "push"
capability = "mutate"
adapter = { kind = "command", command = "true" }

[[diagnosis.layers]]
layer = "routing"
cached_tool = "push"
live_tool = "push"
health = { field = "state", operator = "==", value = "Established" }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutating tool 'push'"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.paths.state_dir = dir.path().join("state");
        config.save(&path).unwrap();
        let loaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded.paths.state_dir, dir.path().join("state"));
    }
}
