//! Tool adapters - backends behind the invocation contract.
//!
//! Every backend (telemetry store, CMDB, device command runner) answers
//! `invoke(tool, params) -> data | error`. Production configs use
//! `FixtureAdapter` for snapshot data and `CommandAdapter` for anything
//! reachable through a command line. Tests use `ScriptedAdapter`.

use async_trait::async_trait;
use netpilot_shared::{NetpilotError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Parameter names that identify the device an invocation is about
pub const TARGET_PARAMS: [&str; 4] = ["hostname", "target", "device", "host"];

/// Key used for data that applies to any target
pub const DEFAULT_KEY: &str = "_default";

/// Extract the target name from invocation parameters
pub fn target_of(params: &Map<String, Value>) -> Option<&str> {
    TARGET_PARAMS
        .iter()
        .find_map(|k| params.get(*k).and_then(Value::as_str))
}

// ============================================================================
// Adapter Trait
// ============================================================================

#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Run one operation. Parameters are already schema-validated.
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> Result<Value>;

    /// Backend name for logs and status
    fn kind(&self) -> &'static str;
}

// ============================================================================
// Fixture Adapter
// ============================================================================

/// Serves canned records per target
pub struct FixtureAdapter {
    data: BTreeMap<String, Value>,
}

impl FixtureAdapter {
    pub fn new(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Merge inline data with a JSON file of `{target: records}`
    pub fn from_sources(mut inline: BTreeMap<String, Value>, file: Option<&Path>) -> Result<Self> {
        if let Some(path) = file {
            let text = std::fs::read_to_string(path)?;
            let from_file: BTreeMap<String, Value> = serde_json::from_str(&text)?;
            for (k, v) in from_file {
                inline.entry(k).or_insert(v);
            }
        }
        Ok(Self::new(inline))
    }
}

#[async_trait]
impl ToolAdapter for FixtureAdapter {
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> Result<Value> {
        let target = target_of(params);
        let hit = target
            .and_then(|t| self.data.get(t))
            .or_else(|| self.data.get(DEFAULT_KEY));
        match hit {
            Some(value) => Ok(value.clone()),
            None => Err(NetpilotError::tool(
                tool,
                format!("no data for target '{}'", target.unwrap_or("-")),
            )),
        }
    }

    fn kind(&self) -> &'static str {
        "fixture"
    }
}

// ============================================================================
// Command Adapter
// ============================================================================

/// Runs a shell command template and parses JSON from stdout
pub struct CommandAdapter {
    template: String,
    timeout: Duration,
}

impl CommandAdapter {
    pub fn new(template: &str, timeout: Duration) -> Self {
        Self { template: template.to_string(), timeout }
    }

    /// Substitute `{name}` placeholders with shell-quoted parameter values
    pub fn render(&self, params: &Map<String, Value>) -> String {
        let mut cmd = self.template.clone();
        for (key, value) in params {
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            cmd = cmd.replace(&format!("{{{}}}", key), &shell_quote(&raw));
        }
        cmd
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl ToolAdapter for CommandAdapter {
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> Result<Value> {
        let cmd = self.render(params);
        debug!("Running command for {}: {}", tool, cmd);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(NetpilotError::tool(tool, format!("failed to spawn: {}", e))),
            Err(_) => {
                warn!("Command for {} timed out after {:?}", tool, self.timeout);
                return Err(NetpilotError::ToolTimeout {
                    tool: tool.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NetpilotError::tool(
                tool,
                format!("exit {}: {}", output.status.code().unwrap_or(-1), stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_json::json!({ "output": stdout.trim() })),
        }
    }

    fn kind(&self) -> &'static str {
        "command"
    }
}

// ============================================================================
// Scripted Adapter (tests and demos)
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Respond(Value),
    Fail(String),
}

#[derive(Debug, Clone, Default)]
struct Script {
    once: VecDeque<Step>,
    steady: Option<Step>,
    delay: Option<Duration>,
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub tool: String,
    pub params: Map<String, Value>,
}

/// Programmable in-memory backend that records every call
#[derive(Default, Clone)]
pub struct ScriptedAdapter {
    scripts: Arc<Mutex<HashMap<(String, String), Script>>>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tool: &str, target: Option<&str>) -> (String, String) {
        (tool.to_string(), target.unwrap_or(DEFAULT_KEY).to_string())
    }

    fn edit(&self, tool: &str, target: Option<&str>, f: impl FnOnce(&mut Script)) {
        if let Ok(mut scripts) = self.scripts.lock() {
            f(scripts.entry(Self::key(tool, target)).or_default());
        }
    }

    /// Always answer with `value`
    pub fn respond(&self, tool: &str, target: Option<&str>, value: Value) -> &Self {
        self.edit(tool, target, |s| s.steady = Some(Step::Respond(value)));
        self
    }

    /// Answer the next call only
    pub fn respond_once(&self, tool: &str, target: Option<&str>, value: Value) -> &Self {
        self.edit(tool, target, |s| s.once.push_back(Step::Respond(value)));
        self
    }

    /// Always fail
    pub fn fail(&self, tool: &str, target: Option<&str>, message: &str) -> &Self {
        let message = message.to_string();
        self.edit(tool, target, |s| s.steady = Some(Step::Fail(message)));
        self
    }

    /// Fail the next call only
    pub fn fail_once(&self, tool: &str, target: Option<&str>, message: &str) -> &Self {
        let message = message.to_string();
        self.edit(tool, target, |s| s.once.push_back(Step::Fail(message)));
        self
    }

    /// Sleep before answering (use with a short caller timeout to simulate hangs)
    pub fn delay(&self, tool: &str, target: Option<&str>, delay: Duration) -> &Self {
        self.edit(tool, target, |s| s.delay = Some(delay));
        self
    }

    pub fn calls(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|i| i.tool == tool).count())
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_step(&self, tool: &str, target: Option<&str>) -> (Option<Step>, Option<Duration>) {
        let Ok(mut scripts) = self.scripts.lock() else {
            return (None, None);
        };
        for key in [Self::key(tool, target), Self::key(tool, None)] {
            if let Some(script) = scripts.get_mut(&key) {
                let step = script.once.pop_front().or_else(|| script.steady.clone());
                if step.is_some() {
                    return (step, script.delay);
                }
            }
        }
        (None, None)
    }
}

#[async_trait]
impl ToolAdapter for ScriptedAdapter {
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> Result<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Invocation { tool: tool.to_string(), params: params.clone() });
        }

        let (step, delay) = self.next_step(tool, target_of(params));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            Some(Step::Respond(value)) => Ok(value),
            Some(Step::Fail(message)) => Err(NetpilotError::tool(tool, message)),
            None => Err(NetpilotError::tool(tool, "no scripted response")),
        }
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }
}
