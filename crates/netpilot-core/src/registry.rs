//! Tool capability registry.
//!
//! Closed catalog of descriptors, resolved by explicit name lookup. Read-only
//! once built; shared behind an `Arc`. Mutating tools can only be invoked
//! with an [`ApprovedPlan`], which only the approval gate can produce.

use crate::adapters::{target_of, CommandAdapter, FixtureAdapter, ToolAdapter};
use crate::approval::ApprovedPlan;
use crate::config::{AdapterConfig, Config};
use netpilot_shared::{ExecutionPlan, NetpilotError, Result, ToolDescriptor, ToolOutput, ToolSchema};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct RegisteredTool {
    descriptor: ToolDescriptor,
    adapter: Arc<dyn ToolAdapter>,
}

pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    reads_issued: AtomicU64,
    mutations_issued: AtomicU64,
}

#[derive(Default)]
pub struct RegistryBuilder {
    tools: BTreeMap<String, RegisteredTool>,
}

impl RegistryBuilder {
    pub fn tool(mut self, descriptor: ToolDescriptor, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.tools.insert(descriptor.name.clone(), RegisteredTool { descriptor, adapter });
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            reads_issued: AtomicU64::new(0),
            mutations_issued: AtomicU64::new(0),
        }
    }
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build from `[[tools]]`; adapters are constructed here
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder();
        for tool in &config.tools {
            let adapter: Arc<dyn ToolAdapter> = match &tool.adapter {
                AdapterConfig::Fixture { data, file } => Arc::new(
                    FixtureAdapter::from_sources(data.clone(), file.as_deref()).map_err(|e| {
                        NetpilotError::Config(format!("tool '{}': fixture: {}", tool.name, e))
                    })?,
                ),
                AdapterConfig::Command { command, timeout_ms } => Arc::new(CommandAdapter::new(
                    command,
                    Duration::from_millis(timeout_ms.unwrap_or(config.fast.tool_timeout_ms)),
                )),
            };
            let descriptor = ToolDescriptor {
                name: tool.name.clone(),
                description: tool.description.clone(),
                capability: tool.capability,
                input: ToolSchema::new(tool.input.clone()),
                output: ToolSchema::new(tool.output.clone()),
                idempotent: tool.idempotent.unwrap_or(!tool.capability.is_mutating()),
                risk: tool.risk,
            };
            builder = builder.tool(descriptor, adapter);
        }
        let registry = builder.build();
        info!(
            "Registry loaded: {} tools ({} mutating)",
            registry.len(),
            registry.descriptors().filter(|d| d.is_mutating()).count()
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .map(|t| &t.descriptor)
            .ok_or_else(|| NetpilotError::UnknownTool(name.to_string()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor)
    }

    pub fn adapter_kind(&self, name: &str) -> Option<&'static str> {
        self.tools.get(name).map(|t| t.adapter.kind())
    }

    /// Whether the text names a registered tool
    pub fn mentions(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.tools.keys().any(|name| lower.contains(&name.to_lowercase()))
    }

    /// Validate parameters and produce a plan carrying the descriptor's capability
    pub fn bind(&self, name: &str, params: Map<String, Value>) -> Result<ExecutionPlan> {
        let descriptor = self.get(name)?;
        descriptor
            .input
            .validate(&params)
            .map_err(|violations| NetpilotError::SchemaViolation { tool: name.to_string(), violations })?;
        let target = target_of(&params).map(str::to_string);
        let mut plan = ExecutionPlan::new(name, descriptor.capability, params);
        plan.target = target;
        Ok(plan)
    }

    /// Invoke a read-only tool. Mutating tools are refused here.
    pub async fn invoke_read(&self, name: &str, params: &Map<String, Value>, limit: Duration) -> Result<ToolOutput> {
        let tool = self.lookup(name)?;
        if tool.descriptor.is_mutating() {
            warn!("Refusing direct invocation of mutating tool {}", name);
            return Err(NetpilotError::Validation(format!(
                "tool '{}' is mutating and requires approval",
                name
            )));
        }
        Self::check_params(&tool.descriptor, params)?;
        self.reads_issued.fetch_add(1, Ordering::Relaxed);
        Self::call(tool, params, limit).await
    }

    /// Invoke a mutating tool after the gate approved it
    pub(crate) async fn invoke_approved(&self, approved: &ApprovedPlan, limit: Duration) -> Result<ToolOutput> {
        let plan = approved.plan();
        let tool = self.lookup(&plan.tool)?;
        Self::check_params(&tool.descriptor, &plan.params)?;
        if tool.descriptor.is_mutating() {
            self.mutations_issued.fetch_add(1, Ordering::SeqCst);
            info!("Issuing approved mutation {} (request {})", plan.tool, approved.request_id());
        } else {
            self.reads_issued.fetch_add(1, Ordering::Relaxed);
        }
        Self::call(tool, &plan.params, limit).await
    }

    /// Mutating invocations issued since startup
    pub fn mutations_issued(&self) -> u64 {
        self.mutations_issued.load(Ordering::SeqCst)
    }

    pub fn reads_issued(&self) -> u64 {
        self.reads_issued.load(Ordering::Relaxed)
    }

    fn lookup(&self, name: &str) -> Result<&RegisteredTool> {
        self.tools
            .get(name)
            .ok_or_else(|| NetpilotError::UnknownTool(name.to_string()))
    }

    fn check_params(descriptor: &ToolDescriptor, params: &Map<String, Value>) -> Result<()> {
        descriptor.input.validate(params).map_err(|violations| NetpilotError::SchemaViolation {
            tool: descriptor.name.clone(),
            violations,
        })
    }

    async fn call(tool: &RegisteredTool, params: &Map<String, Value>, limit: Duration) -> Result<ToolOutput> {
        let name = &tool.descriptor.name;
        debug!("Invoking {} via {} adapter", name, tool.adapter.kind());
        match timeout(limit, tool.adapter.invoke(name, params)).await {
            Ok(Ok(value)) => Ok(ToolOutput::from_value(name, target_of(params), value)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Tool {} timed out after {}ms", name, limit.as_millis());
                Err(NetpilotError::ToolTimeout {
                    tool: name.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }
}
