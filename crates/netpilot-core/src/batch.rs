//! Batch executor: one validated read plan fanned out over many targets,
//! followed by deterministic threshold checks.

use crate::adapters::TARGET_PARAMS;
use crate::classifier::IntentClassifier;
use crate::config::DeviceConfig;
use crate::registry::ToolRegistry;
use chrono::Utc;
use netpilot_shared::inspection::{parse_attribute_filter, SelectorSpec};
use netpilot_shared::threshold::evaluate_records;
use netpilot_shared::{
    BatchReport, CheckSpec, ExecutionMode, ExecutionPlan, FailurePolicy, InspectionConfig, NetpilotError, Query,
    Result, RuleOutcome, TargetOutcome, TargetSelector, TargetStatus, ThresholdRule, ToolDescriptor,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one check is fanned out
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub mode: ExecutionMode,
    pub workers: usize,
    pub policy: FailurePolicy,
    pub target_timeout: Duration,
}

pub struct BatchExecutor {
    registry: Arc<ToolRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    inventory: Vec<DeviceConfig>,
    max_workers: usize,
    target_timeout: Duration,
}

impl BatchExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        classifier: Arc<dyn IntentClassifier>,
        inventory: Vec<DeviceConfig>,
        max_workers: usize,
        target_timeout: Duration,
    ) -> Self {
        Self { registry, classifier, inventory, max_workers: max_workers.max(1), target_timeout }
    }

    pub fn default_options(&self) -> BatchOptions {
        BatchOptions {
            mode: ExecutionMode::Parallel,
            workers: self.max_workers,
            policy: FailurePolicy::Continue,
            target_timeout: self.target_timeout,
        }
    }

    /// Run one plan on every target and check the rules. Cancelling `cancel`
    /// aborts reads in flight; their targets are reported as skipped.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        targets: &[String],
        rules: &[ThresholdRule],
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let started_at = Utc::now();
        let stop = cancel.child_token();
        let results = self
            .run_check(&plan.tool, plan, targets, rules, self.default_options(), &stop)
            .await?;
        Ok(BatchReport::new(&plan.tool, started_at, targets.to_vec(), results, stop.is_cancelled()))
    }

    /// Run an inspection document
    pub async fn run_inspection(&self, config: &InspectionConfig, cancel: &CancellationToken) -> Result<BatchReport> {
        config.validate()?;
        let started_at = Utc::now();
        let targets = self.resolve_targets(&config.devices)?;
        let options = BatchOptions {
            mode: config.execution_mode(),
            workers: config.workers().min(self.max_workers),
            policy: config.failure_policy(),
            target_timeout: config.timeout_secs.map(Duration::from_secs).unwrap_or(self.target_timeout),
        };
        info!(
            "Inspection '{}': {} target(s), {} check(s), {:?} with {} worker(s)",
            config.name,
            targets.len(),
            config.enabled_checks().count(),
            options.mode,
            options.workers
        );

        // Compile and validate everything before the first invocation
        let mut compiled = Vec::new();
        for check in config.enabled_checks() {
            let check = self.compile(check).await?;
            let plan = self.plan_for(&check)?;
            compiled.push((check, plan));
        }

        // Stop-on-failure cancels only this run, never the session
        let stop = cancel.child_token();
        let mut results = Vec::new();
        for (check, plan) in &compiled {
            if stop.is_cancelled() {
                results.extend(targets.iter().map(|t| skipped(t, &check.name)));
                continue;
            }
            let rules = check.rules();
            results.extend(self.run_check(&check.name, plan, &targets, &rules, options, &stop).await?);
        }

        let report = BatchReport::new(&config.name, started_at, targets, results, stop.is_cancelled());
        info!("Inspection '{}' finished: {}", config.name, report.summary);
        Ok(report)
    }

    /// Resolve a selector against the inventory
    pub fn resolve_targets(&self, selector: &TargetSelector) -> Result<Vec<String>> {
        let targets = match selector {
            TargetSelector::List(items) => items.clone(),
            TargetSelector::Selector(SelectorSpec { explicit: Some(items), .. }) => items.clone(),
            TargetSelector::Selector(SelectorSpec { regex: Some(pattern), .. }) => {
                let re = Regex::new(pattern)
                    .map_err(|e| NetpilotError::Validation(format!("invalid device regex: {}", e)))?;
                self.inventory.iter().filter(|d| re.is_match(&d.name)).map(|d| d.name.clone()).collect()
            }
            TargetSelector::Selector(SelectorSpec { filter: Some(filter), .. }) => {
                let pairs = parse_attribute_filter(filter).map_err(NetpilotError::Validation)?;
                self.inventory
                    .iter()
                    .filter(|d| pairs.iter().all(|(k, v)| d.attributes.get(k).map(|a| a == v).unwrap_or(false)))
                    .map(|d| d.name.clone())
                    .collect()
            }
            TargetSelector::Selector(_) => Vec::new(),
        };

        let mut unique = Vec::new();
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        if unique.is_empty() {
            return Err(NetpilotError::Validation("device selector matched no devices".to_string()));
        }
        Ok(unique)
    }

    /// Resolve an intent-described check into a concrete read tool
    pub async fn compile(&self, check: &CheckSpec) -> Result<CheckSpec> {
        if check.is_compiled() {
            return Ok(check.clone());
        }
        let intent = check
            .intent
            .as_deref()
            .ok_or_else(|| NetpilotError::Validation(format!("check '{}' needs a tool or an intent", check.name)))?;
        let catalog: Vec<ToolDescriptor> = self.registry.descriptors().filter(|d| !d.is_mutating()).cloned().collect();
        let decision = self.classifier.classify(&Query::new(intent), &catalog).await?;
        let tool = decision.tool.ok_or_else(|| {
            NetpilotError::Validation(format!("check '{}': no tool matches intent '{}'", check.name, intent))
        })?;

        let mut parameters: Map<String, Value> = decision
            .params
            .into_iter()
            .filter(|(k, _)| !TARGET_PARAMS.contains(&k.as_str()))
            .collect();
        parameters.extend(check.parameters.clone());
        debug!("Compiled check '{}' to {}", check.name, tool);
        Ok(CheckSpec { tool: Some(tool), parameters, ..check.clone() })
    }

    fn plan_for(&self, check: &CheckSpec) -> Result<ExecutionPlan> {
        let tool = check
            .tool
            .as_deref()
            .ok_or_else(|| NetpilotError::Validation(format!("check '{}' was not compiled", check.name)))?;
        let descriptor = self.registry.get(tool)?;
        Ok(ExecutionPlan::new(tool, descriptor.capability, check.parameters.clone()))
    }

    fn target_param(descriptor: &ToolDescriptor) -> String {
        TARGET_PARAMS
            .iter()
            .find(|p| descriptor.input.field(p).is_some())
            .unwrap_or(&TARGET_PARAMS[0])
            .to_string()
    }

    async fn run_check(
        &self,
        check: &str,
        plan: &ExecutionPlan,
        targets: &[String],
        rules: &[ThresholdRule],
        options: BatchOptions,
        stop: &CancellationToken,
    ) -> Result<Vec<TargetOutcome>> {
        let descriptor = self.registry.get(&plan.tool)?;
        if descriptor.is_mutating() {
            return Err(NetpilotError::Validation(format!(
                "check '{}': tool '{}' is mutating; batch jobs are read-only",
                check, plan.tool
            )));
        }
        for rule in rules {
            rule.validate()
                .map_err(|e| NetpilotError::Validation(format!("check '{}': {}", check, e)))?;
        }

        let target_param = Self::target_param(descriptor);
        let params_for = |target: &str| {
            let mut params = plan.params.clone();
            params.insert(target_param.clone(), Value::String(target.to_string()));
            params
        };
        if let Some(first) = targets.first() {
            let params = params_for(first);
            descriptor
                .input
                .validate(&params)
                .map_err(|violations| NetpilotError::SchemaViolation { tool: plan.tool.clone(), violations })?;
        }

        let job = Arc::new(Job {
            registry: self.registry.clone(),
            check: check.to_string(),
            tool: plan.tool.clone(),
            rules: rules.to_vec(),
            timeout: options.target_timeout,
            policy: options.policy,
        });

        let mut results = Vec::with_capacity(targets.len());
        match options.mode {
            ExecutionMode::Serial => {
                for target in targets {
                    let outcome = tokio::select! {
                        biased;
                        _ = stop.cancelled() => skipped(target, check),
                        outcome = job.run_one(target, params_for(target), stop) => outcome,
                    };
                    results.push(outcome);
                }
            }
            ExecutionMode::Parallel => {
                let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
                let mut set = JoinSet::new();
                for target in targets {
                    let job = job.clone();
                    let semaphore = semaphore.clone();
                    let stop = stop.clone();
                    let target = target.clone();
                    let params = params_for(&target);
                    set.spawn(async move {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return skipped(&target, &job.check);
                        };
                        job.run_one(&target, params, &stop).await
                    });
                }
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => {
                            set.abort_all();
                            break;
                        }
                        joined = set.join_next() => match joined {
                            Some(joined) => collect(&mut results, joined, check),
                            None => break,
                        },
                    }
                }
                // Tasks that finished before the abort still report
                while let Some(joined) = set.join_next().await {
                    collect(&mut results, joined, check);
                }
                for target in targets {
                    if !results.iter().any(|r| &r.target == target) {
                        results.push(skipped(target, check));
                    }
                }
            }
        }
        if stop.is_cancelled() {
            info!("Check '{}' stopped: {} of {} target(s) skipped", check, count_skipped(&results), targets.len());
        }
        Ok(results)
    }
}

fn collect(results: &mut Vec<TargetOutcome>, joined: std::result::Result<TargetOutcome, tokio::task::JoinError>, check: &str) {
    match joined {
        Ok(outcome) => results.push(outcome),
        Err(e) if e.is_cancelled() => debug!("Batch task for {} aborted", check),
        Err(e) => warn!("Batch task for {} failed: {}", check, e),
    }
}

fn count_skipped(results: &[TargetOutcome]) -> usize {
    results.iter().filter(|r| r.status == TargetStatus::Skipped).count()
}

struct Job {
    registry: Arc<ToolRegistry>,
    check: String,
    tool: String,
    rules: Vec<ThresholdRule>,
    timeout: Duration,
    policy: FailurePolicy,
}

impl Job {
    async fn run_one(&self, target: &str, params: Map<String, Value>, stop: &CancellationToken) -> TargetOutcome {
        if stop.is_cancelled() {
            return skipped(target, &self.check);
        }
        let started = Instant::now();
        let result = self.registry.invoke_read(&self.tool, &params, self.timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(output) => {
                let (status, violations) = classify(&self.rules, target, &output.records);
                TargetOutcome {
                    target: target.to_string(),
                    check: self.check.clone(),
                    status,
                    violations,
                    records: output.records.len(),
                    duration_ms,
                }
            }
            Err(e) => {
                warn!("{} on {} failed: {}", self.tool, target, e);
                if self.policy == FailurePolicy::StopOnFailure {
                    stop.cancel();
                }
                TargetOutcome {
                    target: target.to_string(),
                    check: self.check.clone(),
                    status: TargetStatus::Failed { error: e.to_string() },
                    violations: Vec::new(),
                    records: 0,
                    duration_ms,
                }
            }
        };
        debug!("{} / {}: {}", self.check, target, outcome.status.label());
        outcome
    }
}

/// Apply every rule to one target's records
pub fn classify(rules: &[ThresholdRule], target: &str, records: &[Value]) -> (TargetStatus, Vec<netpilot_shared::Violation>) {
    let mut violations = Vec::new();
    let mut missing = Vec::new();
    for rule in rules {
        match evaluate_records(rule, target, records) {
            RuleOutcome::Pass => {}
            RuleOutcome::Violation(v) => violations.push(v),
            RuleOutcome::Missing { field } => missing.push(field),
        }
    }
    let status = if !violations.is_empty() {
        TargetStatus::Violated
    } else if !missing.is_empty() {
        TargetStatus::NoData { fields: missing }
    } else {
        TargetStatus::Passed
    };
    (status, violations)
}

fn skipped(target: &str, check: &str) -> TargetOutcome {
    TargetOutcome {
        target: target.to_string(),
        check: check.to_string(),
        status: TargetStatus::Skipped,
        violations: Vec::new(),
        records: 0,
        duration_ms: 0,
    }
}
