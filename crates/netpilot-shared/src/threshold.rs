//! Threshold rules: deterministic pass/violation classification of tool data.
//!
//! Evaluation is a pure function of (record, rule). No inference component is
//! ever consulted; the same input always yields the same classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pseudo-field resolving to the number of records a tool returned
pub const RECORD_COUNT_FIELD: &str = "_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "ge", alias = "gte")]
    Ge,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "le", alias = "lte")]
    Le,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    /// Inclusive range, expected value is `[low, high]`
    #[serde(rename = "between")]
    Between,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
            Comparator::In => "in",
            Comparator::NotIn => "not_in",
            Comparator::Between => "between",
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One threshold check, loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Dotted path into a record (`peer.state`) or `_count`
    pub field: String,
    #[serde(alias = "operator")]
    pub comparator: Comparator,
    #[serde(alias = "expected")]
    pub value: Value,
    #[serde(default)]
    pub severity: Severity,
    /// Supports {target}, {device}, {field}, {value}, {actual}
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ThresholdRule {
    pub fn new(field: &str, comparator: Comparator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            comparator,
            value,
            severity: Severity::Warning,
            message: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Structural check of the expected value for this comparator
    pub fn validate(&self) -> Result<(), String> {
        if self.field.trim().is_empty() {
            return Err("threshold field must not be empty".to_string());
        }
        match self.comparator {
            Comparator::In | Comparator::NotIn if !self.value.is_array() => Err(format!(
                "threshold on '{}': '{}' expects a list",
                self.field, self.comparator
            )),
            Comparator::Between => match self.value.as_array() {
                Some(range) if range.len() == 2 && range.iter().all(|v| as_number(v).is_some()) => Ok(()),
                _ => Err(format!(
                    "threshold on '{}': 'between' expects [low, high]",
                    self.field
                )),
            },
            _ => Ok(()),
        }
    }

    fn render_message(&self, target: &str, actual: &Value) -> String {
        let template = self
            .message
            .as_deref()
            .unwrap_or("{field} = {actual} (expected {op} {value})");
        template
            .replace("{target}", target)
            .replace("{device}", target)
            .replace("{field}", &self.field)
            .replace("{op}", self.comparator.symbol())
            .replace("{value}", &display_value(&self.value))
            .replace("{actual}", &display_value(actual))
    }
}

/// A failed threshold check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub target: String,
    pub field: String,
    pub comparator: Comparator,
    pub expected: Value,
    pub actual: Value,
    pub severity: Severity,
    pub message: String,
}

/// Result of checking one rule against one target's data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RuleOutcome {
    Pass,
    Violation(Violation),
    /// The field was absent from every record
    Missing { field: String },
}

impl RuleOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, RuleOutcome::Violation(_))
    }
}

/// Compare one actual value against a rule.
pub fn compare(comparator: Comparator, actual: &Value, expected: &Value) -> bool {
    match comparator {
        Comparator::Eq => values_equal(actual, expected),
        Comparator::Ne => !values_equal(actual, expected),
        Comparator::In => expected
            .as_array()
            .map(|items| items.iter().any(|e| values_equal(actual, e)))
            .unwrap_or(false),
        Comparator::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|e| values_equal(actual, e)))
            .unwrap_or(false),
        Comparator::Between => {
            let range = expected.as_array();
            match (as_number(actual), range) {
                (Some(a), Some(r)) if r.len() == 2 => match (as_number(&r[0]), as_number(&r[1])) {
                    (Some(lo), Some(hi)) => a >= lo && a <= hi,
                    _ => false,
                },
                _ => false,
            }
        }
        Comparator::Gt | Comparator::Ge | Comparator::Lt | Comparator::Le => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(e)) => match comparator {
                    Comparator::Gt => a > e,
                    Comparator::Ge => a >= e,
                    Comparator::Lt => a < e,
                    _ => a <= e,
                },
                // Non-numeric operands never satisfy an ordering rule
                _ => false,
            }
        }
    }
}

/// Evaluate a rule against a single record.
pub fn evaluate(rule: &ThresholdRule, target: &str, record: &Value) -> RuleOutcome {
    match lookup_field(record, &rule.field) {
        Some(actual) => check(rule, target, actual),
        None => RuleOutcome::Missing { field: rule.field.clone() },
    }
}

/// Evaluate a rule against all records a tool returned for one target.
///
/// `_count` is checked against the record count. Otherwise every record that
/// carries the field is checked and the first violation (in record order) is
/// reported; a target passes only if all present values pass.
pub fn evaluate_records(rule: &ThresholdRule, target: &str, records: &[Value]) -> RuleOutcome {
    if rule.field == RECORD_COUNT_FIELD {
        return check(rule, target, &Value::from(records.len() as u64));
    }

    let mut seen = false;
    for record in records {
        if let Some(actual) = lookup_field(record, &rule.field) {
            seen = true;
            let outcome = check(rule, target, actual);
            if outcome.is_violation() {
                return outcome;
            }
        }
    }

    if seen {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Missing { field: rule.field.clone() }
    }
}

/// Count records that violate a rule (records without the field are ignored).
pub fn count_violating(rule: &ThresholdRule, records: &[Value]) -> usize {
    records
        .iter()
        .filter_map(|r| lookup_field(r, &rule.field))
        .filter(|actual| !compare(rule.comparator, actual, &rule.value))
        .count()
}

fn check(rule: &ThresholdRule, target: &str, actual: &Value) -> RuleOutcome {
    if compare(rule.comparator, actual, &rule.value) {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Violation(Violation {
            target: target.to_string(),
            field: rule.field.clone(),
            comparator: rule.comparator,
            expected: rule.value.clone(),
            actual: actual.clone(),
            severity: rule.severity,
            message: rule.render_message(target, actual),
        })
    }
}

/// Resolve a dotted path (`a.b.0.c`) inside a record
pub fn lookup_field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => a == b,
        },
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
