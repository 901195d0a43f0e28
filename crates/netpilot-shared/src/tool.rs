//! Tool descriptors - the capability-tagged invocation contract.
//!
//! A tool is either read-only or mutating. Mutating tools can only run after
//! the approval gate has been passed; that decision is made from the tag
//! declared here, never from the tool name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability tag of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Mutate,
}

impl Capability {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Capability::Mutate)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Read => write!(f, "read"),
            Capability::Mutate => write!(f, "mutate"),
        }
    }
}

/// Risk classification shown to the operator at the approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Medium
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// JSON kind of a parameter or output field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Object,
    Any,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::List => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::List => "list",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }
}

/// Declared parameter (or output field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

fn default_kind() -> FieldKind {
    FieldKind::String
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind, required: true }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self { name: name.to_string(), kind, required: false }
    }
}

/// Declared input or output schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate parameters against this schema.
    ///
    /// Reports every problem at once. Unknown parameters are violations;
    /// values are never coerced into the declared kind.
    pub fn validate(&self, params: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for spec in &self.fields {
            match params.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    violations.push(format!("missing required parameter '{}'", spec.name));
                }
                Some(value) if !value.is_null() && !spec.kind.matches(value) => {
                    violations.push(format!(
                        "parameter '{}' must be {}, got {}",
                        spec.name,
                        spec.kind.as_str(),
                        json_kind(value)
                    ));
                }
                _ => {}
            }
        }

        for key in params.keys() {
            if self.field(key).is_none() {
                violations.push(format!("unknown parameter '{}'", key));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Catalog entry for one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capability: Capability,
    #[serde(default)]
    pub input: ToolSchema,
    #[serde(default)]
    pub output: ToolSchema,
    /// Safe to repeat; read tools default to true
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,
    #[serde(default)]
    pub risk: RiskLevel,
}

fn default_idempotent() -> bool {
    true
}

impl ToolDescriptor {
    pub fn read(name: &str, description: &str, input: ToolSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capability: Capability::Read,
            input,
            output: ToolSchema::default(),
            idempotent: true,
            risk: RiskLevel::Low,
        }
    }

    pub fn mutate(name: &str, description: &str, input: ToolSchema, risk: RiskLevel) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capability: Capability::Mutate,
            input,
            output: ToolSchema::default(),
            idempotent: false,
            risk,
        }
    }

    pub fn with_output(mut self, output: ToolSchema) -> Self {
        self.output = output;
        self
    }

    pub fn is_mutating(&self) -> bool {
        self.capability.is_mutating()
    }

    /// Reads may be retried once; mutations never
    pub fn retry_allowed(&self) -> bool {
        !self.is_mutating() && self.idempotent
    }
}

/// Normalized result of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    /// Normalize raw adapter data.
    ///
    /// Arrays become records; an object with a `records` array is unwrapped
    /// and its other keys kept as metadata; any other value is one record.
    pub fn from_value(tool: &str, target: Option<&str>, value: Value) -> Self {
        let (records, metadata) = match value {
            Value::Array(items) => (items, Map::new()),
            Value::Object(mut obj) => match obj.remove("records") {
                Some(Value::Array(items)) => (items, obj),
                Some(other) => {
                    obj.insert("records".to_string(), other);
                    (vec![Value::Object(obj)], Map::new())
                }
                None => (vec![Value::Object(obj)], Map::new()),
            },
            Value::Null => (Vec::new(), Map::new()),
            other => (vec![other], Map::new()),
        };

        Self {
            tool: tool.to_string(),
            target: target.map(str::to_string),
            records,
            metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Short textual preview of the first records
    pub fn preview(&self, max_records: usize) -> String {
        self.records
            .iter()
            .take(max_records)
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bgp_schema() -> ToolSchema {
        ToolSchema::new(vec![
            FieldSpec::required("hostname", FieldKind::String),
            FieldSpec::optional("state", FieldKind::String),
            FieldSpec::optional("limit", FieldKind::Integer),
        ])
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validate_ok() {
        let schema = bgp_schema();
        assert!(schema.validate(&params(json!({"hostname": "R1", "limit": 5}))).is_ok());
    }

    #[test]
    fn test_validate_reports_all_violations() {
        let schema = bgp_schema();
        let err = schema
            .validate(&params(json!({"limit": "five", "vrf": "default"})))
            .unwrap_err();
        assert_eq!(err.len(), 3);
        assert!(err.iter().any(|v| v.contains("missing required parameter 'hostname'")));
        assert!(err.iter().any(|v| v.contains("'limit' must be integer, got string")));
        assert!(err.iter().any(|v| v.contains("unknown parameter 'vrf'")));
    }

    #[test]
    fn test_validate_never_coerces() {
        let schema = bgp_schema();
        // "5" is a string, not an integer
        assert!(schema.validate(&params(json!({"hostname": "R1", "limit": "5"}))).is_err());
    }

    #[test]
    fn test_output_normalization() {
        let out = ToolOutput::from_value("t", Some("R1"), json!([{"a": 1}, {"a": 2}]));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.target.as_deref(), Some("R1"));

        let out = ToolOutput::from_value("t", None, json!({"records": [{"a": 1}], "source": "cache"}));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.metadata.get("source"), Some(&json!("cache")));

        let out = ToolOutput::from_value("t", None, json!({"count": 3}));
        assert_eq!(out.records, vec![json!({"count": 3})]);

        assert!(ToolOutput::from_value("t", None, Value::Null).is_empty());
    }

    #[test]
    fn test_retry_policy() {
        let read = ToolDescriptor::read("telemetry_bgp", "", ToolSchema::default());
        let write = ToolDescriptor::mutate("config_push", "", ToolSchema::default(), RiskLevel::High);
        assert!(read.retry_allowed());
        assert!(!write.retry_allowed());
        assert!(write.is_mutating());
    }
}
