//! Golden classification table for threshold rules, plus inspection
//! documents as an operator would write them.

use netpilot_shared::threshold::{count_violating, evaluate_records};
use netpilot_shared::{
    Comparator, ExecutionMode, FailurePolicy, InspectionConfig, RuleOutcome, Severity, TargetSelector, ThresholdRule,
};
use serde_json::{json, Value};

fn rule(field: &str, comparator: Comparator, value: Value) -> ThresholdRule {
    ThresholdRule::new(field, comparator, value)
}

/// (records, rule, expected label)
fn golden() -> Vec<(Value, ThresholdRule, &'static str)> {
    vec![
        (json!([{"bgp_established_count": 1}]), rule("bgp_established_count", Comparator::Ge, json!(2)), "violation"),
        (json!([{"bgp_established_count": 2}]), rule("bgp_established_count", Comparator::Ge, json!(2)), "pass"),
        (json!([{"bgp_established_count": 3}]), rule("bgp_established_count", Comparator::Ge, json!(2)), "pass"),
        (json!([{"state": "Established"}, {"state": "Idle"}]), rule("state", Comparator::Eq, json!("Established")), "violation"),
        (json!([{"state": "Established"}, {"state": "Established"}]), rule("state", Comparator::Eq, json!("Established")), "pass"),
        (json!([{"cpu": 42.5}]), rule("cpu", Comparator::Between, json!([0, 80])), "pass"),
        (json!([{"cpu": 95}]), rule("cpu", Comparator::Between, json!([0, 80])), "violation"),
        (json!([{"oper": "down"}]), rule("oper", Comparator::In, json!(["up", "testing"])), "violation"),
        (json!([{"iface": {"errors": {"in": 0}}}]), rule("iface.errors.in", Comparator::Eq, json!(0)), "pass"),
        (json!([{"other": 1}]), rule("state", Comparator::Eq, json!("Established")), "missing"),
        (json!([]), rule("state", Comparator::Eq, json!("Established")), "missing"),
        (json!([{}, {}, {}]), rule("_count", Comparator::Ge, json!(2)), "pass"),
        (json!([{}]), rule("_count", Comparator::Ge, json!(2)), "violation"),
    ]
}

fn label(outcome: &RuleOutcome) -> &'static str {
    match outcome {
        RuleOutcome::Pass => "pass",
        RuleOutcome::Violation(_) => "violation",
        RuleOutcome::Missing { .. } => "missing",
    }
}

#[test]
fn test_golden_classification() {
    for (records, rule, expected) in golden() {
        let records = records.as_array().cloned().unwrap_or_default();
        let outcome = evaluate_records(&rule, "R1", &records);
        assert_eq!(label(&outcome), expected, "rule {} {} {}", rule.field, rule.comparator, rule.value);
    }
}

#[test]
fn test_evaluation_is_deterministic() {
    for (records, rule, _) in golden() {
        let records = records.as_array().cloned().unwrap_or_default();
        let first = evaluate_records(&rule, "R1", &records);
        for _ in 0..50 {
            assert_eq!(evaluate_records(&rule, "R1", &records), first);
        }
    }
}

#[test]
fn test_violation_carries_actual_value() {
    let rule = rule("bgp_established_count", Comparator::Ge, json!(2)).with_severity(Severity::Critical);
    match evaluate_records(&rule, "R3", &[json!({"bgp_established_count": 1})]) {
        RuleOutcome::Violation(v) => {
            assert_eq!(v.target, "R3");
            assert_eq!(v.actual, json!(1));
            assert_eq!(v.expected, json!(2));
            assert_eq!(v.severity, Severity::Critical);
        }
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[test]
fn test_count_violating_ignores_records_without_field() {
    let rule = rule("state", Comparator::Eq, json!("Established"));
    let records = vec![json!({"state": "Idle"}), json!({"state": "Established"}), json!({"peer": "x"})];
    assert_eq!(count_violating(&rule, &records), 1);
}

// ============================================================================
// Inspection documents
// ============================================================================

const CORE_AUDIT: &str = r#"
name: core_audit
description: Nightly core router checks
devices:
  filter: role=core
mode: serial
failure_policy: stop_on_failure
timeout_secs: 30
checks:
  - name: bgp_sessions
    tool: bgp_summary
    threshold:
      field: bgp_established_count
      operator: gte
      expected: 2
      severity: critical
  - name: uplinks
    intent: show interface status for uplinks
    thresholds:
      - field: oper
        comparator: "=="
        value: up
  - name: disabled
    tool: bgp_summary
    enabled: false
"#;

#[test]
fn test_inspection_document_parses() {
    let config = InspectionConfig::from_yaml(CORE_AUDIT).unwrap();
    assert_eq!(config.name, "core_audit");
    assert_eq!(config.execution_mode(), ExecutionMode::Serial);
    assert_eq!(config.failure_policy(), FailurePolicy::StopOnFailure);
    assert_eq!(config.timeout_secs, Some(30));
    assert!(matches!(&config.devices, TargetSelector::Selector(spec) if spec.filter.as_deref() == Some("role=core")));

    let checks: Vec<&str> = config.enabled_checks().map(|c| c.name.as_str()).collect();
    assert_eq!(checks, vec!["bgp_sessions", "uplinks"]);
    let first = &config.checks[0];
    assert!(first.is_compiled());
    assert_eq!(first.rules()[0].comparator, Comparator::Ge);
    assert_eq!(first.rules()[0].severity, Severity::Critical);
    assert!(!config.checks[1].is_compiled());
}

#[test]
fn test_inspection_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("core_audit.yaml");
    std::fs::write(&path, CORE_AUDIT).unwrap();
    let config = InspectionConfig::load(&path).unwrap();
    assert_eq!(config.checks.len(), 3);
}

#[test]
fn test_inspection_rejects_bad_rules() {
    let err = InspectionConfig::from_yaml(
        "name: x\ndevices: [R1]\nchecks:\n  - name: c\n    tool: t\n    threshold:\n      field: cpu\n      comparator: between\n      value: 5\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("between"));
}

#[test]
fn test_inspection_needs_devices() {
    assert!(InspectionConfig::from_yaml("name: x\ndevices: []\nchecks:\n  - name: c\n    tool: t\n").is_err());
}
