//! CLI surface tests for netpilotctl
//!
//! - argument parsing for every subcommand
//! - exit codes: 0 success, 1 runtime, 2 rejected, 3 configuration
//! - `--json` keeps stdout machine-readable
//!
//! Binary tests run against a fixture-backed config in a temp directory.

use clap::Parser;
use netpilotctl::{Cli, Commands};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_netpilotctl"))
}

fn run(args: &[&str]) -> Output {
    Command::new(binary())
        .args(args)
        .env("NETPILOT_LOG", "error")
        .env_remove("NETPILOT_CONFIG")
        .output()
        .expect("netpilotctl runs")
}

/// Two routers; R2 has a single established session
fn lab() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let config = format!(
        r#"
[memory]
persist = false

[paths]
state_dir = '{state}'
inspections_dir = '{inspections}'

[[tools]]
name = "bgp_summary"
description = "BGP established session count"
capability = "read"
input = [{{ name = "hostname", kind = "string", required = true }}]
adapter = {{ kind = "fixture", data = {{ R1 = [{{ bgp_established_count = 2 }}], R2 = [{{ bgp_established_count = 1 }}] }} }}

[[inventory]]
name = "R1"
attributes = {{ role = "core" }}

[[inventory]]
name = "R2"
attributes = {{ role = "core" }}
"#,
        state = state.display(),
        inspections = dir.path().join("inspections").display(),
    );
    let path = dir.path().join("netpilot.toml");
    std::fs::write(&path, config).unwrap();
    std::fs::create_dir_all(dir.path().join("inspections")).unwrap();
    std::fs::write(
        dir.path().join("inspections").join("core_bgp.yaml"),
        "name: core_bgp\ndevices: [R1, R2]\nchecks:\n  - name: sessions\n    tool: bgp_summary\n    threshold:\n      field: bgp_established_count\n      operator: \">=\"\n      value: 2\n",
    )
    .unwrap();
    (dir, path)
}

fn config_arg(path: &Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Parsing
// ============================================================================

/// Query words are joined; targets split on commas
#[test]
fn test_parse_query() {
    let cli = Cli::try_parse_from(["netpilotctl", "--json", "query", "show", "bgp", "peers", "-t", "R1,R2"]).unwrap();
    assert!(cli.json);
    match cli.command {
        Commands::Query { text, targets } => {
            assert_eq!(Cli::joined(&text), "show bgp peers");
            assert_eq!(targets, vec!["R1", "R2"]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

/// Global flags are accepted after the subcommand too
#[test]
fn test_parse_approve_flags() {
    let cli = Cli::try_parse_from(["netpilotctl", "approve", "s-1", "--reject", "not now", "--verbose"]).unwrap();
    assert!(cli.verbose);
    assert_eq!(
        cli.command,
        Commands::Approve {
            session: Some("s-1".into()),
            request: None,
            reject: Some("not now".into()),
            edit: None
        }
    );
    assert!(Cli::try_parse_from(["netpilotctl", "approve", "s-1", "--reject", "x", "--edit", "{}"]).is_err());
}

#[test]
fn test_parse_other_commands() {
    assert_eq!(
        Cli::try_parse_from(["netpilotctl", "chat", "--session", "s-2"]).unwrap().command,
        Commands::Chat { session: Some("s-2".into()) }
    );
    assert_eq!(
        Cli::try_parse_from(["netpilotctl", "inspect", "core_bgp", "--markdown"]).unwrap().command,
        Commands::Inspect { name: "core_bgp".into(), markdown: true, daemon: false, every: None, max_runs: None }
    );
    assert_eq!(
        Cli::try_parse_from(["netpilotctl", "inspect", "core_bgp", "--daemon", "--every", "30"]).unwrap().command,
        Commands::Inspect { name: "core_bgp".into(), markdown: false, daemon: true, every: Some(30), max_runs: None }
    );
    // Daemon-only flags need --daemon, and the interval is at least a second
    assert!(Cli::try_parse_from(["netpilotctl", "inspect", "core_bgp", "--every", "30"]).is_err());
    assert!(Cli::try_parse_from(["netpilotctl", "inspect", "core_bgp", "--daemon", "--every", "0"]).is_err());
    assert_eq!(Cli::try_parse_from(["netpilotctl", "status"]).unwrap().command, Commands::Status);
    assert!(Cli::try_parse_from(["netpilotctl", "query"]).is_err());
}

// ============================================================================
// Exit codes
// ============================================================================

/// Usage errors are configuration errors, not "rejected"
#[test]
fn test_usage_error_exits_3() {
    assert_eq!(run(&["frobnicate"]).status.code(), Some(3));
    assert_eq!(run(&["--help"]).status.code(), Some(0));
}

#[test]
fn test_invalid_config_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[memory]\nsimilarity_threshold = 1.5\n").unwrap();
    let out = run(&["--config", &config_arg(&path), "status"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("similarity_threshold"));

    let missing = dir.path().join("missing.toml");
    assert_eq!(run(&["--config", &config_arg(&missing), "status"]).status.code(), Some(3));
}

#[test]
fn test_unknown_session_exits_1() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "approve", "s-nope"]);
    assert_eq!(out.status.code(), Some(1));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_status_json() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "--json", "status"]);
    assert_eq!(out.status.code(), Some(0));
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["tools"], 1);
    assert_eq!(report["inventory"], 2);
    assert_eq!(report["adapters"]["fixture"], 1);
}

/// Violations are findings, not failures: the command still exits 0
#[test]
fn test_inspect_by_name() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "--json", "inspect", "core_bgp"]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    let r2 = results.iter().find(|r| r["target"] == "R2").unwrap();
    assert_eq!(r2["status"]["status"], "violated");
    let r1 = results.iter().find(|r| r["target"] == "R1").unwrap();
    assert_eq!(r1["status"]["status"], "passed");
}

/// Two scheduled runs, one JSON report per line, then a clean exit
#[test]
fn test_inspect_daemon_runs_on_interval() {
    let (_dir, config) = lab();
    let out = run(&[
        "--config",
        &config_arg(&config),
        "--json",
        "inspect",
        "core_bgp",
        "--daemon",
        "--every",
        "1",
        "--max-runs",
        "2",
    ]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let reports: Vec<Value> = stdout.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report["name"], "core_bgp");
        assert_eq!(report["results"].as_array().unwrap().len(), 2);
    }
}

/// Without a schedule in the document the daemon needs --every
#[test]
fn test_inspect_daemon_without_schedule_exits_3() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "inspect", "core_bgp", "--daemon"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&out.stderr).contains("--every"));
}

#[test]
fn test_inspect_unknown_exits_3() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "inspect", "nope"]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn test_approve_lists_nothing() {
    let (_dir, config) = lab();
    let out = run(&["--config", &config_arg(&config), "--json", "approve"]);
    assert_eq!(out.status.code(), Some(0));
    let pending: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(pending, Value::Array(vec![]));
}
