//! The shipped sample configuration must stay loadable.

use netpilot_core::{Config, HealthState, Orchestrator};
use netpilot_shared::{Capability, ExecutionMode, Layer};
use std::path::PathBuf;
use std::time::Duration;

fn sample() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/netpilot.toml")
}

/// Sample config parses, validates and resolves its inspections directory
#[test]
fn test_sample_config_loads() {
    let config = Config::load(Some(&sample())).unwrap();
    assert_eq!(config.tools.len(), 6);
    assert_eq!(config.inventory.len(), 3);
    assert!(config.diagnosis.layer(Layer::Routing).is_some());
    assert!(config.paths.inspections_dir.ends_with("config/inspections"));
    let mutating: Vec<&str> = config
        .tools
        .iter()
        .filter(|t| t.capability == Capability::Mutate)
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(mutating, vec!["bgp_neighbor_reset"]);
}

/// The orchestrator builds from it and finds the sample inspection by name
#[tokio::test]
async fn test_sample_orchestrator() {
    let state = tempfile::tempdir().unwrap();
    let mut config = Config::load(Some(&sample())).unwrap();
    config.paths.state_dir = state.path().to_path_buf();

    let orchestrator = Orchestrator::from_config(config).await.unwrap();
    let inspection = orchestrator.load_inspection("bgp_health").unwrap();
    assert_eq!(inspection.checks.len(), 2);
    assert_eq!(inspection.execution_mode(), ExecutionMode::Parallel);
    assert_eq!(inspection.interval(), Some(Duration::from_secs(900)));

    let health = orchestrator.health().await;
    assert_eq!(health.state, HealthState::Healthy, "problems: {:?}", health.problems);
    assert_eq!(health.mutating_tools, 1);
}
