//! Logging setup. Everything goes to stderr so `--json` output on stdout
//! stays parseable.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "NETPILOT_LOG";

/// Filter directive: `$NETPILOT_LOG` wins, then `--verbose`, then info
pub fn directive(env: Option<&str>, verbose: bool) -> String {
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value.to_string(),
        None if verbose => "debug".to_string(),
        None => "info".to_string(),
    }
}

pub fn init(verbose: bool) {
    let env = std::env::var(LOG_ENV).ok();
    let filter = EnvFilter::try_new(directive(env.as_deref(), verbose)).unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_precedence() {
        assert_eq!(directive(None, false), "info");
        assert_eq!(directive(None, true), "debug");
        assert_eq!(directive(Some("netpilot_core=trace"), false), "netpilot_core=trace");
        assert_eq!(directive(Some("  "), true), "debug");
    }
}
