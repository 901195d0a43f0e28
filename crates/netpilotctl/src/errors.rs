//! Exit status for netpilotctl.
//!
//! 0 success, 1 tool or runtime error, 2 operator-rejected change,
//! 3 configuration or validation error.

use netpilot_shared::error::{EXIT_CONFIG_ERROR, EXIT_RUNTIME_ERROR};
use netpilot_shared::NetpilotError;

pub use netpilot_shared::error::{EXIT_REJECTED, EXIT_SUCCESS};

/// Map an error chain to an exit code; the first typed error wins
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<NetpilotError>() {
            return e.exit_code();
        }
        if cause.downcast_ref::<clap::Error>().is_some() {
            return EXIT_CONFIG_ERROR;
        }
    }
    EXIT_RUNTIME_ERROR
}

/// Wrap a config loading failure so it exits with the configuration code
pub fn config_error(err: anyhow::Error) -> anyhow::Error {
    anyhow::Error::new(NetpilotError::Config(format!("{:#}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_typed_errors_keep_their_code() {
        let rejected = anyhow::Error::new(NetpilotError::ApprovalRejected("no".into()));
        assert_eq!(exit_code_for(&rejected), EXIT_REJECTED);

        let schema = anyhow::Error::new(NetpilotError::SchemaViolation {
            tool: "bgp_neighbor_set".into(),
            violations: vec!["missing 'neighbor'".into()],
        });
        assert_eq!(exit_code_for(&schema), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_context_does_not_hide_code() {
        let err: anyhow::Result<()> = Err(NetpilotError::tool("bgp_peers", "unreachable")).context("query failed");
        assert_eq!(exit_code_for(&err.unwrap_err()), EXIT_RUNTIME_ERROR);

        let err: anyhow::Result<()> = Err(NetpilotError::Validation("bad".into())).context("inspect");
        assert_eq!(exit_code_for(&err.unwrap_err()), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_untyped_is_runtime() {
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_RUNTIME_ERROR);
        assert_eq!(exit_code_for(&config_error(anyhow::anyhow!("bad toml"))), EXIT_CONFIG_ERROR);
    }
}
