//! netpilotctl - operator CLI for netpilot.
//!
//! The binary is a thin shell over these modules so argument parsing,
//! exit-code mapping and rendering can be tested without a process.

pub mod cli;
pub mod commands;
pub mod daemon;
pub mod errors;
pub mod logging;
pub mod output;

pub use cli::{Cli, Commands};
pub use errors::exit_code_for;
