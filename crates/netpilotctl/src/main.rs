//! netpilotctl - operator CLI for netpilot

use clap::error::ErrorKind;
use clap::Parser;
use netpilotctl::errors::EXIT_SUCCESS;
use netpilotctl::{commands, exit_code_for, logging, Cli};
use netpilot_shared::error::EXIT_CONFIG_ERROR;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                // clap's own usage code (2) means "rejected" here
                _ => EXIT_CONFIG_ERROR,
            };
            std::process::exit(code);
        }
    };

    logging::init(cli.verbose);
    tracing::debug!("netpilotctl v{}", netpilot_shared::VERSION);

    let code = match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}
