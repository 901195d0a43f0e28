//! Command line surface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netpilotctl")]
#[command(about = "Network operations assistant - diagnose, inspect and change with approval", long_about = None)]
#[command(version = netpilot_shared::VERSION)]
pub struct Cli {
    /// Config file (default: $NETPILOT_CONFIG, then /etc/netpilot/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Ask one question and exit
    Query {
        /// The question, e.g. "show bgp peers on R1"
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Limit the question to these devices
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<String>,
    },

    /// Interactive session; pending changes are approved inline
    Chat {
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run an inspection document across its devices
    Inspect {
        /// Name under the inspections directory, or a path to a YAML file
        name: String,

        /// Print the report as markdown
        #[arg(long)]
        markdown: bool,

        /// Keep running on the document's schedule until Ctrl-C
        #[arg(long)]
        daemon: bool,

        /// Seconds between daemon runs (overrides the document's schedule)
        #[arg(long, requires = "daemon", value_parser = clap::value_parser!(u64).range(1..))]
        every: Option<u64>,

        /// Stop the daemon after this many runs
        #[arg(long, requires = "daemon")]
        max_runs: Option<u64>,
    },

    /// Decide a suspended change request (lists pending requests without a session)
    Approve {
        session: Option<String>,

        /// Request id when several sessions are involved
        #[arg(long)]
        request: Option<String>,

        /// Reject instead of approving
        #[arg(long, conflicts_with = "edit")]
        reject: Option<String>,

        /// Approve with replacement parameters (JSON object)
        #[arg(long)]
        edit: Option<String>,
    },

    /// Show configuration, tools, memory and pending approvals
    Status,
}

impl Cli {
    /// Query text joined back into one line
    pub fn joined(words: &[String]) -> String {
        words.join(" ")
    }
}
