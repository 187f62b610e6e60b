//! CLI argument definitions using clap
//!
//! Commands:
//! - fileshard gateway --config <path>
//! - fileshard node --config <path>
//! - fileshard reconcile --config <path> [--apply]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fileshard - files spread over a pool of storage nodes
#[derive(Parser, Debug)]
#[command(name = "fileshard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the client-facing gateway
    Gateway {
        /// Path to configuration file
        #[arg(long, default_value = "./gateway.json")]
        config: PathBuf,
    },

    /// Run a storage node
    Node {
        /// Path to configuration file
        #[arg(long, default_value = "./node.json")]
        config: PathBuf,
    },

    /// Check every directory record against its backend and print a report
    Reconcile {
        /// Path to the gateway configuration file
        #[arg(long, default_value = "./gateway.json")]
        config: PathBuf,

        /// Remove records whose blob is confirmed missing
        #[arg(long)]
        apply: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
