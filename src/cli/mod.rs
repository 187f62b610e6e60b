//! CLI module
//!
//! Provides command-line interface for:
//! - gateway: serve the client-facing API
//! - node: serve one storage node
//! - reconcile: audit directory records against the backends

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{gateway, load_gateway_config, load_node_config, node, reconcile, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
