//! CLI command implementations

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::http_server::{GatewayConfig, GatewayServer, GatewayState, NodeConfig, NodeServer};
use crate::observability::{init_logging, LogFormat};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Gateway { config } => gateway(&config),
        Command::Node { config } => node(&config),
        Command::Reconcile { config, apply } => reconcile(&config, apply),
    }
}

fn read_config<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config {}: {}", path.display(), e)))?;

    serde_json::from_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))
}

/// Load and validate a gateway configuration file
pub fn load_gateway_config(path: &Path) -> CliResult<GatewayConfig> {
    let config: GatewayConfig = read_config(path)?;
    config.validate().map_err(CliError::config_error)?;
    Ok(config)
}

/// Load and validate a storage node configuration file
pub fn load_node_config(path: &Path) -> CliResult<NodeConfig> {
    let config: NodeConfig = read_config(path)?;
    config.validate().map_err(CliError::config_error)?;
    Ok(config)
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// Run the gateway until shutdown
pub fn gateway(config_path: &Path) -> CliResult<()> {
    let config = load_gateway_config(config_path)?;
    init_logging(config.log_format);

    let rt = runtime()?;
    rt.block_on(async {
        let server = GatewayServer::new(config)?;
        server.start().await?;
        Ok(())
    })
}

/// Run a storage node until shutdown
pub fn node(config_path: &Path) -> CliResult<()> {
    let config = load_node_config(config_path)?;
    init_logging(config.log_format);

    let rt = runtime()?;
    rt.block_on(async {
        let server = NodeServer::new(config)?;
        server.start().await?;
        Ok(())
    })
}

/// Probe every record's blob and print the report as JSON.
///
/// Opens the directory log directly; run it while the gateway is stopped.
pub fn reconcile(config_path: &Path, apply: bool) -> CliResult<()> {
    let config = load_gateway_config(config_path)?;
    init_logging(LogFormat::Text);

    let rt = runtime()?;
    let report = rt.block_on(async {
        let state = GatewayState::from_config(&config)?;
        state
            .proxy
            .reconcile(apply)
            .await
            .map_err(|e| CliError::reconcile_failed(e.to_string()))
    })?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::io_error(format!("JSON error: {}", e)))?;
    println!("{}", json);
    Ok(())
}
