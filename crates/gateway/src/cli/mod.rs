pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// llmesh — a multi-LLM orchestration hub exposing an MCP-style
/// JSON-RPC front-end over its mesh, chain, and memory subsystems.
#[derive(Debug, Parser)]
#[command(name = "llmesh-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any issues.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from the path named by `LLMESH_CONFIG` (or
/// `config.toml` by default). Falls back to built-in defaults if the
/// file doesn't exist — shared by `serve`, `doctor`, and `config`.
pub fn load_config() -> anyhow::Result<(llmesh_domain::config::Config, String)> {
    let config_path = std::env::var("LLMESH_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        llmesh_domain::config::Config::default()
    };

    Ok((config, config_path))
}
