pub mod inspect;
pub mod stream;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use malos_connector::{ConnectorConfig, ServiceFamily};

/// Stream, inspect and configure MALOS sensor services.
#[derive(Debug, Parser)]
#[command(name = "malos", version, about)]
pub struct Cli {
    /// Config file (overrides `MALOS_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure a service and print its data as JSON lines.
    Stream(StreamArgs),
    /// Print the four channel endpoints of a service.
    Endpoints(TargetArgs),
    /// List the message types of a schema.
    Schema {
        /// `.proto` file to compile instead of the configured schema.
        #[arg(long)]
        proto: Option<PathBuf>,
    },
}

/// Which service to talk to.  Unset values come from the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// imu, humidity, pressure or uv.
    #[arg(long)]
    pub family: Option<ServiceFamily>,
    #[arg(long)]
    pub host: Option<String>,
    /// Base (config) port.
    #[arg(long)]
    pub port: Option<u16>,
}

impl TargetArgs {
    pub fn apply(&self, config: &mut ConnectorConfig) {
        if let Some(family) = self.family {
            config.family = family;
        }
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct StreamArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Keepalive period in milliseconds; 0 disables it.
    #[arg(long)]
    pub keepalive_ms: Option<u64>,
    /// Seconds between data updates.
    #[arg(long, default_value_t = 1.0)]
    pub update_delay: f32,
    /// Seconds without a keepalive before the service goes quiet.
    #[arg(long, default_value_t = 6.0)]
    pub ping_timeout: f32,
    /// Stop after this many data messages.
    #[arg(long)]
    pub count: Option<u64>,
}

// ── Config loading helper ─────────────────────────────────────────────

const CONFIG_ENV: &str = "MALOS_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "malos.toml";

/// Load the connector config from `explicit`, else `MALOS_CONFIG`, else
/// `malos.toml` when it exists.  Falls back to defaults when no file is
/// found.  Returns the config and the path that was read, if any.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(ConnectorConfig, Option<PathBuf>)> {
    let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    load_config_from(explicit, env_path.as_deref())
}

fn load_config_from(
    explicit: Option<&Path>,
    env_path: Option<&Path>,
) -> anyhow::Result<(ConnectorConfig, Option<PathBuf>)> {
    // A path the user named must exist; the default file is optional.
    let path = match explicit.or(env_path) {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok((ConnectorConfig::default(), None));
            }
            default
        }
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = ConnectorConfig::from_toml_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, Some(path)))
}
