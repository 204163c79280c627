//! `malos`: operator tool for MALOS sensor services.
//!
//! Usage:
//!   malos stream --family pressure --host 192.168.1.42
//!   malos endpoints --family imu
//!   malos schema --proto ./driver.proto
//!
//! Env vars:
//!   MALOS_CONFIG  config file (default: `malos.toml` when present)
//!   RUST_LOG      log filter (default: `info`)

mod cli;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Stream(args) => {
            let (config, path) = cli::load_config(cli.config.as_deref())?;
            if let Some(path) = &path {
                tracing::debug!(path = %path.display(), "loaded config");
            }
            cli::stream::run(config, args).await
        }
        Command::Endpoints(target) => {
            let (config, _) = cli::load_config(cli.config.as_deref())?;
            cli::inspect::endpoints(config, &target)
        }
        Command::Schema { proto } => {
            let (config, _) = cli::load_config(cli.config.as_deref())?;
            cli::inspect::schema(&config, proto.as_deref())
        }
    }
}

/// Logs go to stderr so that stdout carries only data.
fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}
