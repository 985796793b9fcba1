//! Slate gateway daemon.

mod config;

use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use slate_gateway::{LoopbackBackend, Supervisor};

/// slated - clientless remote-desktop gateway
#[derive(Parser)]
#[command(name = "slated")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept peer connections and serve sessions
    Run {
        /// Listen address, overriding the configuration file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Parse and validate the configuration, then exit
    CheckConfig,
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {path}"))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_owned()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { bind } => {
            init_tracing(&config.logging.level);

            let addr = match bind {
                Some(addr) => addr,
                None => config.network.listen_addr.clone(),
            };

            let mut supervisor = Supervisor::new(config.session.clone());
            supervisor.register_backend(Arc::new(LoopbackBackend));
            let supervisor = Arc::new(supervisor);

            let listener =
                TcpListener::bind(&addr).with_context(|| format!("binding {addr}"))?;
            info!(%addr, "slated started");
            supervisor.serve(listener)?;
            Ok(())
        }

        Commands::CheckConfig => {
            println!("configuration OK");
            Ok(())
        }
    }
}
