//! Simlink federate starter binary.
//!
//! # Usage
//!
//! ```bash
//! simlink-starter --bind 127.0.0.1:5555 --start-port 5000 --end-port 5100 \
//!     --software mm1=/usr/local/bin/simlink-mm1
//! ```

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use simlink_core::{RouterEndpoint, SystemEnv};
use simlink_proto::Identifier;
use simlink_starter::{LaunchMode, Starter, StarterConfig, parse_software, serve};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Simlink federate starter
#[derive(Parser, Debug)]
#[command(name = "simlink-starter")]
#[command(about = "Launches and reclaims simulation federates")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    bind: SocketAddr,

    /// First port handed to federates
    #[arg(long, default_value = "5000")]
    start_port: u16,

    /// Last port handed to federates
    #[arg(long, default_value = "5100")]
    end_port: u16,

    /// Software alias, as alias=path (repeatable)
    #[arg(short, long, value_parser = parse_software)]
    software: Vec<(String, PathBuf)>,

    /// Report started right after launch instead of polling the federate
    #[arg(long)]
    bare: bool,

    /// Identity replies are sent from
    #[arg(long, default_value = "FS")]
    starter_id: String,

    /// Grace period before a terminated federate is force-killed, in milliseconds
    #[arg(long, default_value = "1000")]
    kill_grace_ms: u64,

    /// Longest wait for a federate to report ready, in milliseconds
    #[arg(long, default_value = "10000")]
    startup_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = StarterConfig {
        bind: args.bind,
        start_port: args.start_port,
        end_port: args.end_port,
        software: args.software.into_iter().collect(),
        mode: if args.bare { LaunchMode::Bare } else { LaunchMode::ModelController },
        starter_id: Identifier::from(args.starter_id),
        kill_grace: Duration::from_millis(args.kill_grace_ms),
        startup_timeout: Duration::from_millis(args.startup_timeout_ms),
        ..StarterConfig::default()
    };
    config.validate()?;

    tracing::info!("Simlink starter starting");
    for (alias, path) in &config.software {
        tracing::info!("Software {} -> {}", alias, path.display());
    }

    let mut router = RouterEndpoint::bind(config.bind).await?;
    let mut starter = Starter::new(config, SystemEnv::new());

    tokio::select! {
        () = serve(&mut router, &mut starter) => {},
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted, reclaiming federates");
        },
    }

    router.close();
    let reclaimed = starter.kill_all(0).await;
    if !reclaimed.status {
        tracing::error!("Some federates were not reclaimed: {}", reclaimed.error);
    }

    Ok(())
}
