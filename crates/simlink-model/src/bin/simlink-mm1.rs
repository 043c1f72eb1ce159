//! M/M/1 demo federate.
//!
//! # Usage
//!
//! ```bash
//! simlink-mm1 --port 5000 --instance-id MM1.0
//! ```
//!
//! Normally launched by `simlink-starter` with `--port %PORT%` in the
//! post-model arguments.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use simlink_core::{RouterEndpoint, SystemEnv};
use simlink_model::{Mm1Model, ModelController, serve};
use simlink_proto::Identifier;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// M/M/1 queue federate
#[derive(Parser, Debug)]
#[command(name = "simlink-mm1")]
#[command(about = "Single-server queue federate for simlink")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Identity requests must be addressed to
    #[arg(short, long)]
    instance_id: String,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

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

    let addr = SocketAddr::new(args.host, args.port);
    let mut router = RouterEndpoint::bind(addr).await?;
    let mut controller = ModelController::new(Identifier::from(args.instance_id), Mm1Model::new());

    let shutdown = serve(&mut router, &mut controller, &SystemEnv::new()).await;
    tracing::info!("Stopped: {:?}", shutdown);
    router.close();

    Ok(())
}
