//! Simlink federation manager binary.
//!
//! # Usage
//!
//! ```bash
//! simlink-manager --starter 127.0.0.1:5555 --software mm1 --federates 2 \
//!     --run-duration 100 --param iat=1.0 --param servicetime=0.85 --stat qN.max
//! ```
//!
//! Outcomes are logged; the exit code is non-zero when any federate ends in
//! error.

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use simlink_core::{LifecycleConfig, SystemEnv};
use simlink_manager::{
    DEFAULT_ARGS_AFTER, FederateTemplate, FederationConfig, parse_param, random_run_id,
    run_federation,
};
use simlink_proto::{Identifier, RunControl, SetParameter, SimTime};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Simlink federation manager
#[derive(Parser, Debug)]
#[command(name = "simlink-manager")]
#[command(about = "Runs simulation federates through a simlink starter")]
#[command(version)]
struct Args {
    /// Starter address
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    starter: SocketAddr,

    /// Software alias known to the starter
    #[arg(long)]
    software: String,

    /// Number of federates
    #[arg(short, long, default_value = "1")]
    federates: usize,

    /// Model file handed to the federate executable
    #[arg(long, default_value = "")]
    model_path: String,

    /// Post-model arguments; %PORT% and %ID% are substituted
    #[arg(long, default_value = DEFAULT_ARGS_AFTER, allow_hyphen_values = true)]
    args_after: String,

    /// Working directory per federate; %ID% is substituted
    #[arg(long, default_value = "")]
    working_directory: String,

    /// Simulated run length in seconds
    #[arg(long, default_value = "100")]
    run_duration: f64,

    /// Simulated warmup in seconds
    #[arg(long, default_value = "0")]
    warmup_duration: f64,

    /// Simulated seconds per wall-clock second
    #[arg(long, default_value = "inf")]
    speed: f64,

    /// Replications per federate
    #[arg(long, default_value = "1")]
    replications: i32,

    /// Model parameter, as name=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<SetParameter>,

    /// Statistic to collect (repeatable)
    #[arg(long = "stat")]
    stats: Vec<String>,

    /// Wait between status polls, in milliseconds
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let env = SystemEnv::new();
    let template = FederateTemplate {
        software: args.software,
        model_path: args.model_path,
        args_after: args.args_after,
        working_directory: args.working_directory,
        run_control: RunControl::new(
            SimTime::seconds(args.run_duration),
            SimTime::seconds(args.warmup_duration),
        )
        .with_speed(args.speed)
        .with_replications(args.replications),
        parameters: args.params,
        statistics: args.stats,
    };
    let config = FederationConfig {
        starter: args.starter,
        lifecycle: LifecycleConfig {
            run_id: random_run_id(&env),
            manager_id: Identifier::from("FM"),
            starter_id: Identifier::from("FS"),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        },
        federates: template.specs(args.federates),
    };

    let report = run_federation(config, env).await?;

    for (ordinal, outcome) in &report.outcomes {
        tracing::info!("Federate {} ({}): {}", ordinal, outcome.instance_id, outcome.state);
        for (name, value) in &outcome.statistics {
            tracing::info!("  {} = {}", name, value);
        }
    }
    for (ordinal, outcome) in report.failures() {
        if let Some(error) = &outcome.error {
            tracing::error!("Federate {} ({}) failed: {}", ordinal, outcome.instance_id, error);
        }
    }

    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
