//! downwatch - run a command once, when every monitored target has been
//! continuously unreachable for a threshold duration.
//!
//! Intended as an unattended watchdog, e.g. triggering a failover
//! script once a whole link is confirmed dead.

mod config;
mod executor;
mod monitor;
mod probe;
mod tracker;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::MonitorConfig;
use executor::CommandExecutor;
use monitor::{Monitor, RunOutcome};
use probe::ProbeKind;

#[derive(Parser)]
#[command(name = "downwatch")]
#[command(
    about = "Monitor targets and run a command when all of them have been \
             down for a threshold duration",
    long_about = None
)]
struct Cli {
    /// Targets to monitor: addresses or hostnames (host:port for --probe tcp)
    #[arg(short = 'i', long = "targets", num_args = 1.., required = true)]
    targets: Vec<String>,

    /// Minimum continuous downtime threshold in seconds
    #[arg(short, long)]
    timeout: f64,

    /// Command to execute when all targets are down
    #[arg(short, long)]
    command: String,

    /// Probe mechanism
    #[arg(long, value_enum, default_value = "ping")]
    probe: ProbeKind,

    /// Seconds between probes of each target
    #[arg(long, default_value_t = config::DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: f64,

    /// Seconds between trigger evaluations
    #[arg(long, default_value_t = config::DEFAULT_EVAL_INTERVAL_SECS)]
    eval_interval: f64,

    /// Per-probe timeout in seconds
    #[arg(long, default_value_t = config::DEFAULT_PROBE_TIMEOUT_SECS)]
    probe_timeout: f64,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "downwatch=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match MonitorConfig::new(
        cli.targets,
        cli.timeout,
        &cli.command,
        cli.poll_interval,
        cli.eval_interval,
        cli.probe_timeout,
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let prober = probe::build_prober(cli.probe, config.probe_timeout);
    let monitor = Monitor::new(config, prober, Arc::new(CommandExecutor));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
            // Without a signal handler, only the gate can end the run.
            std::future::pending::<()>().await;
        }
    };

    match monitor.run(shutdown).await {
        RunOutcome::Triggered | RunOutcome::Interrupted => ExitCode::SUCCESS,
        RunOutcome::ActionFailed(_) => ExitCode::FAILURE,
    }
}
