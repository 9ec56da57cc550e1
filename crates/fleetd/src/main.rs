//! fleetd: the fleet capacity daemon.
//!
//! Watches per-instance CPU utilization and replaces (or adds) instances
//! when it crosses the configured threshold, up to a lifetime launch cap.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleet/fleet.toml
//! fleetd run --config fleet.toml --once
//! fleetd check-config --config fleet.toml
//! ```

mod backends;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use fleet_controller::{ControlLoop, LoopExit};
use fleet_core::config::{NotifierConfig, ProbeSource};
use fleet_core::FleetConfig;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet capacity daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Run a single tick and exit.
        #[arg(long)]
        once: bool,
    },
    /// Validate the config and print the resolved policy.
    CheckConfig {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, once } => run(&config, once).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load(path: &Path) -> anyhow::Result<FleetConfig> {
    FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(path: &Path, once: bool) -> anyhow::Result<()> {
    info!(config = %path.display(), "fleet daemon starting");
    let config = load(path)?;
    let policy = config.policy()?;

    // ── Backends ───────────────────────────────────────────────

    let probe = backends::build_probe(&config)?;
    let provisioner = backends::build_provisioner(&config)?;
    let notifier = backends::build_notifier(&config.notifier)?;
    let fleet = backends::initial_fleet(&config, provisioner.as_ref()).await?;
    info!(
        managed = ?fleet.managed_ids(),
        total_ever_launched = fleet.total_ever_launched(),
        "fleet initialized"
    );

    let mut control = ControlLoop::new(policy, fleet, probe, provisioner, notifier)
        .with_settings(backends::loop_settings(&config)?);
    if let Some(recorder) = backends::build_ledger(config.ledger.as_ref()) {
        info!(path = %recorder.ledger.path().display(), "ledger enabled");
        control = control.with_ledger(recorder);
    }

    if once {
        let report = control.tick().await?;
        info!(
            outcome = ?report.outcome,
            actions = report.decision.actions.len(),
            managed = control.fleet().len(),
            "single tick complete"
        );
        return Ok(());
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "failed to install CTRL+C handler");
                // Keep the sender alive so the loop is not cancelled.
                std::future::pending::<()>().await;
            }
        }
    });

    match control.run(shutdown_rx).await {
        LoopExit::Cancelled => info!("fleet daemon stopped"),
        LoopExit::Capped => info!(
            total_ever_launched = control.fleet().total_ever_launched(),
            "fleet daemon stopped: launch cap reached"
        ),
    }
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let policy = config.policy()?;

    println!("config ok: {}", path.display());
    println!("  threshold:          {}%", policy.threshold);
    println!("  max_fleet_size:     {}", policy.max_fleet_size);
    println!("  breach batch:       {}", policy.instances_per_breach_batch);
    println!("  poll_interval:      {}s", policy.poll_interval.as_secs());
    println!("  strategy:           {}", serde_json::to_string(&policy.strategy)?.trim_matches('"'));
    println!("  on_cap:             {}", serde_json::to_string(&policy.on_cap)?.trim_matches('"'));
    println!("  min_population:     {}", policy.min_population);
    match policy.max_monitored {
        Some(n) => println!("  max_monitored:      {n}"),
        None => println!("  max_monitored:      all"),
    }
    if config.policy.initial_instances.is_empty() {
        println!("  initial fleet:      discovered from backend");
    } else {
        println!("  initial fleet:      {}", config.policy.initial_instances.join(", "));
    }
    let probe = match &config.probe.source {
        ProbeSource::Metrics { address, .. } => format!("metrics ({address})"),
        ProbeSource::RemoteExec { hosts, .. } => format!("remote_exec ({} static hosts)", hosts.len()),
    };
    println!("  probe:              {probe}");
    let notifier = match &config.notifier {
        NotifierConfig::Log => "log".to_string(),
        NotifierConfig::Webhook { url, .. } => format!("webhook ({url})"),
    };
    println!("  notifier:           {notifier}");
    if let Some(ledger) = &config.ledger {
        println!("  ledger:             {}", ledger.path);
    }
    Ok(())
}
