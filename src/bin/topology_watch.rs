//! Topology watch CLI
//!
//! Polls a topology endpoint and prints a summary line whenever the
//! topology changes.
//!
//! Usage:
//!   cargo run --features cli --bin topology-watch -- \
//!     --url http://localhost:8080 \
//!     --refresh high \
//!     --hide-inactive
//!
//!   # Single refresh, non-zero exit on failure
//!   cargo run --features cli --bin topology-watch -- --config config/dashboard.yaml --once

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use topology_sync::dashboard::{FailurePhase, TopologyDashboard, TopologyObserver};
use topology_sync::error::FetchError;
use topology_sync::topology::{ReconcileReport, TopologyStore};
use topology_sync::{DashboardConfig, RefreshRate};

/// Watch a live topology endpoint
#[derive(Parser, Debug)]
#[command(name = "topology-watch")]
#[command(about = "Poll a topology endpoint and report changes")]
struct Args {
    /// YAML config file (defaults apply when omitted)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(long, short = 'u', env = "TOPOLOGY_URL")]
    url: Option<String>,

    /// Refresh rate: low, medium, high or milliseconds
    #[arg(long, short = 'r', env = "TOPOLOGY_REFRESH")]
    refresh: Option<RefreshRate>,

    /// Filter out connections with no active sessions
    #[arg(long)]
    hide_inactive: bool,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,
}

struct ConsoleObserver;

impl TopologyObserver for ConsoleObserver {
    fn topology_changed(&self, store: &TopologyStore, report: &ReconcileReport, first_load: bool) {
        let counts = store.active_counts();
        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        let label = if first_load {
            "LOADED ".green().bold()
        } else {
            "CHANGED".cyan().bold()
        };
        println!(
            "[{}] {} {} entities, {} edges | active: {} leaves, {} groups | {} {} {}",
            stamp.dimmed(),
            label,
            store.len(),
            store.edge_count(),
            counts.active_leaves.to_string().green(),
            counts.active_groups.to_string().green(),
            format!("+{}", report.added.len()).green(),
            format!("~{}", report.updated.len()).yellow(),
            format!("-{}", report.removed.len()).red(),
        );

        let orphans = store.orphans();
        if !orphans.is_empty() {
            println!(
                "  {} {} entities reference a missing parent",
                "WARNING:".yellow(),
                orphans.len()
            );
        }
    }

    fn on_failure(&self, error: &FetchError, phase: FailurePhase) {
        let what = match phase {
            FailurePhase::FirstLoad => "Initial load failed",
            FailurePhase::Refresh => "Refresh failed, showing last known state",
        };
        eprintln!("{} {}: {}", "ERROR:".red().bold(), what, error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("topology_sync=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DashboardConfig::load_from_file(path)?,
        None => DashboardConfig::default(),
    };
    if let Some(url) = args.url {
        config.endpoint = url;
    }
    if let Some(refresh) = args.refresh {
        config.refresh = refresh;
    }
    if args.hide_inactive {
        config.show_inactive = false;
    }

    println!(
        "{} {} (refresh: {}, inactive: {})",
        "Watching".cyan().bold(),
        config.endpoint,
        config.refresh,
        if config.show_inactive { "shown" } else { "hidden" }
    );

    let mut dashboard = TopologyDashboard::connect(config, Arc::new(ConsoleObserver))?;

    if args.once {
        if dashboard.refresh_now().await.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    dashboard.start()?;
    let failed = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        result = dashboard.wait() => result.is_err(),
    };

    dashboard.dispose().await;
    if failed {
        std::process::exit(1);
    }
    println!("{}", "Stopped".cyan());
    Ok(())
}
