//! NetWarden Daemon - Main entry point
//!
//! Polls NETCONF devices on a schedule and serves the reconciled topology.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "netwarden")]
#[command(about = "NETCONF topology discovery daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netwarden.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Poll every device once, print the results and exit
    #[arg(long)]
    poll_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("NetWarden v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    let state = state::AppState::new(config.clone()).await?;
    let poller = state.poller.config();
    info!(
        devices = config.devices.len(),
        scope_filter = ?poller.scope_filter,
        max_concurrency = poller.max_concurrency,
        "Configuration loaded"
    );

    if args.poll_once {
        info!("Running single poll");
        let snapshots = state.scheduler.run_once().await;
        println!("Polled {} devices:", snapshots.len());
        for snapshot in &snapshots {
            println!(
                "  - {} {:?} ({} records)",
                snapshot.device_id,
                snapshot.reachability_status,
                snapshot.topology.len()
            );
            if let Some(detail) = &snapshot.detail {
                println!("    {}", detail);
            }
        }

        let graph = state.graph().await?;
        println!(
            "Graph: {} nodes, {} links",
            graph.node_count(),
            graph.links().len()
        );
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
