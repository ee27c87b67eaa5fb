use anyhow::Context;
use clap::Parser;
use priormap::PriorMap;
use slam_node::{resolve_map_path, run, FileConfig, NodeChannels, SlamActor};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "slam_node", about = "Reflector-based EKF-SLAM node")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config/slam_node.toml")]
    config: PathBuf,

    /// Overrides `map_path` from the config file.
    #[arg(long)]
    map_path: Option<String>,

    /// Directory for rotated log files.
    #[arg(long, default_value = "./logs")]
    log_dir: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Channel buffer depth for each of the odometry/scan/cloud inputs.
    #[arg(long, default_value_t = 64)]
    channel_capacity: usize,
}

/// Initialize logging with stdout and rolling daily file output.
///
/// Returns a guard that must be held for the lifetime of the program to
/// ensure buffered log lines are flushed on shutdown.
fn init_logging(log_dir: &std::path::Path, level: &str) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "slam_node.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("slam_node={level}")));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir, &args.log_level)?;

    let file_config = FileConfig::load(&args.config)?;
    let map_path = resolve_map_path(args.map_path.clone(), &file_config)?;

    let prior_map = PriorMap::load_or_empty(&map_path)
        .with_context(|| format!("loading prior map at {}", map_path.display()))?;
    info!(landmarks = prior_map.len(), path = %map_path.display(), "prior map loaded");

    let actor = SlamActor::new(&file_config, prior_map);

    // The senders are the attachment point for the external message bus
    // (not part of this workspace); holding them here keeps the channels
    // open so the actor runs until an explicit shutdown signal instead of
    // exiting the moment a bus client would disconnect.
    let (odom_tx, odom_rx) = mpsc::channel(args.channel_capacity);
    let (scan_tx, scan_rx) = mpsc::channel(args.channel_capacity);
    let (cloud_tx, cloud_rx) = mpsc::channel(args.channel_capacity);

    let channels = NodeChannels {
        odom: odom_rx,
        scan: scan_rx,
        cloud: cloud_rx,
    };

    let actor = run(actor, channels, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    drop((odom_tx, scan_tx, cloud_tx));

    info!("shutting down, saving prior map");
    actor
        .shutdown(&map_path)
        .with_context(|| format!("saving prior map to {}", map_path.display()))?;

    Ok(())
}
