//! synconflict daemon entry point.
//!
//! Loads configuration, watches the vault for file changes, keeps the
//! conflict counts of tracked files current, and handles graceful shutdown.

mod signals;
mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use synconflict_core::config::AppConfig;
use synconflict_core::conflict::all_groups;
use synconflict_core::tree::FsTree;
use synconflict_core::watch::fs::VaultWatcher;
use synconflict_core::watch::{self, LiveUpdateCoordinator, StatusSink};

use status::StatusReporter;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// synconflict watcher daemon.
#[derive(Parser, Debug)]
#[command(
    name = "synconflict-daemon",
    version,
    about = "Watches a synced folder and reports live conflict counts"
)]
struct Args {
    /// Path to the TOML configuration file
    /// [default: <config dir>/synconflict/config.toml].
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vault root, overriding `vault.root` from the configuration.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Additional vault-relative file to track (repeatable).
    #[arg(short, long)]
    track: Vec<String>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) = load_config(&args)?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    let root = config.vault.root.canonicalize().with_context(|| {
        format!(
            "vault root {} is not accessible",
            config.vault.root.display()
        )
    })?;

    // Startup banner
    info!("========================================");
    info!("  synconflict daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("Vault root    : {}", root.display());
    info!("Merge tool    : {}", config.merge.tool);
    info!(
        "Status file   : {}",
        config
            .daemon
            .status_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not set".to_string())
    );
    info!("Log level     : {}", log_level);
    info!("========================================");

    let tree = Arc::new(FsTree::new(root.clone()));

    let index = all_groups(tree.as_ref());
    let total: usize = index.values().map(|g| g.len()).sum();
    info!(files = index.len(), conflicts = total, "initial vault scan complete");
    for group in index.values() {
        info!(
            file = %group.original_path,
            conflicts = group.len(),
            missing_original = group.original.is_none(),
            "conflict group"
        );
    }

    // Start watching before opening views so no change slips between the
    // initial counts and the first event.
    let (watcher, events) = VaultWatcher::start(&root).context("failed to start file watcher")?;

    let mut coordinator = LiveUpdateCoordinator::new(tree.clone());
    let mut reporter = StatusReporter::new(
        root.display().to_string(),
        config.daemon.status_file.clone(),
    );

    let mut tracked: Vec<String> = config.daemon.track.clone();
    for path in &args.track {
        if !tracked.contains(path) {
            tracked.push(path.clone());
        }
    }
    for path in &tracked {
        let update = coordinator.open_view(path);
        reporter.publish(&update).await;
    }
    if tracked.is_empty() {
        warn!("no files tracked; add daemon.track entries or pass --track");
    }
    // Write the status file even when there is nothing to track yet.
    reporter.write_status_file().await;

    // Create a shutdown notify for cooperative cancellation
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let loop_shutdown = shutdown.clone();

    let live_handle = tokio::spawn(async move {
        let coordinator = watch::run(coordinator, events, &mut reporter, loop_shutdown).await;
        (coordinator, reporter)
    });

    // Wait for shutdown signal
    signals::wait_for_shutdown().await;

    info!("Shutdown signal received, stopping...");

    // notify_one stores a permit, so the loop sees it even mid-publish.
    shutdown.notify_one();

    match tokio::time::timeout(Duration::from_secs(10), live_handle).await {
        Ok(Ok((coordinator, _reporter))) => {
            info!(views = coordinator.view_count(), "live update loop stopped gracefully")
        }
        Ok(Err(e)) => warn!("live update task error: {}", e),
        Err(_) => warn!("live update loop did not stop within 10s, forcing shutdown"),
    }

    if let Err(e) = watcher.close() {
        warn!(error = %e, "failed to stop file watcher");
    }

    info!("synconflict daemon stopped.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// `<config dir>/synconflict/config.toml`, falling back to the working
/// directory on platforms without a config dir.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("synconflict").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("synconflict.toml"))
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(args: &Args) -> Result<(AppConfig, PathBuf)> {
    let (mut config, path) = match &args.config {
        Some(path) => (
            AppConfig::load_from_file(path).context("failed to load configuration file")?,
            path.clone(),
        ),
        None => {
            let path = default_config_path();
            (
                AppConfig::load_or_default(&path).context("failed to load configuration file")?,
                path,
            )
        }
    };
    apply_overrides(&mut config, args);
    config
        .validate()
        .context("configuration validation failed")?;
    Ok((config, path))
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(root) = &args.vault {
        config.vault.root = root.clone();
    }
    if let Some(level) = &args.log_level {
        config.daemon.log_level = level.clone();
    }
}
