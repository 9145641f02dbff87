//! Treewatch CLI - treewatch command
//!
//! Watches directories recursively and prints coalesced change events.

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tw_core::WatchRequest;
use watcher::Watcher;

mod util;

/// Treewatch - recursive file change notifications
#[derive(Parser)]
#[command(name = "treewatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to watch
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Glob pattern to exclude (repeatable)
    #[arg(short, long = "exclude")]
    excludes: Vec<String>,

    /// Glob pattern to include (repeatable, default: everything)
    #[arg(short, long = "include")]
    includes: Vec<String>,

    /// Poll every N milliseconds instead of using native notifications
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// Configuration file (default: <config dir>/treewatch/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Log every event
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = util::load_config(cli.config.as_deref())?;
    config.verbose |= cli.verbose;

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let requests: Vec<WatchRequest> = cli
        .paths
        .iter()
        .map(|path| {
            let mut request = WatchRequest::new(cwd.join(path)).with_excludes(cli.excludes.iter().cloned());
            if !cli.includes.is_empty() {
                request = request.with_includes(cli.includes.iter().cloned());
            }
            if let Some(ms) = cli.poll {
                request = request.with_polling_interval(Duration::from_millis(ms));
            }
            request
        })
        .collect();

    let (watcher, mut streams) = Watcher::with_native_backend(config)?;
    let report = watcher.watch(requests).await?;

    eprintln!(
        "{} {} director{} ({} unwatchable)",
        "Watching".green().bold(),
        report.started,
        if report.started == 1 { "y" } else { "ies" },
        report.unwatchable
    );

    loop {
        tokio::select! {
            Some(events) = streams.events.recv() => {
                for event in events {
                    println!("{}", util::format_event(&event, cli.json)?);
                }
            }
            Some(request) = streams.failures.recv() => {
                warn!(path = %request.path.display(), "Stopped watching {}", request);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    watcher.shutdown().await?;
    Ok(())
}
