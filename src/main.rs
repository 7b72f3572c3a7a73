#![forbid(unsafe_code)]

//! `synapse-watch` — print new agent messages as they arrive.
//!
//! Loads configuration, applies command-line overrides, registers the
//! console handler and polls the message directory until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use synapse_watch::config::WatcherConfig;
use synapse_watch::models::criteria::parse_keywords;
use synapse_watch::models::Priority;
use synapse_watch::watcher::{ConsoleHandler, Watcher};
use synapse_watch::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "synapse-watch",
    about = "Watch a message directory and print new agent messages",
    version,
    long_about = None,
    after_help = "Examples:\n  synapse-watch --to ATLAS --priority HIGH\n  synapse-watch --keywords urgent,critical,emergency"
)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the message files.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Seconds between polls.
    #[arg(long)]
    interval: Option<f64>,

    /// Only show messages addressed to this agent.
    #[arg(long)]
    to: Option<String>,

    /// Only show messages from this agent.
    #[arg(long = "from")]
    from_agent: Option<String>,

    /// Only show this exact priority (HIGH, CRITICAL, ...).
    #[arg(long)]
    priority: Option<String>,

    /// Only show messages containing any of these comma-separated keywords.
    #[arg(long)]
    keywords: Option<String>,

    /// Wake up early on file-system events instead of waiting for the next poll.
    #[arg(long)]
    fs_events: bool,

    /// Verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format, args.verbose)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = build_config(args)?;
    let path = config.path.clone();
    let filter = config.filter.clone();

    let watcher = Arc::new(Watcher::new(config)?);
    watcher.register(Arc::new(ConsoleHandler))?;

    println!("synapse-watch v{}", env!("CARGO_PKG_VERSION"));
    println!("Watching: {}", path.display());
    if !filter.is_empty() {
        println!("Filters active: {filter}");
    }
    println!("Press Ctrl+C to stop\n");

    watcher.run_until(shutdown_signal()).await?;
    info!("synapse-watch shut down");
    Ok(())
}

/// Merge the optional config file with command-line overrides.
fn build_config(args: Cli) -> Result<WatcherConfig> {
    let mut config = match args.config {
        Some(ref file) => WatcherConfig::load_from_path(file)?,
        None => WatcherConfig::default(),
    };

    if let Some(path) = args.path {
        config.path = path;
    }
    if let Some(interval) = args.interval {
        config.poll_interval_seconds = interval;
    }
    if args.fs_events {
        config.fs_events = true;
    }
    if let Some(to) = args.to {
        config.filter.recipient = Some(to);
    }
    if let Some(from) = args.from_agent {
        config.filter.sender = Some(from);
    }
    if let Some(priority) = args.priority {
        config.filter.priority = Some(Priority::from(priority));
    }
    if let Some(keywords) = args.keywords {
        config.filter.keywords = parse_keywords(&keywords);
    }

    config.validate().map_err(|err| {
        error!(%err, "invalid configuration");
        err
    })?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = ctrl_c => {
                        if let Err(err) = result {
                            error!(%err, "ctrl-c signal handler failed");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
    info!("shutdown signal received");
}

fn init_tracing(log_format: LogFormat, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
