//! hashtag-lights
//!
//! Switches relay-driven lights on a Raspberry Pi whenever a new post with the
//! configured hashtag shows up.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hashtag_lights::app;
use hashtag_lights::config::{AppConfig, FeedMode, PinNumbering};
use hashtag_lights::feed::Cursor;
use hashtag_lights::output::{build_sink, pins};
use hashtag_lights::paths::AppPaths;

/// Hashtag Lights - flash the lights when the hashtag shows up
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: ./config.yaml or the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the provider key file (JSON)
    #[arg(short = 'k', long, env = "LIGHTS_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Emit JSON log lines on stdout
    #[arg(long)]
    json_logs: bool,

    /// Override feed.mode from the config file
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Resume polling after this item id
    #[arg(long)]
    since_id: Option<String>,

    /// Log pin writes instead of driving GPIO
    #[arg(long)]
    dry_run: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,

    /// Print the board → BCM pin map, then exit
    #[arg(long)]
    list_pins: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Poll,
    Stream,
}

impl From<ModeArg> for FeedMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Poll => FeedMode::Poll,
            ModeArg::Stream => FeedMode::Stream,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref(), args.json_logs)?;

    if args.list_pins {
        print_pin_map();
        return Ok(());
    }

    info!("Starting hashtag-lights v{}...", env!("CARGO_PKG_VERSION"));

    let paths = AppPaths::detect().with_overrides(args.config.clone(), args.credentials.clone());
    info!(
        "Base directory: {} ({})",
        paths.base_dir().display(),
        if paths.is_local { "working directory" } else { "user config" }
    );
    info!("Configuration file: {}", paths.config.display());
    info!("Credentials file: {}", paths.credentials.display());

    let mut config = match AppConfig::load(&paths.config).await {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {:#}", e);
            return Err(e);
        }
    };

    if let Some(mode) = args.mode {
        config.feed.mode = mode.into();
        config
            .validate()
            .context("Configuration invalid for the requested mode")?;
    }

    if args.check_config {
        print_summary(&config, &paths);
        return Ok(());
    }

    if args.dry_run {
        warn!("Dry run: pin writes are only logged");
    }

    let dry_run = args.dry_run;
    let since = args
        .since_id
        .map(Cursor::starting_at)
        .unwrap_or_default();

    if let Err(e) = app::run(
        &config,
        &paths.credentials,
        since,
        |output| build_sink(output, dry_run),
        shutdown_signal(),
    )
    .await
    {
        error!("❌ {:#}", e);
        return Err(e);
    }

    info!("hashtag-lights shutdown complete");
    Ok(())
}

fn init_logging(level: &str, log_dir: Option<&Path>, json: bool) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "hashtag-lights.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let plain = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });
    let structured = json.then(|| tracing_subscriber::fmt::layer().json().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Resolves on Ctrl+C, or SIGTERM when running as a service
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("🛑 Shutdown signal received");
}

fn print_pin_map() {
    println!("Board  BCM");
    for (board, bcm) in pins::BOARD_TO_BCM {
        println!("{:>5}  {:>3}", board, bcm);
    }
}

fn print_summary(config: &AppConfig, paths: &AppPaths) {
    let feed = &config.feed;
    let output = &config.output;

    println!("Configuration OK: {}", paths.config.display());
    println!("  Feed:    {:?} mode, {}", feed.mode, feed.query_hashtag());
    match feed.mode {
        FeedMode::Poll => println!("           every {} ms", feed.poll_interval_ms),
        FeedMode::Stream => {
            println!(
                "           {} rule(s), replace on start: {}",
                feed.rules.len(),
                feed.replace_rules
            );
            println!(
                "           backoff {}^n s, capped at {} s",
                feed.backoff.base, feed.backoff.max_delay_secs
            );
            println!("           reconnect after {} s of silence", feed.stream_idle_secs);
        }
    }
    println!(
        "  Output:  {:?} driver, {:?} numbering, active {}",
        output.driver,
        output.numbering,
        if output.active_low { "low" } else { "high" }
    );
    for group in &output.groups {
        let bcm: Vec<String> = group
            .pins
            .iter()
            .map(|&pin| match output.numbering {
                PinNumbering::Board => pins::board_to_bcm(pin)
                    .map(|b| format!("{} (BCM {})", pin, b))
                    .unwrap_or_else(|| pin.to_string()),
                PinNumbering::Bcm => pin.to_string(),
            })
            .collect();
        println!("           {}: {}", group.name, bcm.join(", "));
    }
    println!(
        "  Match:   {:?}, auto-off after {} ms",
        output.on_match, output.auto_off_ms
    );
    if let Some(scene) = &output.scene {
        println!("  Scene:   {} / {}", scene.primary, scene.secondary);
    }
    if output.startup_flash.enabled {
        println!(
            "  Flash:   {} x {} ms",
            output.startup_flash.count, output.startup_flash.step_ms
        );
    }
}
