mod actuation;
mod board;
mod capture;
mod classifier;
mod config;
mod geometry;
mod lifecycle;
mod orientation;
mod perception;
mod pool;
mod store;
mod sync_client;
mod tap;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::actuation::ActuationLoop;
use crate::capture::{AdbFrameSource, FrameSource, ScreenFrameSource};
use crate::config::{Config, DEFAULT_CONFIG_PATH, SourceKind};
use crate::lifecycle::Shutdown;
use crate::perception::PerceptionLoop;
use crate::pool::ClassifierPool;
use crate::store::{FileStore, StateStore};
use crate::sync_client::{HttpSyncClient, RemoteSync};
use crate::tap::AdbTapInjector;

fn cli() -> Command {
    Command::new("zugzwang-relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keeps an on-screen board in sync with a remote move service")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file, created with defaults when missing")
                .default_value(DEFAULT_CONFIG_PATH)
                .global(true),
        )
        .arg(
            Arg::new("service-url")
                .long("service-url")
                .value_name("URL")
                .help("Decision service base URL (overrides config)")
                .global(true),
        )
        .arg(
            Arg::new("store-dir")
                .long("store-dir")
                .value_name("DIR")
                .help("Shared state directory (overrides config)")
                .global(true),
        )
        .arg(
            Arg::new("source")
                .long("source")
                .value_name("SOURCE")
                .help("Where frames come from (overrides config)")
                .value_parser(["screen", "adb"])
                .global(true),
        )
        .arg(
            Arg::new("adb-serial")
                .long("adb-serial")
                .value_name("SERIAL")
                .help("adb device serial when several are attached")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level; RUST_LOG takes precedence when set")
                .default_value("info")
                .value_parser(["off", "error", "warn", "info", "debug", "trace"])
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Reset the session and run both loops until Ctrl+C (default)")
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .help("Keep the stored session instead of resetting it")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("perceive").about("Run the perception loop only"))
        .subcommand(Command::new("actuate").about("Run the actuation loop only"))
        .subcommand(
            Command::new("reset").about("Clear the shared session state").arg(
                Arg::new("yes")
                    .long("yes")
                    .short('y')
                    .help("Don't ask for confirmation")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(Command::new("status").about("Print every shared key"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .and_then(|l| l.parse().ok())
        .unwrap_or(LevelFilter::INFO);
    initialize_logging(level);

    let config = load_config(&matches)?;
    let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&config.store_dir)?);

    match matches.subcommand() {
        Some(("perceive", _)) => run_loops(&config, store, true, false).await,
        Some(("actuate", _)) => run_loops(&config, store, false, true).await,
        Some(("reset", sub)) => reset(&config, store.as_ref(), sub.get_flag("yes")),
        Some(("status", _)) => status(&config, store.as_ref()),
        Some(("run", sub)) => {
            if !sub.get_flag("resume") {
                lifecycle::reset_session(store.as_ref())?;
            }
            run_loops(&config, store, true, true).await
        }
        _ => {
            lifecycle::reset_session(store.as_ref())?;
            run_loops(&config, store, true, true).await
        }
    }
}

fn initialize_logging(level: LevelFilter) {
    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().event_format(format))
        .with(filter)
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::load_or_init(&path)?;

    if let Some(url) = matches.get_one::<String>("service-url") {
        config.service_url = url.clone();
    }
    if let Some(dir) = matches.get_one::<String>("store-dir") {
        config.store_dir = PathBuf::from(dir);
    }
    match matches.get_one::<String>("source").map(String::as_str) {
        Some("screen") => config.source = SourceKind::Screen,
        Some("adb") => config.source = SourceKind::Adb,
        _ => {}
    }
    if let Some(serial) = matches.get_one::<String>("adb-serial") {
        config.adb_serial = Some(serial.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn frame_source(config: &Config) -> Box<dyn FrameSource> {
    match config.source {
        SourceKind::Screen => Box::new(ScreenFrameSource),
        SourceKind::Adb => Box::new(AdbFrameSource::new(config.adb_serial.clone())),
    }
}

async fn run_loops(
    config: &Config,
    store: Arc<dyn StateStore>,
    perceive: bool,
    actuate: bool,
) -> Result<()> {
    let remote: Arc<dyn RemoteSync> = Arc::new(HttpSyncClient::new(&config.service_url)?);
    let shutdown = Shutdown::new();
    let mut tasks = JoinSet::new();

    info!(
        service = %config.service_url,
        source = %config.source,
        store = %config.store_dir.display(),
        "Relay starting. Press Ctrl+C to stop."
    );

    if perceive {
        let pool = ClassifierPool::uniform(Arc::new(config.classifier), config.pool_size);
        let perception = PerceptionLoop::new(
            config,
            store.clone(),
            frame_source(config),
            pool,
            remote.clone(),
        )?;
        tasks.spawn(perception.run(shutdown.subscribe()));
    }
    if actuate {
        let tapper = Arc::new(AdbTapInjector::new(config.adb_serial.clone()));
        let actuation = ActuationLoop::new(config, store.clone(), tapper, remote.clone());
        tasks.spawn(actuation.run(shutdown.subscribe()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Stopping loops");
    shutdown.trigger();

    while let Some(joined) = tasks.join_next().await {
        joined.context("Loop task panicked")?;
    }
    Ok(())
}

fn reset(config: &Config, store: &dyn StateStore, yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!(
                "Clear all session state in {}?",
                config.store_dir.display()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
    if !confirmed {
        println!("Aborted");
        return Ok(());
    }
    lifecycle::reset_session(store)?;
    println!("Session state cleared");
    Ok(())
}

fn status(config: &Config, store: &dyn StateStore) -> Result<()> {
    println!("Store: {}", config.store_dir.display());
    for (key, value) in lifecycle::snapshot(store)? {
        println!("  {:<18} {}", key, value.as_deref().unwrap_or("-"));
    }
    Ok(())
}
