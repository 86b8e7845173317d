//! Level monitor binary
//!
//! Wires the venue connection to the interaction detector and alert engine:
//! reads configuration from the environment, loads the level snapshot file,
//! reloads it periodically, and runs the feed loop until the connection
//! fails terminally or the process is interrupted.

use anyhow::{Context, Result};
use common::StructuralLevel;
use dotenv::dotenv;
use feed_connector::{ConnectionConfig, ConnectionManager, WsTransportFactory};
use level_monitor::{
    AlertConfig, AlertEngine, Detector, DetectorConfig, LevelMonitor, LevelStore, LogSink,
    NotificationSink,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_RELOAD_SECS: u64 = 300;
const DEFAULT_STATS_SECS: u64 = 60;
const TICK_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    info!("starting level monitor v{}", env!("CARGO_PKG_VERSION"));

    let endpoint = required_env("LEVELWATCH_ENDPOINT")?;
    let username = required_env("LEVELWATCH_USERNAME")?;
    let password = required_env("LEVELWATCH_PASSWORD")?;
    let recipient = required_env("LEVELWATCH_RECIPIENT")?;
    let levels_file = PathBuf::from(required_env("LEVELWATCH_LEVELS_FILE")?);
    let symbols = parse_symbols(&required_env("LEVELWATCH_SYMBOLS")?)?;
    let reload_secs = optional_env("LEVELWATCH_RELOAD_SECS", DEFAULT_RELOAD_SECS)?;

    let store = Arc::new(LevelStore::new());
    let loaded = load_snapshot(&levels_file, &store)?;
    info!(count = loaded, file = %levels_file.display(), "level snapshot loaded");

    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);
    let engine = Arc::new(AlertEngine::new(
        AlertConfig::new(recipient),
        Arc::clone(&store),
        sink,
    ));
    let alert_stats = engine.stats();

    let detector = Detector::new(DetectorConfig::default(), Arc::clone(&store));
    let monitor = LevelMonitor::new(detector, engine);
    let monitor_stats = monitor.stats();

    let mut manager = ConnectionManager::new(
        ConnectionConfig::new(endpoint, username, password),
        Arc::new(WsTransportFactory),
    );
    manager.on_state_change(|state| info!(?state, "connection state"));
    let connection_stats = manager.stats();

    spawn_reload_task(Arc::clone(&store), levels_file, reload_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(DEFAULT_STATS_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            info!(
                connection = ?connection_stats.snapshot(),
                monitor = ?monitor_stats.snapshot(),
                alerts = ?alert_stats.snapshot(),
                "stats"
            );
        }
    });

    manager.connect().await.context("initial connect failed")?;
    manager.authenticate().await.context("authentication failed")?;
    for (symbol, exchange) in &symbols {
        manager.subscribe(symbol, exchange).await?;
    }

    let (tx, rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let worker = tokio::spawn(monitor.run(rx));

    tokio::select! {
        result = manager.run(tx) => {
            if let Err(e) = result {
                error!(error = %e, "feed connection failed terminally");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    manager.disconnect().await;
    worker.await.context("monitor worker panicked")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "level_monitor=info,feed_connector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn optional_env(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}

/// Parse "ES:CME,NQ:CME" into (symbol, exchange) pairs; the exchange
/// defaults to CME when omitted
fn parse_symbols(raw: &str) -> Result<Vec<(String, String)>> {
    let mut symbols = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once(':') {
            Some((symbol, exchange)) => {
                symbols.push((symbol.to_string(), exchange.to_string()));
            }
            None => symbols.push((entry.to_string(), "CME".to_string())),
        }
    }
    anyhow::ensure!(!symbols.is_empty(), "LEVELWATCH_SYMBOLS is empty");
    Ok(symbols)
}

fn load_snapshot(path: &Path, store: &LevelStore) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading level snapshot {}", path.display()))?;
    let levels: Vec<StructuralLevel> =
        serde_json::from_str(&raw).context("level snapshot is not valid JSON")?;
    Ok(store.load(levels))
}

fn spawn_reload_task(store: Arc<LevelStore>, path: PathBuf, reload_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(reload_secs.max(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            match load_snapshot(&path, &store) {
                Ok(count) => info!(count, "level snapshot reloaded"),
                Err(e) => warn!(error = %e, "level snapshot reload failed, keeping old set"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_parse_with_and_without_exchange() {
        let parsed = parse_symbols("ES:CME, NQ ,YM:CBOT").expect("parse");
        assert_eq!(
            parsed,
            vec![
                ("ES".to_string(), "CME".to_string()),
                ("NQ".to_string(), "CME".to_string()),
                ("YM".to_string(), "CBOT".to_string()),
            ]
        );
    }

    #[test]
    fn empty_symbol_list_is_an_error() {
        assert!(parse_symbols(" , ").is_err());
    }
}
