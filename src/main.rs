use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use multihost_pool::config::{self, Config};
use multihost_pool::pool::PgDriver;
use multihost_pool::{PoolManager, PoolManagerConfig};

/// Interval of the topology summary log line
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = load_or_default_config();

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    match &source {
        Ok(path) => info!(path = %path, "Loaded configuration"),
        Err(errors) => {
            for (path, error) in errors {
                warn!(path = %path, error = %error, "Failed to load config");
            }
            info!("Using default configuration");
        }
    }

    let dsn = config.database.dsn()?;
    let manager = PoolManager::new(PgDriver::new(), &dsn, PoolManagerConfig::from(&config))?;

    let ready_timeout = Duration::from_millis(config.health.ready_timeout_ms);
    match manager.ready(None, None, ready_timeout).await {
        Ok(()) => info!(
            masters = manager.master_pool_count(),
            replicas = manager.replica_pool_count(),
            "All endpoints classified"
        ),
        Err(e) => warn!(
            error = %e,
            available = manager.available_pool_count(),
            endpoints = manager.dsn().len(),
            "Not every endpoint is reachable yet"
        ),
    }

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => report(&manager),
        }
    }

    manager.close().await;
    Ok(())
}

fn report(manager: &PoolManager<PgDriver>) {
    let topology = manager.topology();
    for (i, dsn) in manager.dsn().iter().enumerate() {
        let id = multihost_pool::EndpointId(i);
        info!(
            endpoint = %dsn.redacted(),
            role = topology.role_of(id).map(|r| r.as_str()).unwrap_or("unavailable"),
            response_time_ms = manager.last_response_time(id).map(|d| d.as_secs_f64() * 1000.0),
            "Endpoint status"
        );
    }
    info!(
        masters = topology.master_count(),
        replicas = topology.replica_count(),
        outstanding = manager.outstanding_connections(),
        "Topology"
    );
}

/// Load the first readable config file, remembering why the others failed
fn load_or_default_config() -> (Config, Result<String, Vec<(String, config::ConfigError)>>) {
    let mut config_paths: Vec<String> = std::env::args().skip(1).take(1).collect();
    config_paths.extend(["config/multihost.toml", "multihost.toml"].map(String::from));

    let mut errors = Vec::new();
    for path in config_paths {
        match config::load_config(&path) {
            Ok(config) => return (config, Ok(path)),
            Err(e) => errors.push((path, e)),
        }
    }

    (Config::default(), Err(errors))
}
