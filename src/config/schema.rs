use serde::Deserialize;

use super::ConfigError;

/// Environment variable consulted when the config carries no password
pub const PASSWORD_ENV: &str = "DB_PASSWORD";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Endpoints and credentials
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Role probing of every endpoint
    #[serde(default)]
    pub health: HealthCheckConfig,
    /// Acquire defaults
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl Config {
    /// Reject values the pool manager cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        if database.min_size > database.max_size {
            return Err(ConfigError::Invalid(format!(
                "database.min_size ({}) exceeds database.max_size ({})",
                database.min_size, database.max_size
            )));
        }
        if database.max_size == 0 {
            return Err(ConfigError::Invalid("database.max_size must be positive".into()));
        }
        let weight = self.routing.master_as_replica_weight;
        if !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::Invalid(format!(
                "routing.master_as_replica_weight must be within [0, 1], got {}",
                weight
            )));
        }
        if self.health.stopwatch_window_size == 0 {
            return Err(ConfigError::Invalid(
                "health.stopwatch_window_size must be positive".into(),
            ));
        }
        if self.health.refresh_timeout_ms == 0 || self.routing.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Database endpoints
// ============================================================================

/// Logical database reachable through several hosts
///
/// Either `dsn` is given verbatim (it may list several hosts), or it is
/// assembled from `hosts`, `port`, `user`, `password` and `dbname`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full multi-host connection string; takes precedence over the fields below
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// Falls back to the DB_PASSWORD environment variable
    #[serde(default)]
    pub password: Option<String>,
    /// Minimum physical connections per endpoint
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Maximum physical connections per endpoint
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

fn default_port() -> u16 {
    6432
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_min_size() -> u32 {
    1
}

fn default_max_size() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            hosts: Vec::new(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            min_size: default_min_size(),
            max_size: default_max_size(),
        }
    }
}

impl DatabaseConfig {
    /// Multi-host connection string for the pool manager
    pub fn dsn(&self) -> Result<String, ConfigError> {
        if let Some(dsn) = &self.dsn {
            return Ok(dsn.clone());
        }

        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid(
                "database.dsn or database.hosts must be set".into(),
            ));
        }

        let password = self
            .password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok());

        let mut userinfo = urlencoding::encode(&self.user).into_owned();
        if let Some(password) = password {
            userinfo.push(':');
            userinfo.push_str(&urlencoding::encode(&password));
        }

        let hosts: Vec<String> = self
            .hosts
            .iter()
            .map(|host| format!("{}:{}", host, self.port))
            .collect();

        Ok(format!(
            "postgresql://{}@{}/{}",
            userinfo,
            hosts.join(","),
            urlencoding::encode(&self.dbname)
        ))
    }
}

// ============================================================================
// Health / role probing
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Pause between two role probes of the same endpoint (milliseconds)
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
    /// Timeout for pool creation, system connection acquire and probe (milliseconds)
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Number of probe durations kept per endpoint
    #[serde(default = "default_stopwatch_window_size")]
    pub stopwatch_window_size: usize,
    /// How long the binary waits for every endpoint on startup (milliseconds)
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_refresh_delay_ms() -> u64 {
    1000
}

fn default_refresh_timeout_ms() -> u64 {
    30_000
}

fn default_stopwatch_window_size() -> usize {
    128
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            refresh_delay_ms: default_refresh_delay_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            stopwatch_window_size: default_stopwatch_window_size(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

// ============================================================================
// Routing defaults
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Default acquire timeout (milliseconds)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Read requests may use a master when no replica is available
    #[serde(default)]
    pub fallback_master: bool,
    /// Probability (0..=1) of treating masters as replica candidates
    #[serde(default)]
    pub master_as_replica_weight: f64,
}

fn default_acquire_timeout_ms() -> u64 {
    1000
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            fallback_master: false,
            master_as_replica_weight: 0.0,
        }
    }
}
