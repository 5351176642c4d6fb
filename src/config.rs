use clap::Parser;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::Config as PgConfig;

use crate::error::ErrorExposure;
use crate::rate_limit::RateQuota;
use crate::{Result, SqlGateError};

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlgate")]
#[command(about = "sqlgate - read-only SQL query gateway for PostgreSQL", long_about = None)]
pub struct Config {
    // Database
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, help = "PostgreSQL connection URL or key=value string")]
    pub database_url: String,

    #[arg(long, default_value = "10", env = "SQLGATE_POOL_SIZE", help = "Maximum number of pooled connections")]
    pub pool_size: usize,

    #[arg(long, default_value = "30", env = "SQLGATE_POOL_TIMEOUT", help = "Seconds to wait for a free pooled connection")]
    pub pool_timeout: u64,

    #[arg(long, env = "SQLGATE_NO_DIRECT_SESSION_READ_ONLY", help = "Do not set the session-level read-only default on direct connections")]
    pub no_direct_session_read_only: bool,

    // Access control
    #[arg(long, env = "SQLGATE_API_KEY", hide_env_values = true, help = "Shared secret callers must present")]
    pub api_key: String,

    #[arg(long, default_value = "100/hour", env = "SQLGATE_RATE_LIMIT", help = "Per-client quota, e.g. 100/hour or 10 per minute")]
    pub rate_limit: String,

    #[arg(long, env = "SQLGATE_THROTTLE_JSON_ENDPOINT", help = "Apply the rate limiter to the JSON-body endpoint too")]
    pub throttle_json_endpoint: bool,

    #[arg(long, value_enum, default_value = "full", env = "SQLGATE_ERROR_DETAIL", help = "How much database error text is returned to callers")]
    pub error_detail: ErrorExposure,

    // HTTP
    #[arg(long, default_value = "0.0.0.0", env = "SQLGATE_HOST")]
    pub host: String,

    #[arg(short, long, default_value = "8000", env = "PORT")]
    pub port: u16,

    #[arg(long = "cors-origin", env = "SQLGATE_CORS_ORIGINS", value_delimiter = ',', help = "Allowed CORS origin; any origin when none are given")]
    pub cors_origins: Vec<String>,

    // Logging
    #[arg(long, default_value = "info", env = "SQLGATE_LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, default_value = "2000", env = "SQLGATE_MAX_LOGGED_QUERY_CHARS", help = "Query text longer than this is truncated in logs")]
    pub max_logged_query_chars: usize,

    #[arg(long, default_value = "300", env = "SQLGATE_STATUS_LOG_INTERVAL", help = "Interval for logging pool and limiter status in seconds")]
    pub status_log_interval: u64,
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    /// Check everything that can be checked before touching the network
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(SqlGateError::Config("API key must not be empty".to_string()));
        }
        if self.pool_size == 0 {
            return Err(SqlGateError::Config("pool size must be at least 1".to_string()));
        }
        self.rate_quota()?;
        self.pg_config()?;
        Ok(())
    }

    pub fn rate_quota(&self) -> Result<RateQuota> {
        self.rate_limit.parse()
    }

    /// Parse the database URL into discrete connection settings
    pub fn pg_config(&self) -> Result<PgConfig> {
        let url = strip_driver_suffix(self.database_url.trim());
        PgConfig::from_str(&url)
            .map_err(|e| SqlGateError::Config(format!("invalid database URL: {}", e)))
    }

    pub fn pool_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.pool_timeout)
    }

    pub fn status_log_interval_duration(&self) -> Duration {
        Duration::from_secs(self.status_log_interval.max(1))
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `postgresql+psycopg://...` becomes `postgresql://...`
fn strip_driver_suffix(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) if scheme.contains('+') => {
            let base = scheme.split('+').next().unwrap_or(scheme);
            format!("{}://{}", base, rest)
        }
        _ => url.to_string(),
    }
}
