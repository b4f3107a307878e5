//! Server configuration from environment variables

use crate::error::ConfigError;
use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Configuration for the webhook/query server
///
/// Loaded from environment variables with defaults for local runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the ordered `.sql` schema files
    pub schema_dir: String,

    /// HTTP listen port (bound on 0.0.0.0)
    pub port: u16,

    /// Shared secret for webhook signatures; `None` disables verification
    pub webhook_secret: Option<String>,

    /// Rollup refresh interval in milliseconds
    pub rollup_refresh_interval_ms: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUNNERFLOW_DB_PATH` (default: runnerflow.db)
    /// - `RUNNERFLOW_SCHEMA_DIR` (default: sql)
    /// - `PORT` (default: 8080)
    /// - `WEBHOOK_SECRET` (optional)
    /// - `ROLLUP_REFRESH_INTERVAL_MS` (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            db_path: non_empty("RUNNERFLOW_DB_PATH").unwrap_or_else(|| "runnerflow.db".to_string()),

            schema_dir: non_empty("RUNNERFLOW_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),

            port: parse_or("PORT", non_empty("PORT"), 8080)?,

            webhook_secret: non_empty("WEBHOOK_SECRET"),

            rollup_refresh_interval_ms: positive(parse_or(
                "ROLLUP_REFRESH_INTERVAL_MS",
                non_empty("ROLLUP_REFRESH_INTERVAL_MS"),
                60_000,
            )?)?,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

fn parse_or<T: FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { var, value }),
    }
}

// Zero would make the scheduler's interval timer panic
fn positive(interval_ms: u64) -> Result<u64, ConfigError> {
    if interval_ms == 0 {
        return Err(ConfigError {
            var: "ROLLUP_REFRESH_INTERVAL_MS",
            value: interval_ms.to_string(),
        });
    }
    Ok(interval_ms)
}
