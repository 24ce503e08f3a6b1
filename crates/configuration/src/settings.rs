use crate::error::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// The root configuration structure for the entire application.
///
/// Every section is optional in `config.toml`; a missing section falls back to its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub compiler: CompilerSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub preview: PreviewSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Connection settings for the PostgreSQL warehouse and definition store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Name of the environment variable holding the connection string.
    pub url_env: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Where the HTTP surface listens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::invalid("server.host", format!("'{}' is not an IP address", self.host)))
    }
}

/// Policy knobs of the report query compiler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Whether a deal-level calculation may appear in a tranche-level report, repeating the
    /// deal's value on every tranche row.
    pub allow_deal_broadcast: bool,
}

/// Limits applied when a compiled report runs against the warehouse.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Deadline for a single report query, in milliseconds.
    pub timeout_ms: u64,
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sample filter used when previewing a single calculation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    pub sample_deals: Vec<i32>,
    /// Applied to every sample deal.
    pub sample_tranche_ids: Vec<String>,
    pub sample_cycle: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for the daily-rolling log file.
    pub directory: String,
}

// --- Default Implementations ---
// These allow a deployment to omit any section from its toml and still start.

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url_env: "DATABASE_URL".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            allow_deal_broadcast: true,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            sample_deals: vec![101, 102, 103],
            sample_tranche_ids: vec!["A".to_string(), "B".to_string()],
            sample_cycle: 202404,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
        }
    }
}
