use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    CompilerSettings, Config, DatabaseSettings, ExecutionSettings, LoggingSettings,
    PreviewSettings, ServerSettings,
};

/// Prefix of environment variables that override file settings, e.g.
/// `REPORTS__EXECUTION__TIMEOUT_MS=5000`.
pub const ENV_PREFIX: &str = "REPORTS";

/// Loads the application configuration from the `config.toml` file.
///
/// The file is optional; environment variables are layered on top of it and every section
/// has defaults, so a bare environment still yields a usable `Config`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(Path::new("config.toml"))
}

/// Loads the configuration from an explicit file path, layered with the environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("preview.sample_deals")
                .with_list_parse_key("preview.sample_tranche_ids")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;
    tracing::debug!(path = %path.display(), "Configuration loaded.");

    Ok(config)
}

/// Parses a TOML document into a validated `Config`, without consulting the environment.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?
        .try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

/// Rejects settings that would make the service unusable at runtime.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.max_connections == 0 {
        return Err(ConfigError::invalid("database.max_connections", "must be greater than 0"));
    }
    if config.execution.timeout_ms == 0 {
        return Err(ConfigError::invalid("execution.timeout_ms", "must be greater than 0"));
    }
    if config.preview.sample_deals.is_empty() {
        return Err(ConfigError::invalid("preview.sample_deals", "must not be empty"));
    }
    if config.server.port == 0 {
        return Err(ConfigError::invalid("server.port", "must be greater than 0"));
    }
    config.server.socket_addr()?;
    Ok(())
}

/// Command-line flags shared by every binary that reads the configuration.
#[cfg(feature = "clap")]
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: std::path::PathBuf,
}

#[cfg(feature = "clap")]
impl ConfigArgs {
    pub fn load(&self) -> Result<Config, ConfigError> {
        load_config_from(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.database.url_env, "DATABASE_URL");
        assert!(config.compiler.allow_deal_broadcast);
        assert_eq!(config.execution.timeout_ms, 30_000);
        assert_eq!(config.preview.sample_deals, vec![101, 102, 103]);
        assert_eq!(config.preview.sample_cycle, 202404);
        assert_eq!(config.server.socket_addr().unwrap().port(), 3000);
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [compiler]
            allow_deal_broadcast = false

            [execution]
            timeout_ms = 5000

            [preview]
            sample_deals = [7]
            sample_tranche_ids = ["X"]
            sample_cycle = 202312
            "#,
        )
        .unwrap();
        assert!(!config.compiler.allow_deal_broadcast);
        assert_eq!(config.execution.timeout().as_millis(), 5000);
        assert_eq!(config.preview.sample_deals, vec![7]);
        assert_eq!(config.preview.sample_tranche_ids, vec!["X".to_string()]);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse_config("[execution]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "execution.timeout_ms", .. }));
    }

    #[test]
    fn empty_sample_deals_are_rejected() {
        let err = parse_config("[preview]\nsample_deals = []\nsample_tranche_ids = []\nsample_cycle = 1\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "preview.sample_deals", .. }));
    }

    #[test]
    fn invalid_host_is_rejected() {
        let err = parse_config("[server]\nhost = \"not a host\"\nport = 8080\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "server.host", .. }));
    }
}
