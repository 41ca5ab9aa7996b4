//! Configuration management for the DDoS report service.
//!
//! This module handles loading and validating application configuration
//! from an optional TOML file and environment variables.

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crate::models::{Config, DEFAULT_USER_AGENT};

/// Flat environment variable names honoured on top of the nested `SECTION__KEY` form
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("API_KEY", "api.key"),
    ("API_ID", "api.id"),
    ("ACCOUNT_ID", "api.account_id"),
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("MAX_RETRIES", "request.max_retries"),
    ("MAX_CONSECUTIVE_FAILURES", "request.max_consecutive_failures"),
    ("PAGE_SIZE", "request.page_size"),
    ("TIMEOUT_CONNECT", "request.connect_timeout_secs"),
    ("TIMEOUT_READ", "request.read_timeout_secs"),
    ("MAX_CONCURRENT_REQUESTS", "concurrency.max_concurrent"),
    ("ENABLE_CONCURRENT_REQUESTS", "concurrency.enabled"),
];

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let mut builder = ConfigBuilder::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5000)?
        .set_default("api.base_urls", vec!["https://my.imperva.com", "https://my.incapsula.com"])?
        .set_default("api.user_agent", DEFAULT_USER_AGENT)?
        .set_default("request.max_retries", 3)?
        .set_default("request.max_consecutive_failures", 3)?
        .set_default("request.page_size", 100)?
        .set_default("request.connect_timeout_secs", 15)?
        .set_default("request.read_timeout_secs", 60)?
        .set_default("request.probe_timeout_secs", 5)?
        .set_default("request.backoff_base_ms", 1000)?
        .set_default("request.batch_pause_ms", 300)?
        .set_default("concurrency.enabled", true)?
        .set_default("concurrency.max_concurrent", 5)?
        .set_default("stats.categories", vec!["incap_rules", "threats", "incap_rules_timeseries"])?
        .set_default("stats.granularity_ms", 300_000)?
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__").try_parsing(true));

    for (var, key) in LEGACY_OVERRIDES {
        builder = builder.set_override_option(*key, env::var(var).ok())?;
    }

    let config: Config = builder.build()?.try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}

/// Check that the credentials and endpoints needed to reach the API are present
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();
    if config.api.key.trim().is_empty() {
        missing.push("API_KEY");
    }
    if config.api.id.trim().is_empty() {
        missing.push("API_ID");
    }
    if config.api.account_id.trim().is_empty() {
        missing.push("ACCOUNT_ID");
    }
    if !missing.is_empty() {
        return Err(ConfigError::Message(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )));
    }

    if config.api.base_urls.is_empty() {
        return Err(ConfigError::Message("At least one API base URL is required".to_string()));
    }
    if config.concurrency.max_concurrent == 0 {
        return Err(ConfigError::Message("concurrency.max_concurrent must be at least 1".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.api.key = "key".to_string();
        config.api.id = "id".to_string();
        config.api.account_id = "42".to_string();
        config
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(validate_config(&configured()).is_ok());
    }

    #[test]
    fn test_validate_lists_missing_credentials() {
        let mut config = configured();
        config.api.key.clear();
        config.api.account_id.clear();

        let err = validate_config(&config).unwrap_err().to_string();
        assert_eq!(err, "Missing required environment variables: API_KEY, ACCOUNT_ID");
    }

    #[test]
    fn test_validate_requires_base_url() {
        let mut config = configured();
        config.api.base_urls.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_applies_flat_env_overrides() {
        let vars = [
            ("CONFIG_FILE", "does/not/exist.toml"),
            ("API_KEY", "env-key"),
            ("API_ID", "env-id"),
            ("ACCOUNT_ID", "4242"),
            ("PAGE_SIZE", "25"),
            ("MAX_CONCURRENT_REQUESTS", "8"),
            ("ENABLE_CONCURRENT_REQUESTS", "false"),
        ];
        let saved: Vec<(&str, Option<String>)> = vars
            .iter()
            .map(|(name, _)| (*name, env::var(name).ok()))
            .collect();
        for (name, value) in vars {
            env::set_var(name, value);
        }

        let loaded = load_config();

        for (name, previous) in saved {
            match previous {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }

        let config = loaded.unwrap();
        assert_eq!(config.api.key, "env-key");
        assert_eq!(config.api.id, "env-id");
        assert_eq!(config.api.account_id, "4242");
        assert_eq!(config.request.page_size, 25);
        assert_eq!(config.concurrency.max_concurrent, 8);
        assert!(!config.concurrency.enabled);
        assert_eq!(config.request.max_retries, 3);
    }

    #[test]
    fn test_defaults_match_upstream_contract() {
        let config = Config::default();
        assert_eq!(config.request.page_size, 100);
        assert_eq!(config.request.max_retries, 3);
        assert_eq!(config.concurrency.max_concurrent, 5);
        assert_eq!(config.api.base_urls.len(), 2);
    }
}
