//! API server configuration

use thiserror::Error;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";
/// Webhook and booking bodies are small JSON documents
const DEFAULT_BODY_LIMIT_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    /// Apply embedded migrations on startup
    pub run_migrations: bool,
    pub body_limit_bytes: usize,
}

impl Config {
    /// Defaults for everything except the database
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            allowed_origins: parse_origins(DEFAULT_ALLOWED_ORIGINS),
            run_migrations: true,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let mut config = Self::new(database_url);

        if let Ok(bind) = std::env::var("BIND_ADDRESS") {
            config.bind_address = bind;
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }
        if let Ok(flag) = std::env::var("RUN_MIGRATIONS") {
            config.run_migrations = parse_bool("RUN_MIGRATIONS", &flag)?;
        }
        if let Ok(limit) = std::env::var("REQUEST_BODY_LIMIT_BYTES") {
            config.body_limit_bytes =
                limit
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                        key: "REQUEST_BODY_LIMIT_BYTES",
                        message: e.to_string(),
                    })?;
        }

        Ok(config)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "BIND_ADDRESS",
            "ALLOWED_ORIGINS",
            "RUN_MIGRATIONS",
            "REQUEST_BODY_LIMIT_BYTES",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_database_url_required() {
        clear_env();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tourdesk");

        let config = Config::from_env().expect("config");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.run_migrations);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tourdesk");
        std::env::set_var("ALLOWED_ORIGINS", "https://tours.example.com, ,https://admin.example.com");
        std::env::set_var("RUN_MIGRATIONS", "false");

        let config = Config::from_env().expect("config");
        assert_eq!(
            config.allowed_origins,
            vec!["https://tours.example.com", "https://admin.example.com"]
        );
        assert!(!config.run_migrations);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_bool_rejected() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/tourdesk");
        std::env::set_var("RUN_MIGRATIONS", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { key: "RUN_MIGRATIONS", .. })
        ));
        clear_env();
    }
}
