//! Application configuration
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Session expiration in hours
    pub session_expiry_hours: u64,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
    /// Environment (development/production)
    pub environment: Environment,
    /// Trusted proxy IP prefixes (e.g., ["10.0.0.", "172.16."])
    /// Only trust X-Forwarded-For headers from these IPs
    pub trusted_proxies: Vec<String>,
    /// Administrator created on startup when both are set
    pub bootstrap_admin: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match var("ENVIRONMENT")
            .unwrap_or_else(|| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // DATABASE_URL, or assembled from DATABASE_HOST, DATABASE_PORT,
        // DATABASE_USER, DATABASE_PASSWORD and DATABASE_NAME
        let database_url = var("DATABASE_URL")
            .or_else(|| {
                let host = var("DATABASE_HOST")?;
                let port = var("DATABASE_PORT").unwrap_or_else(|| "5432".to_string());
                let user = var("DATABASE_USER")?;
                let password = var("DATABASE_PASSWORD")?;
                let db = var("DATABASE_NAME")?;
                Some(format!(
                    "postgres://{}:{}@{}:{}/{}",
                    user, password, host, port, db
                ))
            })
            .ok_or_else(|| {
                ConfigError::Missing(
                    "DATABASE_URL, or DATABASE_HOST + DATABASE_USER + DATABASE_PASSWORD + DATABASE_NAME is required".to_string(),
                )
            })?;

        let port = match var("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT must be a number, got '{}'", p)))?,
            None => 8080,
        };

        let session_expiry_hours = match var("SESSION_EXPIRY_HOURS") {
            Some(h) => match h.parse::<u64>() {
                Ok(hours) if hours > 0 => hours,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "SESSION_EXPIRY_HOURS must be a positive number, got '{}'",
                        h
                    )))
                }
            },
            None => 8,
        };

        let bootstrap_admin = match (var("ADMIN_EMAIL"), var("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Some((email, password))
            }
            _ => None,
        };

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            database_url,
            session_expiry_hours,
            cors_origins: var("CORS_ORIGINS")
                .map(|s| split_list(&s))
                .unwrap_or_else(|| vec!["http://localhost:8080".to_string()]),
            environment,
            // Examples: "10.0.0.", "172.16.", "127.0.0.1"
            trusted_proxies: var("TRUSTED_PROXIES")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            bootstrap_admin,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/claims")]).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.session_expiry_hours, 8);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.trusted_proxies.is_empty());
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn test_database_url_from_components() {
        let config = load(&[
            ("DATABASE_HOST", "db"),
            ("DATABASE_USER", "claims"),
            ("DATABASE_PASSWORD", "secret"),
            ("DATABASE_NAME", "hr"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://claims:secret@db:5432/hr");

        assert!(matches!(
            load(&[("DATABASE_HOST", "db")]),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_lists_and_environment() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/claims"),
            ("ENVIRONMENT", "Production"),
            ("CORS_ORIGINS", "https://hr.example.org, https://admin.example.org"),
            ("TRUSTED_PROXIES", "10.0.0., ,172.16."),
        ])
        .unwrap();
        assert!(config.is_production());
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.trusted_proxies, vec!["10.0.0.", "172.16."]);
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("PORT", "eighty")]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            load(&[("DATABASE_URL", "postgres://x"), ("SESSION_EXPIRY_HOURS", "0")]),
            Err(ConfigError::Invalid(_))
        ));
    }
}
