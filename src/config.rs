use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::{RetryPolicy, TableSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Policy for calls against remote APIs
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Page size used by descriptors submitted without one
    pub page_size: usize,
    pub insert_concurrency: usize,
    /// Connect every stored integration at startup
    pub connect_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./resources.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("remote.timeout_secs", 30)?
            .set_default("remote.max_attempts", 3)?
            .set_default("remote.initial_backoff_ms", 200)?
            .set_default("remote.max_backoff_ms", 5000)?
            .set_default("remote.backoff_multiplier", 2.0)?
            .set_default("remote.page_size", 100)?
            .set_default("remote.insert_concurrency", num_cpus::get() as u64)?
            .set_default("remote.connect_on_startup", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        let numeric = [
            ("REMOTE_TIMEOUT_SECS", "remote.timeout_secs"),
            ("REMOTE_MAX_ATTEMPTS", "remote.max_attempts"),
            ("REMOTE_INITIAL_BACKOFF_MS", "remote.initial_backoff_ms"),
            ("REMOTE_MAX_BACKOFF_MS", "remote.max_backoff_ms"),
            ("REMOTE_PAGE_SIZE", "remote.page_size"),
            ("INSERT_CONCURRENCY", "remote.insert_concurrency"),
        ];
        for (var, key) in numeric {
            if let Ok(value) = env::var(var) {
                match value.parse::<u64>() {
                    Ok(parsed) => builder = builder.set_override(key, parsed)?,
                    Err(_) => tracing::warn!("Ignoring non-numeric {}={}", var, value),
                }
            }
        }

        if let Ok(connect) = env::var("REMOTE_CONNECT_ON_STARTUP") {
            builder = builder.set_override("remote.connect_on_startup", connect == "true" || connect == "1")?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl RemoteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            multiplier: if self.backoff_multiplier >= 1.0 {
                self.backoff_multiplier
            } else {
                1.0
            },
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn table_settings(&self) -> TableSettings {
        TableSettings {
            retry: self.retry_policy(),
            call_timeout: self.call_timeout(),
            concurrency: self.insert_concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        for var in ["DATABASE_URL", "HOST", "PORT", "REMOTE_MAX_ATTEMPTS", "REMOTE_TIMEOUT_SECS"] {
            env::remove_var(var);
        }

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.remote.retry_policy(), RetryPolicy::default());
        assert_eq!(config.remote.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_is_sanitized() {
        let remote = RemoteConfig {
            timeout_secs: 0,
            max_attempts: 0,
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
            backoff_multiplier: 0.5,
            page_size: 10,
            insert_concurrency: 0,
            connect_on_startup: false,
        };
        let policy = remote.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_backoff, Duration::from_millis(500));
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(remote.call_timeout(), Duration::from_secs(1));
        assert_eq!(remote.table_settings().concurrency, 1);
    }
}
