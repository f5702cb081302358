//! Application configuration loaded from environment variables.

use std::time::Duration;

use workflow::{ConfigError, FlakySimulator, RetryPolicy, WorkflowConfig};

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for plain text
/// - `DATABASE_URL`: PostgreSQL URL; when unset orders are kept in memory
/// - `DB_MAX_CONNECTIONS`: pool size (default 10)
/// - `STEP_TIMEOUT_MS`, `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_BACKOFF_MS`,
///   `RETRY_BACKOFF_MULTIPLIER`, `RETRY_MAX_BACKOFF_MS`,
///   `MAX_CONCURRENT_PIPELINES`: engine settings
/// - `SIMULATOR_FAILURE_RATE`, `SIMULATOR_HANG_RATE`: flaky activity rates
///
/// Values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub step_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff: Duration,
    pub retry_backoff_multiplier: f64,
    pub retry_max_backoff: Option<Duration>,
    pub max_concurrent_pipelines: usize,
    pub simulator_failure_rate: f64,
    pub simulator_hang_rate: f64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }
        let millis = |key: &str| parse::<u64>(&lookup, key).map(Duration::from_millis);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT") {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.db_max_connections),
            step_timeout: millis("STEP_TIMEOUT_MS").unwrap_or(defaults.step_timeout),
            retry_max_attempts: parse(&lookup, "RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts),
            retry_initial_backoff: millis("RETRY_INITIAL_BACKOFF_MS")
                .unwrap_or(defaults.retry_initial_backoff),
            retry_backoff_multiplier: parse(&lookup, "RETRY_BACKOFF_MULTIPLIER")
                .unwrap_or(defaults.retry_backoff_multiplier),
            retry_max_backoff: millis("RETRY_MAX_BACKOFF_MS").or(defaults.retry_max_backoff),
            max_concurrent_pipelines: parse(&lookup, "MAX_CONCURRENT_PIPELINES")
                .unwrap_or(defaults.max_concurrent_pipelines),
            simulator_failure_rate: parse(&lookup, "SIMULATOR_FAILURE_RATE")
                .unwrap_or(defaults.simulator_failure_rate),
            simulator_hang_rate: parse(&lookup, "SIMULATOR_HANG_RATE")
                .unwrap_or(defaults.simulator_hang_rate),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine settings, validated.
    pub fn workflow_config(&self) -> Result<WorkflowConfig, ConfigError> {
        let mut retry = RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_initial_backoff,
            self.retry_backoff_multiplier,
        )?;
        if let Some(max) = self.retry_max_backoff {
            retry = retry.with_max_backoff(max)?;
        }
        WorkflowConfig::new(self.step_timeout, retry, self.max_concurrent_pipelines)
    }

    /// The simulator behind every activity.
    pub fn simulator(&self) -> Result<FlakySimulator, ConfigError> {
        FlakySimulator::random(self.simulator_failure_rate, self.simulator_hang_rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        let workflow = WorkflowConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            db_max_connections: 10,
            step_timeout: workflow.step_timeout(),
            retry_max_attempts: workflow.retry().max_attempts(),
            retry_initial_backoff: workflow.retry().initial_backoff(),
            retry_backoff_multiplier: workflow.retry().backoff_multiplier(),
            retry_max_backoff: workflow.retry().max_backoff(),
            max_concurrent_pipelines: workflow.max_concurrent_pipelines(),
            simulator_failure_rate: FlakySimulator::DEFAULT_FAILURE_RATE,
            simulator_hang_rate: FlakySimulator::DEFAULT_HANG_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_initial_backoff, Duration::from_secs(10));
        assert_eq!(config.retry_backoff_multiplier, 2.0);
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("STEP_TIMEOUT_MS", "250"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("RETRY_INITIAL_BACKOFF_MS", "10"),
            ("RETRY_BACKOFF_MULTIPLIER", "1.5"),
            ("RETRY_MAX_BACKOFF_MS", "100"),
            ("MAX_CONCURRENT_PIPELINES", "2"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );

        let workflow = config.workflow_config().unwrap();
        assert_eq!(workflow.step_timeout(), Duration::from_millis(250));
        assert_eq!(workflow.retry().max_attempts(), 5);
        assert_eq!(workflow.retry().max_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(workflow.max_concurrent_pipelines(), 2);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from_pairs(&[("PORT", "http"), ("RETRY_MAX_ATTEMPTS", "-1")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.retry_max_attempts, 3);
    }

    #[test]
    fn test_blank_database_url_means_in_memory() {
        let config = from_pairs(&[("DATABASE_URL", "  ")]);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_engine_settings_are_errors() {
        let zero_attempts = from_pairs(&[("RETRY_MAX_ATTEMPTS", "0")]);
        assert_eq!(
            zero_attempts.workflow_config().unwrap_err(),
            ConfigError::ZeroAttempts
        );

        let rates = from_pairs(&[
            ("SIMULATOR_FAILURE_RATE", "0.8"),
            ("SIMULATOR_HANG_RATE", "0.8"),
        ]);
        assert!(rates.simulator().is_err());
    }
}
