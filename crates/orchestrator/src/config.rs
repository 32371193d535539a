//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::dedupe::DEFAULT_DEDUPE_TTL;
use saga::{DispatchConfig, Routing};

/// Orchestrator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; executions are kept in
///   memory when unset
/// - `DEDUPE_TTL_SECS`: how long processed messages are remembered
///   (default: 30 days)
/// - `DEAD_LETTER_DESTINATION`: where undeliverable messages go (default:
///   unset)
/// - `SAGA_ROUTING`: `execution` or `event_type` (default: `execution`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub dedupe_ttl: Duration,
    pub dead_letter_destination: Option<String>,
    pub routing: Routing,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            dedupe_ttl: lookup("DEDUPE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedupe_ttl),
            dead_letter_destination: non_empty("DEAD_LETTER_DESTINATION"),
            routing: lookup("SAGA_ROUTING")
                .and_then(|r| r.parse().ok())
                .unwrap_or(defaults.routing),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the message dispatcher.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            routing: self.routing,
            dedupe_ttl: self.dedupe_ttl,
            dead_letter_destination: self.dead_letter_destination.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            dead_letter_destination: None,
            routing: Routing::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.dedupe_ttl, Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(config.routing, Routing::Execution);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_variables() {
        let config = from_vars(&[
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("DEDUPE_TTL_SECS", "60"),
            ("DEAD_LETTER_DESTINATION", "saga.dead_letter"),
            ("SAGA_ROUTING", "event_type"),
        ]);

        assert_eq!(config.port, 8081);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/sagas")
        );
        assert_eq!(config.routing, Routing::EventType);

        let dispatch = config.dispatch();
        assert_eq!(dispatch.dedupe_ttl, Duration::from_secs(60));
        assert_eq!(
            dispatch.dead_letter_destination.as_deref(),
            Some("saga.dead_letter")
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_vars(&[
            ("PORT", "not-a-port"),
            ("SAGA_ROUTING", "round_robin"),
            ("DATABASE_URL", "  "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.routing, Routing::Execution);
        assert!(config.database_url.is_none());
    }
}
