//! Configuration module for the balance monitor.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "balance-monitor.db")
    pub db_path: String,
    /// Timeout of a single balance request in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// How many numbers are queried in parallel during a sweep (default: 8)
    pub max_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "balance-monitor.db".to_string(),
            request_timeout_secs: 30,
            max_concurrency: 8,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BALANCE_MONITOR_HTTP_PORT`: HTTP port (default: 8080)
    /// - `BALANCE_MONITOR_DB_PATH`: Database file path (default: "balance-monitor.db")
    /// - `BALANCE_MONITOR_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
    /// - `BALANCE_MONITOR_MAX_CONCURRENCY`: parallel numbers per sweep (default: 8)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_positive(&lookup, "BALANCE_MONITOR_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("BALANCE_MONITOR_DB_PATH").filter(|p| !p.trim().is_empty()) {
            cfg.db_path = db_path;
        }

        if let Some(timeout) = parse_positive(&lookup, "BALANCE_MONITOR_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = timeout;
        }

        if let Some(n) = parse_positive(&lookup, "BALANCE_MONITOR_MAX_CONCURRENCY") {
            cfg.max_concurrency = n;
        }

        cfg
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parse a variable, ignoring values that are malformed or zero.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + Default + PartialEq,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) if v != T::default() => Some(v),
        _ => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "balance-monitor.db");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_concurrency, 8);
    }

    #[test]
    fn test_overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("BALANCE_MONITOR_HTTP_PORT", "9090"),
            ("BALANCE_MONITOR_DB_PATH", "/var/lib/bm.db"),
            ("BALANCE_MONITOR_REQUEST_TIMEOUT_SECS", "5"),
            ("BALANCE_MONITOR_MAX_CONCURRENCY", "2"),
        ]));
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.db_path, "/var/lib/bm.db");
        assert_eq!(cfg.request_timeout_secs, 5);
        assert_eq!(cfg.max_concurrency, 2);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("BALANCE_MONITOR_HTTP_PORT", "not-a-port"),
            ("BALANCE_MONITOR_REQUEST_TIMEOUT_SECS", "0"),
            ("BALANCE_MONITOR_MAX_CONCURRENCY", "-3"),
            ("BALANCE_MONITOR_DB_PATH", "  "),
        ]));
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.max_concurrency, 8);
        assert_eq!(cfg.db_path, "balance-monitor.db");
    }
}
