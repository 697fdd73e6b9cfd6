//! Configuration module for ipwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::SweepConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the dashboard and API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "ipwatch.db")
    pub db_path: String,
    /// Per-probe timeout (default: 2s)
    pub probe_timeout: Duration,
    /// Global cap on probes in flight (default: 10)
    pub max_concurrent_probes: usize,
    /// Background sweep period; `None` disables the loop (default: 60s)
    pub sweep_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "ipwatch.db".to_string(),
            probe_timeout: Duration::from_secs(2),
            max_concurrent_probes: 10,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `IPWATCH_HTTP_PORT`
    /// - `IPWATCH_DB_PATH`
    /// - `IPWATCH_PROBE_TIMEOUT_SECS`
    /// - `IPWATCH_MAX_CONCURRENT_PROBES`
    /// - `IPWATCH_SWEEP_INTERVAL_SECS` (0 disables the background loop)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var::<u16>(&lookup, "IPWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("IPWATCH_DB_PATH").filter(|s| !s.trim().is_empty()) {
            cfg.db_path = db_path;
        }

        if let Some(secs) = parse_var::<f64>(&lookup, "IPWATCH_PROBE_TIMEOUT_SECS") {
            match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => cfg.probe_timeout = timeout,
                _ => tracing::warn!("Ignoring out of range IPWATCH_PROBE_TIMEOUT_SECS={}", secs),
            }
        }

        if let Some(max) = parse_var::<usize>(&lookup, "IPWATCH_MAX_CONCURRENT_PROBES") {
            cfg.max_concurrent_probes = max.max(1);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "IPWATCH_SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        cfg
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            probe_timeout: self.probe_timeout,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = load(&[]);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "ipwatch.db");
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_concurrent_probes, 10);
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("IPWATCH_HTTP_PORT", "9000"),
            ("IPWATCH_DB_PATH", "/var/lib/ipwatch/state.db"),
            ("IPWATCH_PROBE_TIMEOUT_SECS", "0.5"),
            ("IPWATCH_MAX_CONCURRENT_PROBES", "32"),
            ("IPWATCH_SWEEP_INTERVAL_SECS", "30"),
        ]);
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.db_path, "/var/lib/ipwatch/state.db");
        assert_eq!(cfg.probe_timeout, Duration::from_millis(500));
        assert_eq!(cfg.sweep_config().max_concurrent_probes, 32);
        assert_eq!(cfg.sweep_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = load(&[
            ("IPWATCH_HTTP_PORT", "eighty"),
            ("IPWATCH_PROBE_TIMEOUT_SECS", "-1"),
            ("IPWATCH_MAX_CONCURRENT_PROBES", "0"),
        ]);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_concurrent_probes, 1);
    }

    #[test]
    fn test_out_of_range_timeout_keeps_default() {
        for value in ["1e30", "inf", "NaN", "0"] {
            let cfg = load(&[("IPWATCH_PROBE_TIMEOUT_SECS", value)]);
            assert_eq!(cfg.probe_timeout, Duration::from_secs(2), "value {}", value);
        }
    }

    #[test]
    fn test_zero_interval_disables_loop() {
        assert_eq!(load(&[("IPWATCH_SWEEP_INTERVAL_SECS", "0")]).sweep_interval, None);
    }
}
