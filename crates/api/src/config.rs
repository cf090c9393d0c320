//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::Currency;

/// Secret used when `WEBHOOK_SECRET` is not set. Only suitable for local runs.
pub const DEV_WEBHOOK_SECRET: &str = "whsec_dev_only";

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` Postgres connection string (default: unset, in-memory backend)
/// - `WEBHOOK_SECRET` shared secret for webhook signatures
/// - `WEBHOOK_TOLERANCE_SECS` accepted signature clock skew (default: `300`)
/// - `GATEWAY_TIMEOUT_MS` bound on payment provider calls (default: `5000`)
/// - `ORDER_UPDATE_MAX_ATTEMPTS` optimistic update attempts (default: `5`)
/// - `WEBHOOK_DEDUP_RETENTION_SECS` how long event IDs are remembered (default: 3 days)
/// - `RESERVATION_TIMEOUT_SECS` unpaid reservation lifetime (default: unset, never expires)
/// - `REAPER_INTERVAL_SECS` reaper sweep period (default: `60`)
/// - `DEFAULT_CURRENCY` currency for new orders (default: `USD`)
///
/// Unparseable numeric values fall back to their defaults.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub gateway_timeout: Duration,
    pub order_update_max_attempts: u32,
    pub dedup_retention: Duration,
    pub reservation_timeout: Option<Duration>,
    pub reaper_interval: Duration,
    pub currency: Currency,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| parse(key).and_then(|v| u64::from_str(v.trim()).ok());

        Self {
            host: parse("HOST").unwrap_or(defaults.host),
            port: parse("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: parse("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: parse("DATABASE_URL"),
            webhook_secret: parse("WEBHOOK_SECRET").unwrap_or(defaults.webhook_secret),
            webhook_tolerance: number("WEBHOOK_TOLERANCE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
            gateway_timeout: number("GATEWAY_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            order_update_max_attempts: number("ORDER_UPDATE_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.order_update_max_attempts),
            dedup_retention: number("WEBHOOK_DEDUP_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_retention),
            reservation_timeout: number("RESERVATION_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            reaper_interval: number("REAPER_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            currency: parse("DEFAULT_CURRENCY")
                .map(|c| Currency::new(c.trim()))
                .unwrap_or(defaults.currency),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            webhook_tolerance: Duration::from_secs(300),
            gateway_timeout: Duration::from_millis(5000),
            order_update_max_attempts: 5,
            dedup_retention: payments::DEFAULT_DEDUP_RETENTION,
            reservation_timeout: None,
            reaper_interval: Duration::from_secs(60),
            currency: Currency::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &"<redacted>")
            .field("webhook_tolerance", &self.webhook_tolerance)
            .field("gateway_timeout", &self.gateway_timeout)
            .field("order_update_max_attempts", &self.order_update_max_attempts)
            .field("dedup_retention", &self.dedup_retention)
            .field("reservation_timeout", &self.reservation_timeout)
            .field("reaper_interval", &self.reaper_interval)
            .field("currency", &self.currency)
            .finish()
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
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.database_url, None);
        assert_eq!(config.webhook_tolerance, Duration::from_secs(300));
        assert_eq!(config.gateway_timeout, Duration::from_millis(5000));
        assert_eq!(config.order_update_max_attempts, 5);
        assert_eq!(config.dedup_retention, Duration::from_secs(259_200));
        assert_eq!(config.reservation_timeout, None);
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.currency.code(), "USD");
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.reservation_timeout, None);
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("WEBHOOK_SECRET", "whsec_live"),
            ("GATEWAY_TIMEOUT_MS", "250"),
            ("ORDER_UPDATE_MAX_ATTEMPTS", "3"),
            ("RESERVATION_TIMEOUT_SECS", "900"),
            ("REAPER_INTERVAL_SECS", "30"),
            ("DEFAULT_CURRENCY", "eur"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
        assert_eq!(config.webhook_secret, "whsec_live");
        assert_eq!(config.gateway_timeout, Duration::from_millis(250));
        assert_eq!(config.order_update_max_attempts, 3);
        assert_eq!(config.reservation_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
        assert_eq!(config.currency.code(), "EUR");
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = from_pairs(&[
            ("PORT", "eighty"),
            ("GATEWAY_TIMEOUT_MS", "0"),
            ("ORDER_UPDATE_MAX_ATTEMPTS", "-1"),
            ("RESERVATION_TIMEOUT_SECS", "soon"),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.gateway_timeout, Duration::from_millis(5000));
        assert_eq!(config.order_update_max_attempts, 5);
        assert_eq!(config.reservation_timeout, None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = from_pairs(&[
            ("WEBHOOK_SECRET", "whsec_live"),
            ("DATABASE_URL", "postgres://user:hunter2@db/shop"),
        ]);
        let debug = format!("{config:?}");

        assert!(!debug.contains("whsec_live"));
        assert!(!debug.contains("hunter2"));
    }
}
