//! Configuration for streaming clients
//!
//! Defaults, environment overrides (`STREAM_` prefix) and TOML files all
//! produce the same [`ClientConfig`]; call [`ClientConfig::validate`] before
//! handing it to a pool.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{AdapterError, Result};

/// Client-wide configuration shared by every connection of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound on opening one transport, in milliseconds
    pub connect_timeout_ms: u64,

    /// Deadline for one-shot requests, in milliseconds
    pub request_timeout_ms: u64,

    /// Keepalive scheduling
    pub keepalive: KeepaliveConfig,

    /// Reconnect policy
    pub reconnect: ReconnectConfig,

    /// Subscribe throttling
    pub throttle: ThrottleConfig,

    /// Rolling cache sizes used by adapters
    pub caches: CacheLimits,

    /// What adapters do on an order book sequence gap
    pub gap_policy: GapPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: network::DEFAULT_CONNECTION_TIMEOUT_MS,
            request_timeout_ms: 30_000,
            keepalive: KeepaliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            throttle: ThrottleConfig::default(),
            caches: CacheLimits::default(),
            gap_policy: GapPolicy::default(),
        }
    }
}

/// Ping scheduling and dead-connection detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Interval between pings, in milliseconds
    pub ping_interval_ms: u64,

    /// Connection is dead after `ping_interval_ms * dead_after_factor` of silence
    pub dead_after_factor: f64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 5_000,
            dead_after_factor: 1.5,
        }
    }
}

/// Reconnect with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Rebuild the transport and replay subscriptions after a failure
    pub enabled: bool,

    /// First backoff delay in milliseconds
    pub base_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,

    /// Consecutive failed attempts before giving up (0 = never)
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_attempts: 10,
        }
    }
}

/// Rate of throttled subscribe sends, shared by every connection of a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Sustained subscribe sends per second
    pub subscribes_per_second: u32,

    /// Sends allowed back to back before throttling starts
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            subscribes_per_second: 10,
            burst: 5,
        }
    }
}

/// Capacities of the per-stream rolling caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Trades kept per symbol
    pub trades: usize,

    /// Candles kept per symbol and timeframe
    pub ohlcv: usize,

    /// Orders kept per account stream
    pub orders: usize,

    /// Levels kept per book side (`None` = as many as the feed sends)
    pub order_book_depth: Option<usize>,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            trades: types::DEFAULT_CACHE_CAPACITY,
            ohlcv: types::DEFAULT_CACHE_CAPACITY,
            orders: types::DEFAULT_CACHE_CAPACITY,
            order_book_depth: None,
        }
    }
}

/// Reaction to a missed order book update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Drop the book and resubscribe for a fresh snapshot
    #[default]
    Resync,
    /// Log and keep applying deltas
    Warn,
}

impl FromStr for GapPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resync" => Ok(GapPolicy::Resync),
            "warn" => Ok(GapPolicy::Warn),
            other => Err(format!("Unknown gap policy: {other}")),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ClientConfig {
    /// Load configuration from `STREAM_*` environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("STREAM")
    }

    /// Load configuration from `{prefix}_*` environment variables with defaults
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let key = |name: &str| format!("{prefix}_{name}");
        let defaults = Self::default();

        Self {
            connect_timeout_ms: env_or(&key("CONNECT_TIMEOUT_MS"), defaults.connect_timeout_ms),
            request_timeout_ms: env_or(&key("REQUEST_TIMEOUT_MS"), defaults.request_timeout_ms),
            keepalive: KeepaliveConfig {
                ping_interval_ms: env_or(
                    &key("PING_INTERVAL_MS"),
                    defaults.keepalive.ping_interval_ms,
                ),
                dead_after_factor: env_or(
                    &key("DEAD_AFTER_FACTOR"),
                    defaults.keepalive.dead_after_factor,
                ),
            },
            reconnect: ReconnectConfig {
                enabled: env::var(key("RECONNECT_ENABLED"))
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(defaults.reconnect.enabled),
                base_backoff_ms: env_or(&key("BASE_BACKOFF_MS"), defaults.reconnect.base_backoff_ms),
                max_backoff_ms: env_or(&key("MAX_BACKOFF_MS"), defaults.reconnect.max_backoff_ms),
                max_attempts: env_or(
                    &key("MAX_RECONNECT_ATTEMPTS"),
                    defaults.reconnect.max_attempts,
                ),
            },
            throttle: ThrottleConfig {
                subscribes_per_second: env_or(
                    &key("SUBSCRIBES_PER_SECOND"),
                    defaults.throttle.subscribes_per_second,
                ),
                burst: env_or(&key("SUBSCRIBE_BURST"), defaults.throttle.burst),
            },
            caches: CacheLimits {
                trades: env_or(&key("TRADES_LIMIT"), defaults.caches.trades),
                ohlcv: env_or(&key("OHLCV_LIMIT"), defaults.caches.ohlcv),
                orders: env_or(&key("ORDERS_LIMIT"), defaults.caches.orders),
                order_book_depth: env::var(key("ORDER_BOOK_DEPTH"))
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .or(defaults.caches.order_book_depth),
            },
            gap_policy: env_or(&key("GAP_POLICY"), defaults.gap_policy),
        }
    }

    /// Parse configuration from TOML; missing keys take their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input)
            .map_err(|e| AdapterError::Configuration(format!("Invalid TOML configuration: {e}")))
    }

    /// Read and parse a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.connect_timeout_ms == 0 {
            return Err("Connect timeout must be greater than 0".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("Request timeout must be greater than 0".to_string());
        }

        if self.keepalive.ping_interval_ms == 0 {
            return Err("Ping interval must be greater than 0".to_string());
        }

        let factor = self.keepalive.dead_after_factor;
        if factor.is_nan() || factor <= 1.0 {
            return Err("Dead-after factor must be greater than 1.0".to_string());
        }

        if self.reconnect.base_backoff_ms == 0 {
            return Err("Base backoff must be greater than 0".to_string());
        }

        if self.reconnect.max_backoff_ms < self.reconnect.base_backoff_ms {
            return Err("Max backoff must not be below base backoff".to_string());
        }

        if self.throttle.subscribes_per_second == 0 || self.throttle.burst == 0 {
            return Err("Throttle rate and burst must be greater than 0".to_string());
        }

        if self.caches.trades == 0 || self.caches.ohlcv == 0 || self.caches.orders == 0 {
            return Err("Cache limits must be greater than 0".to_string());
        }

        if self.caches.order_book_depth == Some(0) {
            return Err("Order book depth must be greater than 0 when set".to_string());
        }

        Ok(())
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Ping interval as a duration
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive.ping_interval_ms)
    }

    /// Silence after which a connection is declared dead
    pub fn dead_after(&self) -> Duration {
        let factor = self.keepalive.dead_after_factor.max(1.0);
        Duration::from_millis((self.keepalive.ping_interval_ms as f64 * factor).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.dead_after(), Duration::from_millis(7_500));
        assert_eq!(config.caches.trades, 1000);
        assert_eq!(config.gap_policy, GapPolicy::Resync);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.keepalive.dead_after_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.reconnect.max_backoff_ms = 10;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.caches.order_book_depth = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            request_timeout_ms = 5000
            gap_policy = "warn"

            [keepalive]
            ping_interval_ms = 20000

            [caches]
            order_book_depth = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.keepalive.ping_interval_ms, 20_000);
        assert_eq!(config.keepalive.dead_after_factor, 1.5);
        assert_eq!(config.caches.order_book_depth, Some(50));
        assert_eq!(config.gap_policy, GapPolicy::Warn);
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = ClientConfig::from_toml_str("connect_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, AdapterError::Configuration(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconnect]\nenabled = false\nmax_attempts = 3").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 3);

        assert!(ClientConfig::from_file("/nonexistent/stream.toml").is_err());
    }

    #[test]
    fn test_from_env_with_prefix() {
        env::set_var("STREAMTEST_PING_INTERVAL_MS", "1234");
        env::set_var("STREAMTEST_RECONNECT_ENABLED", "false");
        env::set_var("STREAMTEST_GAP_POLICY", "WARN");
        env::set_var("STREAMTEST_ORDER_BOOK_DEPTH", "25");
        env::set_var("STREAMTEST_TRADES_LIMIT", "not-a-number");

        let config = ClientConfig::from_env_with_prefix("STREAMTEST");
        assert_eq!(config.keepalive.ping_interval_ms, 1234);
        assert!(!config.reconnect.enabled);
        assert_eq!(config.gap_policy, GapPolicy::Warn);
        assert_eq!(config.caches.order_book_depth, Some(25));
        assert_eq!(config.caches.trades, 1000);
    }
}
