//! Configuration management for the Bybit adapter

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

use stream_client::{AdapterError, Result};

const MAINNET_HOST: &str = "wss://stream.bybit.com";
const TESTNET_HOST: &str = "wss://stream-testnet.bybit.com";

/// Configuration specific to the Bybit adapter
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BybitConfig {
    /// Use testnet endpoints if `true`
    pub testnet: bool,

    /// Product category of the public stream (`linear`, `spot`, `inverse`, `option`)
    pub category: String,

    /// Public WebSocket URL override (takes precedence over `testnet`)
    pub public_url: Option<String>,

    /// Private WebSocket URL override (takes precedence over `testnet`)
    pub private_url: Option<String>,

    /// API key for the private stream
    pub api_key: Option<String>,

    /// API secret for the private stream
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,

    /// Lifetime of a signed auth request, in milliseconds
    pub auth_expiry_ms: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            category: "linear".to_string(),
            public_url: None,
            private_url: None,
            api_key: None,
            api_secret: None,
            auth_expiry_ms: 10_000,
        }
    }
}

impl BybitConfig {
    /// Load from `BYBIT_*` environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            testnet: env::var("BYBIT_TESTNET")
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(defaults.testnet),
            category: env::var("BYBIT_CATEGORY").unwrap_or(defaults.category),
            public_url: env::var("BYBIT_PUBLIC_URL").ok(),
            private_url: env::var("BYBIT_PRIVATE_URL").ok(),
            api_key: env::var("BYBIT_API_KEY").ok(),
            api_secret: env::var("BYBIT_API_SECRET").ok(),
            auth_expiry_ms: env::var("BYBIT_AUTH_EXPIRY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auth_expiry_ms),
        }
    }

    fn host(&self) -> &'static str {
        if self.testnet {
            TESTNET_HOST
        } else {
            MAINNET_HOST
        }
    }

    /// Public market data endpoint
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("{}/v5/public/{}", self.host(), self.category))
    }

    /// Private account endpoint
    pub fn private_url(&self) -> String {
        self.private_url
            .clone()
            .unwrap_or_else(|| format!("{}/v5/private", self.host()))
    }

    /// API key and secret, or a configuration error if either is missing
    pub fn credentials(&self) -> Result<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Ok((key, secret)),
            _ => Err(AdapterError::Configuration(
                "BYBIT_API_KEY and BYBIT_API_SECRET are required for private streams".to_string(),
            )),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !matches!(self.category.as_str(), "linear" | "spot" | "inverse" | "option") {
            return Err(format!("Unknown Bybit category: {}", self.category));
        }

        for url in [&self.public_url, &self.private_url].into_iter().flatten() {
            if !url.starts_with("wss://") && !url.starts_with("ws://") && !url.starts_with("mem://") {
                return Err(format!("Invalid WebSocket URL scheme: {url}"));
            }
        }

        if self.auth_expiry_ms == 0 {
            return Err("Auth expiry must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl fmt::Debug for BybitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BybitConfig")
            .field("testnet", &self.testnet)
            .field("category", &self.category)
            .field("public_url", &self.public_url())
            .field("private_url", &self.private_url())
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("auth_expiry_ms", &self.auth_expiry_ms)
            .finish()
    }
}
