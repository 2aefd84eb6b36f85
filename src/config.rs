//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::feed::RetryPolicy;
use crate::ledger::DEFAULT_SETTLED_ID_CAPACITY;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Ledger ===
    /// Ledger snapshot file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Size of the recently-settled id set used for duplicate detection.
    #[serde(default = "default_settled_id_capacity")]
    pub settled_id_capacity: usize,

    /// How far back a fresh ledger starts reading wagers, in seconds.
    #[serde(default = "default_wager_lookback")]
    pub wager_lookback_secs: i64,

    // === Settlement ===
    /// House fee rate (e.g., 0.01).
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Amount decoder: `declared` or `invoice`.
    #[serde(default = "default_amount_source")]
    pub amount_source: String,

    // === Feeds ===
    /// HTTP wager relay base URL.
    #[serde(default)]
    pub wager_feed_url: Option<String>,

    /// Wager relay poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub wager_poll_interval_s: u64,

    /// Block explorer REST base URL.
    #[serde(default = "default_oracle_rest_url")]
    pub oracle_rest_url: String,

    /// Block explorer WebSocket URL.
    #[serde(default = "default_oracle_ws_url")]
    pub oracle_ws_url: String,

    /// Per-attempt fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_s: u64,

    /// Attempts before a fetch or a write is given up.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    /// Backoff cap in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_s: u64,

    // === Payouts ===
    /// Payment service webhook.
    #[serde(default)]
    pub payout_webhook_url: Option<String>,

    /// JSON file mapping bettors to payment targets.
    #[serde(default)]
    pub payout_directory_path: Option<String>,

    /// Simulate payouts instead of paying.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    // === Server Configuration ===
    /// HTTP server port for the API.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ledger_path() -> String {
    "data/ledger.json".to_string()
}

fn default_settled_id_capacity() -> usize {
    DEFAULT_SETTLED_ID_CAPACITY
}

fn default_wager_lookback() -> i64 {
    86_400 // 24h
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_amount_source() -> String {
    "declared".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_oracle_rest_url() -> String {
    "https://mempool.space/api".to_string()
}

fn default_oracle_ws_url() -> String {
    "wss://mempool.space/api/v1/ws".to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_initial_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            settled_id_capacity: default_settled_id_capacity(),
            wager_lookback_secs: default_wager_lookback(),
            fee_rate: default_fee_rate(),
            amount_source: default_amount_source(),
            wager_feed_url: None,
            wager_poll_interval_s: default_poll_interval(),
            oracle_rest_url: default_oracle_rest_url(),
            oracle_ws_url: default_oracle_ws_url(),
            fetch_timeout_s: default_fetch_timeout(),
            retry_max_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_s: default_retry_max_delay(),
            payout_webhook_url: None,
            payout_directory_path: None,
            dry_run: default_true(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err("FEE_RATE must be in [0, 1)".to_string());
        }

        if self.settled_id_capacity == 0 {
            return Err("SETTLED_ID_CAPACITY must be at least 1".to_string());
        }

        if self.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.wager_lookback_secs < 0 {
            return Err("WAGER_LOOKBACK_SECS must not be negative".to_string());
        }

        if crate::wager::decoder_from_name(&self.amount_source).is_none() {
            return Err(format!(
                "AMOUNT_SOURCE must be 'declared' or 'invoice', got '{}'",
                self.amount_source
            ));
        }

        check_url("ORACLE_REST_URL", &self.oracle_rest_url, &["http", "https"])?;
        check_url("ORACLE_WS_URL", &self.oracle_ws_url, &["ws", "wss"])?;
        if let Some(url) = &self.wager_feed_url {
            check_url("WAGER_FEED_URL", url, &["http", "https"])?;
        }
        if let Some(url) = &self.payout_webhook_url {
            check_url("PAYOUT_WEBHOOK_URL", url, &["http", "https"])?;
        }

        if !self.dry_run && self.payout_webhook_url.is_none() {
            return Err("PAYOUT_WEBHOOK_URL is required when DRY_RUN=false".to_string());
        }

        Ok(())
    }

    /// Retry policy for external fetches and ledger writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(
            self.retry_initial_delay_ms,
            self.retry_max_delay_s,
            self.retry_max_attempts,
            self.fetch_timeout_s,
        )
    }

    /// Wager relay poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.wager_poll_interval_s.max(1))
    }
}

fn check_url(name: &str, raw: &str, schemes: &[&str]) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(format!(
            "{name} must use one of {schemes:?}, got '{}'",
            parsed.scheme()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        let config = Config::default();
        assert_eq!(config.fee_rate, dec!(0.01));
        assert_eq!(config.ledger_path, "data/ledger.json");
        assert_eq!(config.settled_id_capacity, 10_000);
        assert!(config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_fee_rate() {
        let config = Config {
            fee_rate: dec!(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            fee_rate: dec!(-0.01),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_amount_source() {
        let config = Config {
            amount_source: "guess".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("AMOUNT_SOURCE"));
    }

    #[test]
    fn validate_rejects_bad_urls() {
        let config = Config {
            oracle_ws_url: "https://mempool.space/api/v1/ws".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            wager_feed_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_mode_requires_webhook() {
        let config = Config {
            dry_run: false,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            dry_run: false,
            payout_webhook_url: Some("https://pay.example.com/payouts".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_policy_uses_configured_values() {
        let config = Config {
            retry_max_attempts: 3,
            fetch_timeout_s: 2,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout, Duration::from_secs(2));
    }
}
