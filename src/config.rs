//! Configuration module
//!
//! Engine configuration loaded from environment variables with sane
//! defaults, or injected directly in tests. Score bands, velocity
//! thresholds, and limits are product-configured values, not hard-coded law.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::money::{Currency, FeePolicy, Money, Rounding};

/// Fraud score bands and velocity defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct FraudConfig {
    /// Scores at or above this are flagged for review.
    pub review_threshold: u8,
    /// Scores at or above this block the transaction.
    pub block_threshold: u8,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            review_threshold: 30,
            block_threshold: 50,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency new wallets are denominated in.
    pub base_currency: Currency,

    /// Default per-wallet daily spending limit.
    pub default_daily_limit: Decimal,

    /// Default per-wallet monthly spending limit.
    pub default_monthly_limit: Decimal,

    /// How long a request may wait for exclusive wallet access before
    /// failing with `LockTimeout`.
    pub lock_wait: Duration,

    pub fraud: FraudConfig,

    pub fees: FeePolicy,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base_currency = match env::var("ENGINE_CURRENCY") {
            Ok(code) => code
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ENGINE_CURRENCY"))?,
            Err(_) => Currency::Xof,
        };

        let default_daily_limit =
            parse_decimal("ENGINE_DAILY_LIMIT", "500000")?;
        let default_monthly_limit =
            parse_decimal("ENGINE_MONTHLY_LIMIT", "5000000")?;

        let lock_wait_ms: u64 = env::var("ENGINE_LOCK_WAIT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("ENGINE_LOCK_WAIT_MS"))?;

        let review_threshold: u8 = env::var("ENGINE_FRAUD_REVIEW_THRESHOLD")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("ENGINE_FRAUD_REVIEW_THRESHOLD"))?;

        let block_threshold: u8 = env::var("ENGINE_FRAUD_BLOCK_THRESHOLD")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("ENGINE_FRAUD_BLOCK_THRESHOLD"))?;

        let withdrawal_rate = parse_decimal("ENGINE_WITHDRAWAL_FEE_RATE", "0.01")?;
        let payment_rate = parse_decimal("ENGINE_PAYMENT_FEE_RATE", "0.01")?;

        Ok(Self {
            base_currency,
            default_daily_limit,
            default_monthly_limit,
            lock_wait: Duration::from_millis(lock_wait_ms),
            fraud: FraudConfig {
                review_threshold,
                block_threshold,
            },
            fees: FeePolicy {
                withdrawal_rate,
                payment_rate,
                rounding: Rounding::HalfUp,
            },
        })
    }

    pub fn default_daily_limit(&self) -> Money {
        Money::new(self.default_daily_limit, self.base_currency)
            .unwrap_or_else(|_| Money::zero(self.base_currency))
    }

    pub fn default_monthly_limit(&self) -> Money {
        Money::new(self.default_monthly_limit, self.base_currency)
            .unwrap_or_else(|_| Money::zero(self.base_currency))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::Xof,
            default_daily_limit: Decimal::from(500_000),
            default_monthly_limit: Decimal::from(5_000_000),
            lock_wait: Duration::from_millis(5000),
            fraud: FraudConfig::default(),
            fees: FeePolicy {
                withdrawal_rate: Decimal::new(1, 2),
                payment_rate: Decimal::new(1, 2),
                rounding: Rounding::HalfUp,
            },
        }
    }
}

fn parse_decimal(var: &'static str, default: &str) -> Result<Decimal, ConfigError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).map_err(|_| ConfigError::InvalidValue(var))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
