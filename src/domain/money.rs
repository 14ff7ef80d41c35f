//! Money type
//!
//! Fixed-point monetary values tagged with a currency. All arithmetic between
//! two values requires matching currencies, and no operation may produce more
//! sub-units than the currency's minor-unit precision. Rounding happens in one
//! place only: fee computation through [`FeePolicy`].

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Supported currencies.
///
/// The platform operates on a single currency today; the enum keeps the
/// currency tag explicit so mixed-currency arithmetic is a typed error
/// instead of a silent bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Xof,
    Eur,
}

impl Currency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Xof => "XOF",
            Currency::Eur => "EUR",
        }
    }

    /// Number of minor-unit decimal places.
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::Xof | Currency::Eur => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "XOF" => Ok(Currency::Xof),
            "EUR" => Ok(Currency::Eur),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors produced by monetary arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("Amount has too many decimal places (max {max}, got {got})")]
    TooManyDecimals { max: u32, got: u32 },

    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    #[error("Invalid amount format: {0}")]
    Parse(String),
}

/// An immutable monetary value.
///
/// Negative values are representable: `checked_sub` is allowed to go below
/// zero at the type level, and callers (the Wallet) enforce non-negativity of
/// balances. Construction rejects values with more decimal places than the
/// currency's minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Create a new value, validating the scale against the currency.
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        // Decimal can carry trailing zeros ("10.00" has scale 2); normalize
        // before the scale check so equivalent values are treated the same.
        let normalized = amount.normalize();
        if normalized.scale() > currency.exponent() {
            return Err(MoneyError::TooManyDecimals {
                max: currency.exponent(),
                got: normalized.scale(),
            });
        }
        Ok(Self {
            amount: normalized,
            currency,
        })
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Construct from a count of minor units (e.g. 1500 -> 15.00 XOF).
    pub fn from_minor_units(units: i64, currency: Currency) -> Self {
        Self {
            amount: Decimal::new(units, currency.exponent()).normalize(),
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        Ok(Money {
            amount: (self.amount + other.amount).normalize(),
            currency: self.currency,
        })
    }

    /// Subtraction may produce a negative result; balance non-negativity is
    /// the Wallet's invariant, not Money's.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        Ok(Money {
            amount: (self.amount - other.amount).normalize(),
            currency: self.currency,
        })
    }

    /// Scalar multiplication without rounding. Errors if the exact result
    /// carries more precision than the minor unit; use [`FeePolicy`] when a
    /// rounded result is wanted.
    pub fn checked_mul(&self, scalar: Decimal) -> Result<Money, MoneyError> {
        Money::new(self.amount * scalar, self.currency)
    }

    pub fn cmp_value(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.require_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.prec$} {}",
            self.amount,
            self.currency,
            prec = self.currency.exponent() as usize
        )
    }
}

/// Rounding mode for fee computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Round half away from zero.
    HalfUp,
    /// Banker's rounding (half to even).
    Bankers,
}

impl Rounding {
    fn strategy(&self) -> RoundingStrategy {
        match self {
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Rounding::Bankers => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// Fee policy: rate-based fees with explicit rounding to the minor unit.
///
/// This is the only place in the engine where rounding occurs, and it is a
/// pure function of the input amount and the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Fee rate applied to withdrawals (e.g. 0.01 for 1%).
    pub withdrawal_rate: Decimal,
    /// Fee rate applied to payments.
    pub payment_rate: Decimal,
    pub rounding: Rounding,
}

impl FeePolicy {
    /// A policy charging no fees.
    pub fn free() -> Self {
        Self {
            withdrawal_rate: Decimal::ZERO,
            payment_rate: Decimal::ZERO,
            rounding: Rounding::HalfUp,
        }
    }

    /// Compute a fee for the given rate, rounded to the currency minor unit.
    pub fn fee_at(&self, amount: &Money, rate: Decimal) -> Money {
        let raw = amount.amount() * rate;
        let rounded = raw.round_dp_with_strategy(
            amount.currency().exponent(),
            self.rounding.strategy(),
        );
        Money {
            amount: rounded.normalize(),
            currency: amount.currency(),
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::free()
    }
}
