//! Wallet projection
//!
//! Mutable current-balance view for one owner/currency pair, with spending
//! limits and lock state. The type performs no locking of its own: every
//! mutation happens while the caller holds exclusive access through a store
//! session, so methods here are plain data/validation logic.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::{Currency, Money};
use crate::error::EngineError;

/// Which spending window rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitWindow::Daily => write!(f, "daily"),
            LimitWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Wallet state.
///
/// Invariants: `balance >= 0` at all times; `daily_spent` resets at the day
/// boundary and `monthly_spent` at the month boundary of the `as_of`
/// timestamp passed to limit checks; a locked wallet rejects every
/// debit/credit-initiating operation until an administrative unlock.
/// Wallets are never hard-deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_reference: String,
    pub balance: Money,
    pub currency: Currency,
    pub daily_limit: Money,
    pub monthly_limit: Money,
    pub daily_spent: Money,
    pub monthly_spent: Money,
    /// Day the spent counters were last reset against.
    pub spent_as_of: NaiveDate,
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Sequence number of the wallet's latest ledger entry (0 = none).
    pub ledger_sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(
        owner_reference: impl Into<String>,
        currency: Currency,
        daily_limit: Money,
        monthly_limit: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_reference: owner_reference.into(),
            balance: Money::zero(currency),
            currency,
            daily_limit,
            monthly_limit,
            daily_spent: Money::zero(currency),
            monthly_spent: Money::zero(currency),
            spent_as_of: now.date_naive(),
            locked: false,
            lock_reason: None,
            locked_by: None,
            locked_at: None,
            active: true,
            ledger_sequence: 0,
            created_at: now,
        }
    }

    fn ensure_usable(&self) -> Result<(), EngineError> {
        if !self.active {
            return Err(EngineError::WalletInactive(self.id));
        }
        if self.locked {
            return Err(EngineError::WalletLocked {
                wallet_id: self.id,
                reason: self.lock_reason.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Compute the balance after a debit. Fails on lock, deactivation, or
    /// insufficient funds; performs no mutation.
    pub fn debited(&self, amount: &Money) -> Result<Money, EngineError> {
        self.ensure_usable()?;
        let new_balance = self.balance.checked_sub(amount)?;
        if new_balance.is_negative() {
            return Err(EngineError::InsufficientBalance {
                required: amount.amount(),
                available: self.balance.amount(),
            });
        }
        Ok(new_balance)
    }

    /// Compute the balance after a credit. Fails on lock or deactivation.
    pub fn credited(&self, amount: &Money) -> Result<Money, EngineError> {
        self.ensure_usable()?;
        Ok(self.balance.checked_add(amount)?)
    }

    /// Spent counters effective at `as_of`, applying the day/month reset rule
    /// without mutating the wallet.
    pub fn effective_spent(&self, as_of: DateTime<Utc>) -> (Money, Money) {
        let today = as_of.date_naive();
        let daily = if self.spent_as_of == today {
            self.daily_spent
        } else {
            Money::zero(self.currency)
        };
        let monthly = if self.spent_as_of.year() == today.year()
            && self.spent_as_of.month() == today.month()
        {
            self.monthly_spent
        } else {
            Money::zero(self.currency)
        };
        (daily, monthly)
    }

    /// Check the daily and monthly spending limits for an additional
    /// `amount` spent at `as_of`.
    pub fn check_limits(&self, amount: &Money, as_of: DateTime<Utc>) -> Result<(), EngineError> {
        let (daily, monthly) = self.effective_spent(as_of);
        let daily_total = daily.checked_add(amount)?;
        if daily_total.cmp_value(&self.daily_limit)? == std::cmp::Ordering::Greater {
            return Err(EngineError::LimitExceeded {
                window: LimitWindow::Daily,
                attempted: daily_total.amount(),
                limit: self.daily_limit.amount(),
            });
        }
        let monthly_total = monthly.checked_add(amount)?;
        if monthly_total.cmp_value(&self.monthly_limit)? == std::cmp::Ordering::Greater {
            return Err(EngineError::LimitExceeded {
                window: LimitWindow::Monthly,
                attempted: monthly_total.amount(),
                limit: self.monthly_limit.amount(),
            });
        }
        Ok(())
    }

    /// Record an outgoing spend at `as_of`, applying resets first.
    pub fn record_spend(&mut self, amount: &Money, as_of: DateTime<Utc>) -> Result<(), EngineError> {
        let (daily, monthly) = self.effective_spent(as_of);
        self.daily_spent = daily.checked_add(amount)?;
        self.monthly_spent = monthly.checked_add(amount)?;
        self.spent_as_of = as_of.date_naive();
        Ok(())
    }

    /// Administrative lock. Does not touch in-flight transactions; new ones
    /// are rejected.
    pub fn lock(&mut self, reason: impl Into<String>, actor: impl Into<String>, now: DateTime<Utc>) {
        self.locked = true;
        self.lock_reason = Some(reason.into());
        self.locked_by = Some(actor.into());
        self.locked_at = Some(now);
    }

    pub fn unlock(&mut self) {
        self.locked = false;
        self.lock_reason = None;
        self.locked_by = None;
        self.locked_at = None;
    }

    /// Soft deactivation; wallets are never hard-deleted.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Balance summary returned to the application layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSummary {
    pub balance: Money,
    pub daily_spent: Money,
    pub daily_remaining: Money,
    pub monthly_spent: Money,
    pub monthly_remaining: Money,
}

impl BalanceSummary {
    pub fn of(wallet: &Wallet, as_of: DateTime<Utc>) -> Result<Self, EngineError> {
        let (daily, monthly) = wallet.effective_spent(as_of);
        Ok(Self {
            balance: wallet.balance,
            daily_spent: daily,
            daily_remaining: wallet.daily_limit.checked_sub(&daily)?,
            monthly_spent: monthly,
            monthly_remaining: wallet.monthly_limit.checked_sub(&monthly)?,
        })
    }
}
