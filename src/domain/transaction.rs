//! Transaction record and status state machine
//!
//! A transaction is created once, mutated only through status transitions,
//! and never reopened from a terminal state. The single exception is that a
//! COMPLETED transaction may spawn exactly one REVERSAL transaction, which is
//! a new record linked through `reversal_of` / `reversed_by`, not a mutation
//! of the original.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money::Money;
use crate::error::EngineError;

/// Transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Refund,
    Sponsorship,
    Reversal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Transfer => "TRANSFER",
            TransactionKind::Payment => "PAYMENT",
            TransactionKind::Refund => "REFUND",
            TransactionKind::Sponsorship => "SPONSORSHIP",
            TransactionKind::Reversal => "REVERSAL",
        }
    }

    /// Whether the kind debits a sender wallet.
    pub fn has_sender(&self) -> bool {
        !matches!(self, TransactionKind::Deposit)
    }

    /// Whether the kind credits a receiver wallet.
    pub fn has_receiver(&self) -> bool {
        !matches!(self, TransactionKind::Withdrawal)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            "TRANSFER" => Ok(TransactionKind::Transfer),
            "PAYMENT" => Ok(TransactionKind::Payment),
            "REFUND" => Ok(TransactionKind::Refund),
            "SPONSORSHIP" => Ok(TransactionKind::Sponsorship),
            "REVERSAL" => Ok(TransactionKind::Reversal),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// State machine states.
///
/// `Created -> PendingFraudCheck -> {Approved | Flagged | Rejected}`,
/// then `{Approved | Flagged} -> Processing -> {Completed | Failed}`.
/// `Cancelled` is reachable from `Created`, `PendingFraudCheck` and
/// `Approved` only. `Rejected`, `Failed`, `Cancelled` and `Completed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Created,
    PendingFraudCheck,
    Approved,
    Flagged,
    Rejected,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "CREATED",
            TransactionStatus::PendingFraudCheck => "PENDING_FRAUD_CHECK",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Flagged => "FLAGGED",
            TransactionStatus::Rejected => "REJECTED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Rejected
                | TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
        )
    }

    /// Valid transitions of the state machine.
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Created, PendingFraudCheck)
                | (PendingFraudCheck, Approved)
                | (PendingFraudCheck, Flagged)
                | (PendingFraudCheck, Rejected)
                | (Approved, Processing)
                | (Flagged, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Created, Cancelled)
                | (PendingFraudCheck, Cancelled)
                | (Approved, Cancelled)
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TransactionStatus::Created),
            "PENDING_FRAUD_CHECK" => Ok(TransactionStatus::PendingFraudCheck),
            "APPROVED" => Ok(TransactionStatus::Approved),
            "FLAGGED" => Ok(TransactionStatus::Flagged),
            "REJECTED" => Ok(TransactionStatus::Rejected),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// A money-moving transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub sender_wallet: Option<Uuid>,
    pub receiver_wallet: Option<Uuid>,
    pub amount: Money,
    pub fee: Money,
    /// Globally unique; doubles as the caller's retry idempotency key.
    pub reference: String,
    pub external_reference: Option<String>,
    pub description: String,
    pub fraud_score: u8,
    pub flagged_reason: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub failure_reason: Option<String>,
    /// Set on a REVERSAL transaction: the transaction it undoes.
    pub reversal_of: Option<Uuid>,
    /// Set on a reversed original: the REVERSAL transaction.
    pub reversed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TransactionKind,
        sender_wallet: Option<Uuid>,
        receiver_wallet: Option<Uuid>,
        amount: Money,
        fee: Money,
        reference: String,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TransactionStatus::Created,
            sender_wallet,
            receiver_wallet,
            amount,
            fee,
            reference,
            external_reference: None,
            description,
            fraud_score: 0,
            flagged_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            metadata: serde_json::Map::new(),
            failure_reason: None,
            reversal_of: None,
            reversed_by: None,
            created_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Generate a reference of the form `TXN{yyyymmddHHMMSS}{8 alnum}`.
    pub fn generate_reference(now: DateTime<Utc>) -> String {
        const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect();
        format!("TXN{}{}", now.format("%Y%m%d%H%M%S"), suffix)
    }

    /// Move to a new status, enforcing the state machine.
    pub fn transition(&mut self, to: TransactionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(TransactionStatus::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        // Failure is reachable from any non-terminal state; a fault between
        // Created and Processing must still be recorded.
        if !self.status.is_terminal() {
            self.status = TransactionStatus::Failed;
            self.failure_reason = Some(reason.into());
            self.failed_at = Some(now);
        }
    }

    /// Re-arm a FAILED transaction for another attempt under the same
    /// reference. A failed attempt moved no funds, so FAILED is terminal
    /// only for the record, not for the reference.
    pub fn reset_for_retry(&mut self) -> Result<(), EngineError> {
        if self.status != TransactionStatus::Failed {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: TransactionStatus::Created,
            });
        }
        self.status = TransactionStatus::Created;
        self.failure_reason = None;
        self.failed_at = None;
        self.fraud_score = 0;
        self.flagged_reason = None;
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transition(TransactionStatus::Cancelled)?;
        self.failure_reason = Some(reason.into());
        self.failed_at = Some(now);
        Ok(())
    }

    /// Total amount charged to the sender (amount plus fee).
    pub fn charged(&self) -> Result<Money, EngineError> {
        Ok(self.amount.checked_add(&self.fee)?)
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged_reason.is_some() && self.reviewed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn tx(kind: TransactionKind) -> Transaction {
        let now = Utc::now();
        Transaction::new(
            kind,
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            Money::new(dec!(1000), Currency::Xof).unwrap(),
            Money::zero(Currency::Xof),
            Transaction::generate_reference(now),
            "test".to_string(),
            now,
        )
    }

    #[test]
    fn test_reference_shape() {
        let reference = Transaction::generate_reference(Utc::now());
        assert!(reference.starts_with("TXN"));
        assert_eq!(reference.len(), 3 + 14 + 8);
        assert!(reference[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = tx(TransactionKind::Transfer);
        t.transition(TransactionStatus::PendingFraudCheck).unwrap();
        t.transition(TransactionStatus::Approved).unwrap();
        t.transition(TransactionStatus::Processing).unwrap();
        t.complete(Utc::now()).unwrap();
        assert_eq!(t.status, TransactionStatus::Completed);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_flagged_still_processes() {
        let mut t = tx(TransactionKind::Transfer);
        t.transition(TransactionStatus::PendingFraudCheck).unwrap();
        t.transition(TransactionStatus::Flagged).unwrap();
        assert!(t.transition(TransactionStatus::Processing).is_ok());
    }

    #[test]
    fn test_terminal_states_stay_terminal() {
        let mut t = tx(TransactionKind::Transfer);
        t.transition(TransactionStatus::PendingFraudCheck).unwrap();
        t.transition(TransactionStatus::Rejected).unwrap();
        let err = t.transition(TransactionStatus::Processing).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cancel_only_before_processing() {
        let mut t = tx(TransactionKind::Transfer);
        assert!(t.clone().cancel("caller change of mind", Utc::now()).is_ok());

        t.transition(TransactionStatus::PendingFraudCheck).unwrap();
        assert!(t.clone().cancel("still fine", Utc::now()).is_ok());

        t.transition(TransactionStatus::Approved).unwrap();
        assert!(t.clone().cancel("last chance", Utc::now()).is_ok());

        t.transition(TransactionStatus::Processing).unwrap();
        assert!(t.cancel("too late", Utc::now()).is_err());
    }

    #[test]
    fn test_fail_records_reason_once_terminal_noop() {
        let mut t = tx(TransactionKind::Withdrawal);
        t.fail("insufficient balance", Utc::now());
        assert_eq!(t.status, TransactionStatus::Failed);
        assert_eq!(t.failure_reason.as_deref(), Some("insufficient balance"));
        t.fail("second fault", Utc::now());
        assert_eq!(t.failure_reason.as_deref(), Some("insufficient balance"));
    }

    #[test]
    fn test_reset_for_retry_rearms_failed_only() {
        let mut t = tx(TransactionKind::Transfer);
        t.fail("lock wait timed out", Utc::now());
        t.reset_for_retry().unwrap();
        assert_eq!(t.status, TransactionStatus::Created);
        assert!(t.failure_reason.is_none());
        assert!(t.failed_at.is_none());
        // And the pipeline can run again
        t.transition(TransactionStatus::PendingFraudCheck).unwrap();

        let mut done = tx(TransactionKind::Transfer);
        done.transition(TransactionStatus::PendingFraudCheck).unwrap();
        done.transition(TransactionStatus::Approved).unwrap();
        done.transition(TransactionStatus::Processing).unwrap();
        done.complete(Utc::now()).unwrap();
        assert!(done.reset_for_retry().is_err());
    }

    #[test]
    fn test_charged_includes_fee() {
        let mut t = tx(TransactionKind::Withdrawal);
        t.fee = Money::new(dec!(10), Currency::Xof).unwrap();
        assert_eq!(
            t.charged().unwrap(),
            Money::new(dec!(1010), Currency::Xof).unwrap()
        );
    }
}
