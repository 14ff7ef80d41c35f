//! Domain events
//!
//! Emitted after the fact for external collaborators (notifications,
//! analytics). Delivery is fire-and-forget: a failed dispatch never rolls
//! back a committed transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    TransactionCompleted {
        transaction_id: Uuid,
        reference: String,
        kind: String,
        amount: Decimal,
        sender_wallet: Option<Uuid>,
        receiver_wallet: Option<Uuid>,
        completed_at: DateTime<Utc>,
    },

    TransactionFailed {
        transaction_id: Uuid,
        reference: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },

    WalletLocked {
        wallet_id: Uuid,
        reason: String,
        actor: String,
        locked_at: DateTime<Utc>,
    },

    FraudBlocked {
        transaction_id: Uuid,
        reference: String,
        score: u8,
        reasons: Vec<String>,
        blocked_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Dotted event name used by subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TransactionCompleted { .. } => "transaction.completed",
            DomainEvent::TransactionFailed { .. } => "transaction.failed",
            DomainEvent::WalletLocked { .. } => "wallet.locked",
            DomainEvent::FraudBlocked { .. } => "fraud.blocked",
        }
    }
}
