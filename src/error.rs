//! Error handling module
//!
//! Engine-wide error taxonomy. Business-rule rejections are terminal for the
//! transaction; transient infrastructure contention (`LockTimeout`,
//! `LedgerWriteConflict`) is safe to retry from scratch because no partial
//! state was committed. The application layer maps these onto its transport.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::money::{Currency, MoneyError};
use crate::domain::transaction::TransactionStatus;
use crate::domain::wallet::LimitWindow;
use crate::store::StoreError;

/// Engine-wide Result type.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or inconsistent request; caller's fault, never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Wallet {wallet_id} is locked: {reason}")]
    WalletLocked { wallet_id: Uuid, reason: String },

    #[error("Wallet {0} is deactivated")]
    WalletInactive(Uuid),

    #[error("{window} limit exceeded: {attempted} over limit {limit}")]
    LimitExceeded {
        window: LimitWindow,
        attempted: Decimal,
        limit: Decimal,
    },

    /// Programming/data error; should never occur in a correctly configured
    /// system and is logged at error level wherever it surfaces.
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("Transaction {reference} blocked by fraud screening (score {score})")]
    FraudBlocked { reference: String, score: u8 },

    /// The ledger tip moved under us; safe to retry the whole operation.
    #[error("Ledger write conflict on wallet {wallet_id}: expected sequence {expected}, found {actual}")]
    LedgerWriteConflict {
        wallet_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Timed out waiting for exclusive access to wallet {wallet_id}")]
    LockTimeout { wallet_id: Uuid },

    #[error("Duplicate transaction reference: {0}")]
    DuplicateReference(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Owner not found or inactive: {0}")]
    UnknownOwner(String),

    #[error("A wallet for owner {owner} in {currency} already exists")]
    WalletAlreadyExists { owner: String, currency: Currency },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction {0} is already reversed")]
    AlreadyReversed(Uuid),

    /// Ledger integrity violation detected by chain verification. Never
    /// silently repaired; halts automated reconciliation for the wallet.
    #[error("Ledger chain integrity violation on wallet {wallet_id}: {detail}")]
    ChainIntegrity { wallet_id: Uuid, detail: String },

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl EngineError {
    /// Transient infrastructure contention: the whole operation can be
    /// retried with the same idempotency reference, since no partial state
    /// was committed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::LockTimeout { .. } | EngineError::LedgerWriteConflict { .. } => true,
            EngineError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Business-rule rejection or malformed request; retrying unchanged
    /// input will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InsufficientBalance { .. }
                | EngineError::WalletLocked { .. }
                | EngineError::WalletInactive(_)
                | EngineError::LimitExceeded { .. }
                | EngineError::FraudBlocked { .. }
                | EngineError::DuplicateReference(_)
                | EngineError::UnknownOwner(_)
                | EngineError::WalletAlreadyExists { .. }
                | EngineError::InvalidTransition { .. }
                | EngineError::AlreadyReversed(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout { wallet_id } => EngineError::LockTimeout { wallet_id },
            StoreError::SequenceConflict {
                wallet_id,
                expected,
                actual,
            } => EngineError::LedgerWriteConflict {
                wallet_id,
                expected,
                actual,
            },
            StoreError::WalletNotFound(id) => EngineError::WalletNotFound(id),
            StoreError::TransactionNotFound(id) => EngineError::TransactionNotFound(id),
            StoreError::DuplicateReference(r) => EngineError::DuplicateReference(r),
            StoreError::DuplicateReversal(id) => EngineError::AlreadyReversed(id),
            StoreError::DuplicateWallet { owner, currency } => {
                EngineError::WalletAlreadyExists { owner, currency }
            }
            other => EngineError::Storage(other),
        }
    }
}
