//! Transaction engine
//!
//! Orchestrates the full lifecycle of a money movement: validation, fraud
//! screening, exclusive wallet locking, double-entry ledger append, and
//! status transitions, all against a pluggable [`Store`] backend.

mod execute;
mod lifecycle;
mod wallets;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::money::Money;
use crate::domain::transaction::TransactionKind;
use crate::error::{EngineError, EngineResult};
use crate::notify::{Notifier, TracingNotifier};
use crate::store::Store;

use uuid::Uuid;

/// Resolves owner references to live identities. The engine only needs a
/// liveness check; the surrounding application owns the identity model.
pub trait OwnerDirectory: Send + Sync {
    fn verify(&self, owner_reference: &str) -> EngineResult<()>;
}

/// Directory that accepts every owner reference. Default in embedded use.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl OwnerDirectory for OpenDirectory {
    fn verify(&self, _owner_reference: &str) -> EngineResult<()> {
        Ok(())
    }
}

/// A request to move money.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub sender_wallet: Option<Uuid>,
    pub receiver_wallet: Option<Uuid>,
    pub amount: Money,
    /// Caller-supplied idempotency reference; generated when absent.
    pub reference: Option<String>,
    pub external_reference: Option<String>,
    pub description: String,
    /// Set on REVERSAL requests: the transaction being undone.
    pub reversal_of: Option<Uuid>,
}

impl TransactionRequest {
    pub fn deposit(receiver: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Deposit, None, Some(receiver), amount)
    }

    pub fn withdrawal(sender: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Withdrawal, Some(sender), None, amount)
    }

    pub fn transfer(sender: Uuid, receiver: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Transfer, Some(sender), Some(receiver), amount)
    }

    pub fn payment(sender: Uuid, receiver: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Payment, Some(sender), Some(receiver), amount)
    }

    pub fn refund(sender: Uuid, receiver: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Refund, Some(sender), Some(receiver), amount)
    }

    pub fn sponsorship(sender: Uuid, receiver: Uuid, amount: Money) -> Self {
        Self::raw(TransactionKind::Sponsorship, Some(sender), Some(receiver), amount)
    }

    fn raw(
        kind: TransactionKind,
        sender_wallet: Option<Uuid>,
        receiver_wallet: Option<Uuid>,
        amount: Money,
    ) -> Self {
        Self {
            kind,
            sender_wallet,
            receiver_wallet,
            amount,
            reference: None,
            external_reference: None,
            description: String::new(),
            reversal_of: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Shape validation before anything touches storage.
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if !self.amount.is_positive() {
            return Err(EngineError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        match self.kind {
            TransactionKind::Reversal => {
                if self.sender_wallet.is_none() && self.receiver_wallet.is_none() {
                    return Err(EngineError::Validation(
                        "reversal needs at least one wallet".to_string(),
                    ));
                }
            }
            kind => {
                if kind.has_sender() && self.sender_wallet.is_none() {
                    return Err(EngineError::Validation(format!(
                        "{kind} requires a sender wallet"
                    )));
                }
                if kind.has_receiver() && self.receiver_wallet.is_none() {
                    return Err(EngineError::Validation(format!(
                        "{kind} requires a receiver wallet"
                    )));
                }
            }
        }
        if self.sender_wallet.is_some() && self.sender_wallet == self.receiver_wallet {
            return Err(EngineError::Validation(
                "sender and receiver must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// The engine. Cheap to clone when `S` is; all state lives in the store.
pub struct Engine<S: Store> {
    store: S,
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
    owners: Arc<dyn OwnerDirectory>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            notifier: Arc::new(TracingNotifier),
            owners: Arc::new(OpenDirectory),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_owner_directory(mut self, owners: Arc<dyn OwnerDirectory>) -> Self {
        self.owners = owners;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn xof(v: rust_decimal::Decimal) -> Money {
        Money::new(v, Currency::Xof).unwrap()
    }

    #[test]
    fn test_request_shape_validation() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(TransactionRequest::transfer(a, b, xof(dec!(100))).validate().is_ok());
        assert!(TransactionRequest::deposit(a, xof(dec!(100))).validate().is_ok());
        assert!(TransactionRequest::withdrawal(a, xof(dec!(100))).validate().is_ok());

        let err = TransactionRequest::transfer(a, a, xof(dec!(100)))
            .validate()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = TransactionRequest::transfer(a, b, xof(dec!(0)))
            .validate()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let mut missing_receiver = TransactionRequest::transfer(a, b, xof(dec!(100)));
        missing_receiver.receiver_wallet = None;
        assert!(missing_receiver.validate().is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let a = Uuid::new_v4();
        let err = TransactionRequest::withdrawal(a, xof(dec!(-5)))
            .validate()
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
