//! Transaction lifecycle operations
//!
//! Cancellation before settlement, reversal after completion, and manual
//! review of flagged transactions. A reversal is a new linked transaction
//! moving the funds back; the original record is never mutated beyond its
//! `reversed_by` pointer.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::domain::context::OperationContext;
use crate::domain::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::error::{EngineError, EngineResult};
use crate::store::Store;

use super::{Engine, TransactionRequest};

impl<S: Store> Engine<S> {
    /// Cancel a transaction that has not started processing.
    pub async fn cancel(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> EngineResult<Transaction> {
        let mut tx = self.store.fetch_transaction(transaction_id).await?;
        tx.cancel(reason, Utc::now())?;
        self.store.update_transaction(&tx).await?;
        info!(reference = %tx.reference, reason, "transaction cancelled");
        Ok(tx)
    }

    /// Reverse a COMPLETED transaction by issuing a new REVERSAL transaction
    /// with the wallets swapped. The original amount moves back; the fee is
    /// not refunded. Each transaction can be reversed at most once.
    pub async fn reverse(
        &self,
        transaction_id: Uuid,
        ctx: &OperationContext,
    ) -> EngineResult<Transaction> {
        let mut original = self.store.fetch_transaction(transaction_id).await?;
        if original.status != TransactionStatus::Completed {
            return Err(EngineError::InvalidTransition {
                from: original.status,
                to: TransactionStatus::Processing,
            });
        }
        if original.reversed_by.is_some() {
            return Err(EngineError::AlreadyReversed(original.id));
        }
        if original.kind == TransactionKind::Reversal {
            return Err(EngineError::Validation(
                "a reversal cannot be reversed".to_string(),
            ));
        }

        // Wallets swap: a withdrawal reversal becomes a pure credit back to
        // the original sender, a deposit reversal a pure debit.
        let request = TransactionRequest {
            kind: TransactionKind::Reversal,
            sender_wallet: original.receiver_wallet,
            receiver_wallet: original.sender_wallet,
            amount: original.amount,
            reference: Some(Transaction::generate_reference(Utc::now())),
            external_reference: None,
            description: format!("Reversal of {}", original.reference),
            reversal_of: Some(original.id),
        };

        let reversal = self.execute(request, ctx).await?;
        original.reversed_by = Some(reversal.id);
        self.store.update_transaction(&original).await?;
        info!(
            original = %original.reference,
            reversal = %reversal.reference,
            "transaction reversed"
        );
        Ok(reversal)
    }

    /// Manually flag a transaction for review, re-opening any previous
    /// review. Like a FLAGGED score band, this is an audit marker, not a
    /// gate on funds already moved.
    pub async fn flag_for_review(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> EngineResult<Transaction> {
        let mut tx = self.store.fetch_transaction(transaction_id).await?;
        tx.flagged_reason = Some(reason.to_string());
        tx.reviewed_by = None;
        tx.reviewed_at = None;
        self.store.update_transaction(&tx).await?;
        info!(reference = %tx.reference, reason, "transaction flagged for review");
        Ok(tx)
    }

    /// Record the outcome of a manual review of a FLAGGED transaction. The
    /// funds already moved; review is an audit action, not a gate.
    pub async fn review(
        &self,
        transaction_id: Uuid,
        reviewer: &str,
    ) -> EngineResult<Transaction> {
        let mut tx = self.store.fetch_transaction(transaction_id).await?;
        if tx.flagged_reason.is_none() {
            return Err(EngineError::Validation(
                "transaction was not flagged".to_string(),
            ));
        }
        tx.reviewed_by = Some(reviewer.to_string());
        tx.reviewed_at = Some(Utc::now());
        self.store.update_transaction(&tx).await?;
        info!(reference = %tx.reference, reviewer, "flagged transaction reviewed");
        Ok(tx)
    }

    pub async fn transaction(&self, transaction_id: Uuid) -> EngineResult<Transaction> {
        Ok(self.store.fetch_transaction(transaction_id).await?)
    }

    pub async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> EngineResult<Transaction> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown reference {reference}")))
    }
}
