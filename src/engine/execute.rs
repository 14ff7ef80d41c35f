//! Transaction execution pipeline
//!
//! `execute` drives one request through the status state machine:
//! validation, fraud screening, then settlement under exclusive wallet
//! locks. Settlement is all-or-nothing: the wallet updates, the ledger
//! entries, and the COMPLETED status commit together or not at all, so a
//! fault at any point leaves balances untouched and the transaction FAILED
//! with a recorded reason.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::context::{GeoPoint, OperationContext};
use crate::domain::events::DomainEvent;
use crate::domain::ledger::LedgerEntry;
use crate::domain::money::Money;
use crate::domain::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::domain::wallet::Wallet;
use crate::error::{EngineError, EngineResult};
use crate::fraud::{self, EvaluationInput, FraudAction, FraudRule, HistoryItem, SenderHistory};
use crate::store::{Store, StoreError, StoreSession};

use super::{Engine, TransactionRequest};

/// How far back the fraud history snapshot reaches. Velocity rule windows
/// must fit inside it.
const HISTORY_WINDOW_HOURS: i64 = 24;

impl<S: Store> Engine<S> {
    /// Execute a money movement end to end.
    ///
    /// Retrying with the same `reference` is idempotent: if a transaction
    /// with that reference already exists in flight or finished, it is
    /// returned as-is and no new movement happens. A FAILED transaction
    /// moved no funds, so the same reference re-processes it from scratch,
    /// which is how callers recover from transient faults such as a lock
    /// timeout.
    pub async fn execute(
        &self,
        request: TransactionRequest,
        ctx: &OperationContext,
    ) -> EngineResult<Transaction> {
        request.validate()?;
        let now = Utc::now();

        let prior = match &request.reference {
            Some(reference) => self.store.find_by_reference(reference).await?,
            None => None,
        };
        if let Some(existing) = &prior {
            if existing.status != TransactionStatus::Failed {
                info!(
                    reference = %existing.reference,
                    status = %existing.status,
                    "reference already processed"
                );
                return Ok(existing.clone());
            }
        }

        // Pre-checks outside the locks; everything is re-validated under
        // exclusive access before funds move.
        let sender = match request.sender_wallet {
            Some(id) => Some(self.checked_wallet(id, &request.amount).await?),
            None => None,
        };
        let receiver = match request.receiver_wallet {
            Some(id) => Some(self.checked_wallet(id, &request.amount).await?),
            None => None,
        };

        let mut tx = match prior {
            Some(failed) => {
                let mut tx = failed;
                tx.reset_for_retry()?;
                stamp_metadata(&mut tx, ctx);
                self.store.update_transaction(&tx).await?;
                info!(reference = %tx.reference, "retrying failed transaction");
                tx
            }
            None => {
                let fee = self.fee_for(&request);
                let reference = request
                    .reference
                    .clone()
                    .unwrap_or_else(|| Transaction::generate_reference(now));

                let mut tx = Transaction::new(
                    request.kind,
                    request.sender_wallet,
                    request.receiver_wallet,
                    request.amount,
                    fee,
                    reference,
                    request.description.clone(),
                    now,
                );
                tx.external_reference = request.external_reference.clone();
                tx.reversal_of = request.reversal_of;
                stamp_metadata(&mut tx, ctx);

                if let Err(err) = self.store.insert_transaction(&tx).await {
                    // Lost a race on the reference: someone else's attempt
                    // counts, unless it already failed without moving funds.
                    if let StoreError::DuplicateReference(reference) = &err {
                        if let Some(existing) = self.store.find_by_reference(reference).await? {
                            if existing.status != TransactionStatus::Failed {
                                return Ok(existing);
                            }
                        }
                    }
                    return Err(err.into());
                }
                tx
            }
        };

        tx.transition(TransactionStatus::PendingFraudCheck)?;
        self.screen(&mut tx, sender.as_ref(), receiver.as_ref(), ctx, now)
            .await?;

        tx.transition(TransactionStatus::Processing)?;
        self.store.update_transaction(&tx).await?;

        match self.settle(&mut tx, now).await {
            Ok(()) => {
                self.store.update_transaction(&tx).await?;
                info!(
                    reference = %tx.reference,
                    kind = %tx.kind,
                    amount = %tx.amount,
                    "transaction completed"
                );
                self.notifier.dispatch(&DomainEvent::TransactionCompleted {
                    transaction_id: tx.id,
                    reference: tx.reference.clone(),
                    kind: tx.kind.as_str().to_string(),
                    amount: tx.amount.amount(),
                    sender_wallet: tx.sender_wallet,
                    receiver_wallet: tx.receiver_wallet,
                    completed_at: tx.completed_at.unwrap_or(now),
                });
                Ok(tx)
            }
            Err(err) => {
                tx.fail(err.to_string(), Utc::now());
                self.store.update_transaction(&tx).await?;
                warn!(reference = %tx.reference, error = %err, "transaction failed");
                self.notifier.dispatch(&DomainEvent::TransactionFailed {
                    transaction_id: tx.id,
                    reference: tx.reference.clone(),
                    reason: err.to_string(),
                    failed_at: tx.failed_at.unwrap_or_else(Utc::now),
                });
                Err(err)
            }
        }
    }

    /// Existence, activity, and currency pre-check for one wallet.
    async fn checked_wallet(&self, id: Uuid, amount: &Money) -> EngineResult<Wallet> {
        let wallet = self.store.fetch_wallet(id).await?;
        if wallet.currency != amount.currency() {
            return Err(EngineError::CurrencyMismatch {
                expected: wallet.currency,
                found: amount.currency(),
            });
        }
        Ok(wallet)
    }

    fn fee_for(&self, request: &TransactionRequest) -> Money {
        let fees = &self.config.fees;
        match request.kind {
            TransactionKind::Withdrawal => fees.fee_at(&request.amount, fees.withdrawal_rate),
            TransactionKind::Payment => fees.fee_at(&request.amount, fees.payment_rate),
            _ => Money::zero(request.amount.currency()),
        }
    }

    /// Run the fraud rules and apply the verdict to the transaction status.
    /// Every movement is screened, reversals included.
    async fn screen(
        &self,
        tx: &mut Transaction,
        sender: Option<&Wallet>,
        receiver: Option<&Wallet>,
        ctx: &OperationContext,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let history = match sender {
            Some(wallet) => self.sender_history(wallet.id, now).await?,
            None => SenderHistory::default(),
        };
        let mut rules = self.store.active_rules().await?;
        if rules.is_empty() {
            rules = FraudRule::default_rules();
        }

        let input = EvaluationInput {
            amount: tx.amount,
            sender_owner: sender.map(|w| w.owner_reference.as_str()),
            receiver_owner: receiver.map(|w| w.owner_reference.as_str()),
            receiver_created_at: receiver.map(|w| w.created_at),
            declared_location: ctx.location,
            history: &history,
            as_of: now,
        };
        let verdict = fraud::evaluate(&input, &rules, &self.config.fraud);
        tx.fraud_score = verdict.score;

        match verdict.action {
            FraudAction::Allow => {
                tx.transition(TransactionStatus::Approved)?;
                self.store.update_transaction(tx).await?;
                Ok(())
            }
            FraudAction::Review => {
                tx.transition(TransactionStatus::Flagged)?;
                tx.flagged_reason = Some(verdict.reasons.join("; "));
                warn!(
                    reference = %tx.reference,
                    score = verdict.score,
                    "transaction flagged for review"
                );
                self.store.update_transaction(tx).await?;
                Ok(())
            }
            FraudAction::Block => {
                tx.transition(TransactionStatus::Rejected)?;
                tx.flagged_reason = Some(verdict.reasons.join("; "));
                self.store.update_transaction(tx).await?;
                warn!(
                    reference = %tx.reference,
                    score = verdict.score,
                    reasons = ?verdict.reasons,
                    "transaction blocked"
                );
                self.notifier.dispatch(&DomainEvent::FraudBlocked {
                    transaction_id: tx.id,
                    reference: tx.reference.clone(),
                    score: verdict.score,
                    reasons: verdict.reasons,
                    blocked_at: now,
                });
                Err(EngineError::FraudBlocked {
                    reference: tx.reference.clone(),
                    score: tx.fraud_score,
                })
            }
        }
    }

    async fn sender_history(
        &self,
        wallet_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<SenderHistory> {
        let since = now - Duration::hours(HISTORY_WINDOW_HOURS);
        let recent = self
            .store
            .outgoing_since(wallet_id, since)
            .await?
            .into_iter()
            .map(|tx| HistoryItem {
                amount: tx.amount.amount(),
                created_at: tx.created_at,
                location: location_from_metadata(&tx),
            })
            .collect();
        Ok(SenderHistory {
            completed_count: self.store.completed_outgoing_count(wallet_id).await?,
            average_amount: self.store.average_completed_amount(wallet_id).await?,
            recent,
        })
    }

    /// Move the funds. Locks are taken in ascending wallet id order so two
    /// opposite transfers can never deadlock; every check runs again on the
    /// locked state.
    async fn settle(&self, tx: &mut Transaction, now: DateTime<Utc>) -> EngineResult<()> {
        let mut session = self.store.begin().await?;
        let staged = async {
            apply(&mut session, tx, now).await?;
            let mut completed = tx.clone();
            completed.complete(now)?;
            session.store_transaction(&completed).await?;
            Ok::<Transaction, EngineError>(completed)
        }
        .await;
        match staged {
            Ok(completed) => {
                // A failed commit drops the session, which discards the
                // staged writes; `tx` is only marked completed afterwards.
                session.commit().await?;
                *tx = completed;
                Ok(())
            }
            Err(err) => {
                let _ = session.rollback().await;
                Err(err)
            }
        }
    }
}

/// Stage the wallet updates and ledger pair inside one session.
async fn apply<T: StoreSession>(
    session: &mut T,
    tx: &Transaction,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let mut ids: Vec<Uuid> = tx
        .sender_wallet
        .into_iter()
        .chain(tx.receiver_wallet)
        .collect();
    ids.sort();

    let mut locked: Vec<Wallet> = Vec::with_capacity(ids.len());
    for id in ids {
        locked.push(session.lock_wallet(id).await?);
    }
    let mut entries: Vec<LedgerEntry> = Vec::with_capacity(2);

    if let Some(sender_id) = tx.sender_wallet {
        let idx = locked
            .iter()
            .position(|w| w.id == sender_id)
            .ok_or(EngineError::WalletNotFound(sender_id))?;
        let charged = tx.charged()?;
        let sender = &locked[idx];
        let new_balance = sender.debited(&charged)?;
        sender.check_limits(&charged, now)?;

        let (seq, hash) = session.ledger_tip(sender_id).await?;
        entries.push(LedgerEntry::next(
            sender_id,
            tx.id,
            crate::domain::ledger::EntryDirection::Debit,
            charged,
            sender.balance,
            new_balance,
            seq + 1,
            hash,
            now,
        ));

        let sender = &mut locked[idx];
        sender.balance = new_balance;
        sender.ledger_sequence = seq + 1;
        sender.record_spend(&charged, now)?;
    }

    if let Some(receiver_id) = tx.receiver_wallet {
        let idx = locked
            .iter()
            .position(|w| w.id == receiver_id)
            .ok_or(EngineError::WalletNotFound(receiver_id))?;
        let receiver = &locked[idx];
        let new_balance = receiver.credited(&tx.amount)?;

        let (seq, hash) = session.ledger_tip(receiver_id).await?;
        entries.push(LedgerEntry::next(
            receiver_id,
            tx.id,
            crate::domain::ledger::EntryDirection::Credit,
            tx.amount,
            receiver.balance,
            new_balance,
            seq + 1,
            hash,
            now,
        ));

        let receiver = &mut locked[idx];
        receiver.balance = new_balance;
        receiver.ledger_sequence = seq + 1;
    }

    session.append_entries(&entries).await?;
    for wallet in &locked {
        session.store_wallet(wallet).await?;
    }
    Ok(())
}

fn stamp_metadata(tx: &mut Transaction, ctx: &OperationContext) {
    if let Some(actor) = &ctx.actor {
        tx.metadata
            .insert("actor".to_string(), serde_json::Value::String(actor.clone()));
    }
    if let Some(correlation_id) = ctx.correlation_id {
        tx.metadata.insert(
            "correlation_id".to_string(),
            serde_json::Value::String(correlation_id.to_string()),
        );
    }
    if let Some(ip) = ctx.client_ip {
        tx.metadata.insert(
            "client_ip".to_string(),
            serde_json::Value::String(ip.to_string()),
        );
    }
    if let Some(location) = ctx.location {
        if let Ok(value) = serde_json::to_value(location) {
            tx.metadata.insert("location".to_string(), value);
        }
    }
}

/// Declared location a past transaction was stamped with, if any.
fn location_from_metadata(tx: &Transaction) -> Option<GeoPoint> {
    tx.metadata
        .get("location")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
