//! In-memory store
//!
//! Backs the engine in tests and embedded use. Exclusive wallet access is a
//! per-wallet `tokio` mutex acquired with a bounded wait; staged session
//! writes apply under a single state write lock at commit, after re-checking
//! each wallet's ledger tip.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

use crate::domain::ledger::{LedgerEntry, GENESIS_HASH};
use crate::domain::money::Currency;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::domain::wallet::Wallet;
use crate::fraud::FraudRule;
use crate::reconciliation::ReconciliationRecord;

use super::{Store, StoreError, StoreSession};

const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(5_000);

#[derive(Default)]
struct State {
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    by_reference: HashMap<String, Uuid>,
    /// Per-wallet entries in ascending sequence order.
    entries: HashMap<Uuid, Vec<LedgerEntry>>,
    rules: Vec<FraudRule>,
    reconciliation: BTreeMap<(NaiveDate, Uuid), ReconciliationRecord>,
}

struct Shared {
    state: RwLock<State>,
    /// One mutex per wallet; guards exclusive session access, not reads.
    locks: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    lock_wait: Duration,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT)
    }
}

impl MemoryStore {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                locks: std::sync::Mutex::new(HashMap::new()),
                lock_wait,
            }),
        }
    }

    fn wallet_mutex(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self
            .shared
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id).or_default().clone()
    }
}

impl Store for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        Ok(MemorySession {
            store: self.clone(),
            guards: HashMap::new(),
            staged_wallets: Vec::new(),
            staged_entries: Vec::new(),
            staged_transactions: Vec::new(),
        })
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        let duplicate = state.wallets.values().any(|w| {
            w.owner_reference == wallet.owner_reference && w.currency == wallet.currency
        });
        if duplicate {
            return Err(StoreError::DuplicateWallet {
                owner: wallet.owner_reference.clone(),
                currency: wallet.currency,
            });
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn fetch_wallet(&self, id: Uuid) -> Result<Wallet, StoreError> {
        let state = self.shared.state.read().await;
        state
            .wallets
            .get(&id)
            .cloned()
            .ok_or(StoreError::WalletNotFound(id))
    }

    async fn find_wallet(
        &self,
        owner_reference: &str,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .wallets
            .values()
            .find(|w| w.owner_reference == owner_reference && w.currency == currency)
            .cloned())
    }

    async fn update_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        if !state.wallets.contains_key(&wallet.id) {
            return Err(StoreError::WalletNotFound(wallet.id));
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn update_wallet_controls(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        let stored = state
            .wallets
            .get_mut(&wallet.id)
            .ok_or(StoreError::WalletNotFound(wallet.id))?;
        stored.locked = wallet.locked;
        stored.lock_reason = wallet.lock_reason.clone();
        stored.locked_by = wallet.locked_by.clone();
        stored.locked_at = wallet.locked_at;
        stored.active = wallet.active;
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        if state.by_reference.contains_key(&tx.reference) {
            return Err(StoreError::DuplicateReference(tx.reference.clone()));
        }
        // One live reversal per transaction, enforced at insert so two
        // concurrent attempts cannot both proceed.
        if let Some(original) = tx.reversal_of {
            let live = state.transactions.values().any(|t| {
                t.id != tx.id
                    && t.reversal_of == Some(original)
                    && !matches!(
                        t.status,
                        TransactionStatus::Failed
                            | TransactionStatus::Cancelled
                            | TransactionStatus::Rejected
                    )
            });
            if live {
                return Err(StoreError::DuplicateReversal(original));
            }
        }
        state.by_reference.insert(tx.reference.clone(), tx.id);
        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        if !state.transactions.contains_key(&tx.id) {
            return Err(StoreError::TransactionNotFound(tx.id));
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn fetch_transaction(&self, id: Uuid) -> Result<Transaction, StoreError> {
        let state = self.shared.state.read().await;
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(StoreError::TransactionNotFound(id))
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .by_reference
            .get(reference)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn outgoing_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.shared.state.read().await;
        let mut found: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.sender_wallet == Some(wallet_id)
                    && tx.created_at >= since
                    && matches!(
                        tx.status,
                        TransactionStatus::Completed | TransactionStatus::Processing
                    )
            })
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.created_at);
        Ok(found)
    }

    async fn completed_outgoing_count(&self, wallet_id: Uuid) -> Result<u64, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| {
                tx.sender_wallet == Some(wallet_id)
                    && tx.status == TransactionStatus::Completed
            })
            .count() as u64)
    }

    async fn average_completed_amount(
        &self,
        wallet_id: Uuid,
    ) -> Result<Option<Decimal>, StoreError> {
        let state = self.shared.state.read().await;
        let amounts: Vec<Decimal> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.sender_wallet == Some(wallet_id)
                    && tx.status == TransactionStatus::Completed
            })
            .map(|tx| tx.amount.amount())
            .collect();
        if amounts.is_empty() {
            return Ok(None);
        }
        let total: Decimal = amounts.iter().sum();
        Ok(Some(total / Decimal::from(amounts.len() as u64)))
    }

    async fn active_rules(&self) -> Result<Vec<FraudRule>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state.rules.iter().filter(|r| r.active).cloned().collect())
    }

    async fn upsert_rule(&self, rule: &FraudRule) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => state.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn entries_after(
        &self,
        wallet_id: Uuid,
        after: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .entries
            .get(&wallet_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.sequence_number > after)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.shared.state.read().await;
        let mut found: Vec<LedgerEntry> = state
            .entries
            .values()
            .flatten()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }

    async fn wallets_with_activity(
        &self,
        date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let state = self.shared.state.read().await;
        let mut ids: Vec<Uuid> = state
            .entries
            .iter()
            .filter(|(_, entries)| {
                entries
                    .iter()
                    .any(|e| e.created_at.date_naive() == date && e.created_at < cutoff)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_reconciliation_records(
        &self,
        records: &[ReconciliationRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.shared.state.write().await;
        for record in records {
            state
                .reconciliation
                .insert((record.date, record.wallet_id), record.clone());
        }
        Ok(())
    }

    async fn reconciliation_records(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ReconciliationRecord>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .reconciliation
            .range((date, Uuid::nil())..=(date, Uuid::max()))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn latest_reconciliation(
        &self,
        wallet_id: Uuid,
        before: NaiveDate,
    ) -> Result<Option<ReconciliationRecord>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .reconciliation
            .range(..(before, Uuid::nil()))
            .filter(|((_, id), _)| *id == wallet_id)
            .map(|(_, record)| record.clone())
            .next_back())
    }
}

pub struct MemorySession {
    store: MemoryStore,
    guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged_wallets: Vec<Wallet>,
    staged_entries: Vec<LedgerEntry>,
    staged_transactions: Vec<Transaction>,
}

impl StoreSession for MemorySession {
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Wallet, StoreError> {
        if !self.guards.contains_key(&id) {
            let mutex = self.store.wallet_mutex(id);
            let guard = timeout(self.store.shared.lock_wait, mutex.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout { wallet_id: id })?;
            self.guards.insert(id, guard);
        }
        self.store.fetch_wallet(id).await
    }

    async fn ledger_tip(&mut self, wallet_id: Uuid) -> Result<(i64, String), StoreError> {
        let state = self.store.shared.state.read().await;
        Ok(state
            .entries
            .get(&wallet_id)
            .and_then(|entries| entries.last())
            .map(|e| (e.sequence_number, e.content_hash.clone()))
            .unwrap_or_else(|| (0, GENESIS_HASH.to_string())))
    }

    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        self.staged_entries.extend_from_slice(entries);
        Ok(())
    }

    async fn store_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.staged_wallets.push(wallet.clone());
        Ok(())
    }

    async fn store_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        self.staged_transactions.push(tx.clone());
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.store.shared.state.write().await;

        // Re-check each wallet's chain continuity before applying anything.
        let mut next_expected: HashMap<Uuid, i64> = HashMap::new();
        for entry in &self.staged_entries {
            let expected = next_expected.entry(entry.wallet_id).or_insert_with(|| {
                state
                    .entries
                    .get(&entry.wallet_id)
                    .and_then(|entries| entries.last())
                    .map(|e| e.sequence_number)
                    .unwrap_or(0)
                    + 1
            });
            if entry.sequence_number != *expected {
                return Err(StoreError::SequenceConflict {
                    wallet_id: entry.wallet_id,
                    expected: *expected,
                    actual: entry.sequence_number,
                });
            }
            *expected += 1;
        }

        for wallet in self.staged_wallets {
            state.wallets.insert(wallet.id, wallet);
        }
        for entry in self.staged_entries {
            state.entries.entry(entry.wallet_id).or_default().push(entry);
        }
        for tx in self.staged_transactions {
            state.by_reference.entry(tx.reference.clone()).or_insert(tx.id);
            state.transactions.insert(tx.id, tx);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Guards drop here; staged writes are discarded.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::EntryDirection;
    use crate::domain::money::Money;
    use rust_decimal_macros::dec;

    fn wallet() -> Wallet {
        Wallet::new(
            "owner-1",
            Currency::Xof,
            Money::new(dec!(500000), Currency::Xof).unwrap(),
            Money::new(dec!(5000000), Currency::Xof).unwrap(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_wallet_rejected() {
        let store = MemoryStore::default();
        store.insert_wallet(&wallet()).await.unwrap();
        let err = store.insert_wallet(&wallet()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateWallet { .. }));
    }

    #[tokio::test]
    async fn test_lock_wallet_times_out_when_held() {
        let store = MemoryStore::new(Duration::from_millis(50));
        let w = wallet();
        store.insert_wallet(&w).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_wallet(w.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_wallet(w.id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        first.rollback().await.unwrap();
        let mut third = store.begin().await.unwrap();
        third.lock_wallet(w.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_sequence() {
        let store = MemoryStore::default();
        let w = wallet();
        store.insert_wallet(&w).await.unwrap();

        let entry = LedgerEntry::next(
            w.id,
            Uuid::new_v4(),
            EntryDirection::Credit,
            Money::new(dec!(100), Currency::Xof).unwrap(),
            Money::zero(Currency::Xof),
            Money::new(dec!(100), Currency::Xof).unwrap(),
            1,
            GENESIS_HASH.to_string(),
            Utc::now(),
        );

        let mut session = store.begin().await.unwrap();
        session.lock_wallet(w.id).await.unwrap();
        session.append_entries(&[entry.clone()]).await.unwrap();
        session.commit().await.unwrap();

        // Same sequence number again: stale
        let mut session = store.begin().await.unwrap();
        session.lock_wallet(w.id).await.unwrap();
        session.append_entries(&[entry]).await.unwrap();
        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { .. }));
    }

    #[tokio::test]
    async fn test_control_update_preserves_settled_state() {
        let store = MemoryStore::default();
        let w = wallet();
        store.insert_wallet(&w).await.unwrap();

        // Settlement moves the balance and tip after the admin snapshot
        let mut settled = w.clone();
        settled.balance = Money::new(dec!(1000), Currency::Xof).unwrap();
        settled.ledger_sequence = 1;
        store.update_wallet(&settled).await.unwrap();

        // Stale snapshot, locked: only the control columns may land
        let mut stale = w.clone();
        stale.lock("fraud investigation", "ops", Utc::now());
        store.update_wallet_controls(&stale).await.unwrap();

        let reloaded = store.fetch_wallet(w.id).await.unwrap();
        assert!(reloaded.locked);
        assert_eq!(reloaded.lock_reason.as_deref(), Some("fraud investigation"));
        assert_eq!(
            reloaded.balance,
            Money::new(dec!(1000), Currency::Xof).unwrap()
        );
        assert_eq!(reloaded.ledger_sequence, 1);
    }

    #[tokio::test]
    async fn test_second_live_reversal_rejected() {
        let store = MemoryStore::default();
        let now = Utc::now();
        let original = Transaction::new(
            crate::domain::transaction::TransactionKind::Transfer,
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            Money::new(dec!(100), Currency::Xof).unwrap(),
            Money::zero(Currency::Xof),
            "ORIG-1".to_string(),
            "original".to_string(),
            now,
        );
        store.insert_transaction(&original).await.unwrap();

        let reversal = |reference: &str| {
            let mut tx = Transaction::new(
                crate::domain::transaction::TransactionKind::Reversal,
                original.receiver_wallet,
                original.sender_wallet,
                original.amount,
                Money::zero(Currency::Xof),
                reference.to_string(),
                "undo".to_string(),
                now,
            );
            tx.reversal_of = Some(original.id);
            tx
        };

        store.insert_transaction(&reversal("REV-1")).await.unwrap();
        let err = store.insert_transaction(&reversal("REV-2")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReversal(id) if id == original.id));

        // A failed attempt releases the claim
        let mut dead = store.find_by_reference("REV-1").await.unwrap().unwrap();
        dead.fail("lock wait timed out", now);
        store.update_transaction(&dead).await.unwrap();
        store.insert_transaction(&reversal("REV-3")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::default();
        let mut w = wallet();
        store.insert_wallet(&w).await.unwrap();

        let mut session = store.begin().await.unwrap();
        session.lock_wallet(w.id).await.unwrap();
        w.balance = Money::new(dec!(999), Currency::Xof).unwrap();
        session.store_wallet(&w).await.unwrap();
        session.rollback().await.unwrap();

        let reloaded = store.fetch_wallet(w.id).await.unwrap();
        assert!(reloaded.balance.is_zero());
    }
}
