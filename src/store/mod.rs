//! Storage seam
//!
//! The engine talks to its durable backend through the [`Store`] and
//! [`StoreSession`] traits. A session is one all-or-nothing commit unit: it
//! hands out exclusive per-wallet access (bounded by a lock timeout), stages
//! wallet/ledger/transaction writes, and either commits them together or
//! discards them. Two backends ship with the crate: [`PgStore`] over
//! PostgreSQL row locks, and [`MemoryStore`] over per-wallet async mutexes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::ledger::LedgerEntry;
use crate::domain::money::Currency;
use crate::domain::transaction::Transaction;
use crate::domain::wallet::Wallet;
use crate::fraud::FraudRule;
use crate::reconciliation::ReconciliationRecord;

/// Errors from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Timed out waiting for lock on wallet {wallet_id}")]
    LockTimeout { wallet_id: Uuid },

    /// Optimistic sequence guard on ledger appends: the expected tip did not
    /// match the store's current tip.
    #[error("Sequence conflict on wallet {wallet_id}: expected {expected}, found {actual}")]
    SequenceConflict {
        wallet_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Duplicate transaction reference: {0}")]
    DuplicateReference(String),

    /// At most one live reversal may point at a transaction; failed,
    /// cancelled, and rejected attempts do not count.
    #[error("Transaction {0} already has a reversal in flight")]
    DuplicateReversal(Uuid),

    #[error("Wallet already exists for owner {owner} in {currency}")]
    DuplicateWallet { owner: String, currency: Currency },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout { .. }
                | StoreError::SequenceConflict { .. }
                | StoreError::Database(_)
        )
    }
}

/// Durable backend for wallets, transactions, ledger entries, fraud rules,
/// and reconciliation records.
#[allow(async_fn_in_trait)]
pub trait Store: Send + Sync {
    type Session: StoreSession;

    /// Open a commit unit. Exclusive wallet access is acquired through the
    /// session and held until commit or rollback.
    async fn begin(&self) -> Result<Self::Session, StoreError>;

    // Wallets (non-exclusive reads, administrative writes)

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError>;
    async fn fetch_wallet(&self, id: Uuid) -> Result<Wallet, StoreError>;
    async fn find_wallet(
        &self,
        owner_reference: &str,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError>;
    /// Full-row write inside reconciliation tooling and tests; settlement
    /// writes go through [`StoreSession::store_wallet`] instead.
    async fn update_wallet(&self, wallet: &Wallet) -> Result<(), StoreError>;

    /// Write only the administrative columns (lock state, `active`), leaving
    /// balance, spent counters, and the ledger tip cache untouched so an
    /// admin action can never clobber a concurrent settlement.
    async fn update_wallet_controls(&self, wallet: &Wallet) -> Result<(), StoreError>;

    // Transactions

    /// Insert a new transaction; enforces the unique `reference`.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;
    /// Status/metadata updates outside the commit path (fraud verdicts,
    /// failures, cancellations, review marks).
    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn fetch_transaction(&self, id: Uuid) -> Result<Transaction, StoreError>;
    async fn find_by_reference(&self, reference: &str)
        -> Result<Option<Transaction>, StoreError>;

    /// Outgoing transactions of a wallet created at or after `since`, in
    /// COMPLETED or PROCESSING status. Fraud velocity input.
    async fn outgoing_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// All-time count of COMPLETED outgoing transactions of a wallet.
    async fn completed_outgoing_count(&self, wallet_id: Uuid) -> Result<u64, StoreError>;

    /// All-time average COMPLETED outgoing amount, `None` without history.
    async fn average_completed_amount(
        &self,
        wallet_id: Uuid,
    ) -> Result<Option<rust_decimal::Decimal>, StoreError>;

    // Fraud rules (administrator-managed, read-only to the engine)

    async fn active_rules(&self) -> Result<Vec<FraudRule>, StoreError>;
    async fn upsert_rule(&self, rule: &FraudRule) -> Result<(), StoreError>;

    // Ledger reads

    /// Page of entries with `sequence_number > after`, ordered ascending.
    async fn entries_after(
        &self,
        wallet_id: Uuid,
        after: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn entries_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    // Reconciliation

    /// Wallets having at least one ledger entry on `date`, considering only
    /// entries created strictly before `cutoff` (avoids in-flight reads).
    async fn wallets_with_activity(
        &self,
        date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Upsert records keyed by `(date, wallet_id)`; a re-run supersedes.
    async fn save_reconciliation_records(
        &self,
        records: &[ReconciliationRecord],
    ) -> Result<(), StoreError>;

    async fn reconciliation_records(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ReconciliationRecord>, StoreError>;

    /// Most recent reconciliation record of a wallet strictly before `date`,
    /// used as a verified replay checkpoint.
    async fn latest_reconciliation(
        &self,
        wallet_id: Uuid,
        before: NaiveDate,
    ) -> Result<Option<ReconciliationRecord>, StoreError>;
}

/// One all-or-nothing commit unit with exclusive wallet access.
///
/// Dropping a session without calling [`commit`](Self::commit) discards all
/// staged writes and releases the locks; every exit path, including errors,
/// releases access.
#[allow(async_fn_in_trait)]
pub trait StoreSession: Send {
    /// Acquire exclusive access to a wallet and return its current state.
    /// Callers lock multiple wallets in ascending id order; the wait is
    /// bounded and fails with [`StoreError::LockTimeout`].
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Wallet, StoreError>;

    /// Current ledger tip of a locked wallet: `(sequence, content_hash)`,
    /// `(0, GENESIS_HASH)` for an empty chain.
    async fn ledger_tip(&mut self, wallet_id: Uuid) -> Result<(i64, String), StoreError>;

    /// Stage appends. Entries must continue each wallet's chain; the store
    /// re-checks the tip at commit and fails with
    /// [`StoreError::SequenceConflict`] if it moved.
    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), StoreError>;

    /// Stage a wallet update (balance, spent counters, ledger tip cache).
    async fn store_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;

    /// Stage a transaction update committed atomically with the above.
    async fn store_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Lazy, finite, restartable reader over a wallet's ledger.
///
/// Pulls fixed-size pages through [`Store::entries_after`]; restarting from
/// any sequence number is just constructing a new cursor.
pub struct EntryCursor<'a, S: Store> {
    store: &'a S,
    wallet_id: Uuid,
    after: i64,
    page_size: usize,
    buffer: std::collections::VecDeque<LedgerEntry>,
    exhausted: bool,
}

impl<'a, S: Store> EntryCursor<'a, S> {
    pub const DEFAULT_PAGE_SIZE: usize = 256;

    pub fn new(store: &'a S, wallet_id: Uuid, after: i64) -> Self {
        Self::with_page_size(store, wallet_id, after, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: &'a S, wallet_id: Uuid, after: i64, page_size: usize) -> Self {
        Self {
            store,
            wallet_id,
            after,
            page_size: page_size.max(1),
            buffer: std::collections::VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next entry in sequence order, or `None` at the end of the chain.
    pub async fn next(&mut self) -> Result<Option<LedgerEntry>, StoreError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .store
                .entries_after(self.wallet_id, self.after, self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.after = last.sequence_number;
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }
}
