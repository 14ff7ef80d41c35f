//! Daily reconciliation
//!
//! Replays each active wallet's hash-chained ledger, verifies every link,
//! and compares the computed balance against the stored wallet balance and,
//! when configured, an external provider statement. Each record carries the
//! verified chain tip it ended on, so the next day's pass resumes from there
//! instead of replaying the whole history; a wallet with no usable
//! checkpoint replays from genesis. Produces one deterministic record per
//! `(date, wallet)` pair; re-running a day upserts byte-identical records
//! when the underlying data has not changed.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::ledger::ChainVerifier;
use crate::error::EngineResult;
use crate::store::{EntryCursor, Store};

/// Outcome class for one wallet-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    /// Replayed balance matches the stored balance (and the provider, when
    /// one is configured).
    Matched,
    /// Balances disagree; `discrepancy` carries the signed difference.
    Mismatched,
    /// The chain itself failed verification; balances are not comparable.
    Error,
}

/// One wallet's reconciliation result for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub date: NaiveDate,
    pub wallet_id: Uuid,
    /// Stored wallet balance at replay time.
    pub expected_balance: Decimal,
    /// Balance obtained by replaying the ledger chain.
    pub computed_balance: Decimal,
    /// `computed - expected`; zero when matched.
    pub discrepancy: Decimal,
    pub status: ReconciliationStatus,
    pub details: String,
    /// Last verified ledger `(sequence, content_hash)` tip. The next run
    /// resumes here unless this record is an [`ReconciliationStatus::Error`].
    pub end_sequence: i64,
    pub end_hash: String,
}

/// External statement source compared against the internal ledger. The
/// default deployment has none and reconciles internally only.
#[allow(async_fn_in_trait)]
pub trait ProviderLedger: Send + Sync {
    /// Provider-side balance for a wallet at end of `date`, `None` when the
    /// provider has no statement for it.
    async fn statement_balance(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
    ) -> EngineResult<Option<Decimal>>;
}

/// Provider that never has a statement; internal-only reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProvider;

impl ProviderLedger for NoProvider {
    async fn statement_balance(
        &self,
        _wallet_id: Uuid,
        _date: NaiveDate,
    ) -> EngineResult<Option<Decimal>> {
        Ok(None)
    }
}

/// Runs the daily pass over a [`Store`].
pub struct Reconciler<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Reconcile every wallet with ledger activity on `date`, persist the
    /// records, and return them sorted by wallet id.
    ///
    /// The cutoff is fixed at the start of the run: entries appended after
    /// it belong to the next pass, so a re-run over settled data reproduces
    /// the same records.
    pub async fn reconcile_daily<P: ProviderLedger>(
        &self,
        date: NaiveDate,
        provider: &P,
    ) -> EngineResult<Vec<ReconciliationRecord>> {
        let cutoff = Utc::now();
        let mut wallet_ids = self.store.wallets_with_activity(date, cutoff).await?;
        wallet_ids.sort();
        info!(%date, wallets = wallet_ids.len(), "starting daily reconciliation");

        let mut records = Vec::with_capacity(wallet_ids.len());
        for wallet_id in wallet_ids {
            let record = self.reconcile_wallet(wallet_id, date, cutoff, provider).await?;
            if record.status != ReconciliationStatus::Matched {
                warn!(
                    %wallet_id,
                    status = ?record.status,
                    discrepancy = %record.discrepancy,
                    "reconciliation anomaly"
                );
            }
            records.push(record);
        }

        self.store.save_reconciliation_records(&records).await?;
        info!(
            %date,
            matched = records
                .iter()
                .filter(|r| r.status == ReconciliationStatus::Matched)
                .count(),
            total = records.len(),
            "daily reconciliation finished"
        );
        Ok(records)
    }

    async fn reconcile_wallet<P: ProviderLedger>(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
        cutoff: DateTime<Utc>,
        provider: &P,
    ) -> EngineResult<ReconciliationRecord> {
        let wallet = self.store.fetch_wallet(wallet_id).await?;
        let expected = wallet.balance.amount();

        // Resume from the last clean checkpoint; a wallet without one (or
        // whose last record was an Error) replays from genesis. Any chain
        // fault halts this wallet.
        let checkpoint = self
            .store
            .latest_reconciliation(wallet_id, date)
            .await?
            .filter(|r| r.status != ReconciliationStatus::Error);
        let (mut verifier, mut computed) = match checkpoint {
            Some(cp) => (
                ChainVerifier::resume(cp.end_sequence, cp.end_hash),
                cp.computed_balance,
            ),
            None => (ChainVerifier::new(), Decimal::ZERO),
        };
        let mut cursor = EntryCursor::new(self.store, wallet_id, verifier.tip().0);
        while let Some(entry) = cursor.next().await? {
            if entry.created_at >= cutoff {
                break;
            }
            if let Err(fault) = verifier.check(&entry) {
                let (end_sequence, end_hash) = verifier.tip();
                return Ok(ReconciliationRecord {
                    date,
                    wallet_id,
                    expected_balance: expected,
                    computed_balance: computed,
                    discrepancy: Decimal::ZERO,
                    status: ReconciliationStatus::Error,
                    details: format!(
                        "chain verification failed at sequence {}: {}",
                        entry.sequence_number, fault
                    ),
                    end_sequence,
                    end_hash: end_hash.to_string(),
                });
            }
            computed = entry.balance_after.amount();
        }

        let mut status = if computed == expected {
            ReconciliationStatus::Matched
        } else {
            ReconciliationStatus::Mismatched
        };
        let mut details = format!("{} entries replayed", verifier.entries_checked());

        if status == ReconciliationStatus::Matched {
            if let Some(statement) = provider.statement_balance(wallet_id, date).await? {
                if statement != computed {
                    status = ReconciliationStatus::Mismatched;
                    details = format!(
                        "provider statement {} disagrees with ledger {}",
                        statement, computed
                    );
                }
            }
        }

        let (end_sequence, end_hash) = verifier.tip();
        Ok(ReconciliationRecord {
            date,
            wallet_id,
            expected_balance: expected,
            computed_balance: computed,
            discrepancy: computed - expected,
            status,
            details,
            end_sequence,
            end_hash: end_hash.to_string(),
        })
    }
}

impl ReconciliationRecord {
    pub fn is_clean(&self) -> bool {
        self.status == ReconciliationStatus::Matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_serialization_is_stable() {
        let record = ReconciliationRecord {
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            wallet_id: Uuid::nil(),
            expected_balance: dec!(1000.00),
            computed_balance: dec!(1000.00),
            discrepancy: dec!(0.00),
            status: ReconciliationStatus::Matched,
            details: "4 entries replayed".to_string(),
            end_sequence: 4,
            end_hash: "a".repeat(64),
        };
        let first = serde_json::to_string(&record).unwrap();
        let second = serde_json::to_string(&record).unwrap();
        assert_eq!(first, second);
        let back: ReconciliationRecord = serde_json::from_str(&first).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_discrepancy_sign() {
        let record = ReconciliationRecord {
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            wallet_id: Uuid::nil(),
            expected_balance: dec!(900.00),
            computed_balance: dec!(1000.00),
            discrepancy: dec!(1000.00) - dec!(900.00),
            status: ReconciliationStatus::Mismatched,
            details: String::new(),
            end_sequence: 2,
            end_hash: "b".repeat(64),
        };
        assert_eq!(record.discrepancy, dec!(100.00));
        assert!(!record.is_clean());
    }
}
