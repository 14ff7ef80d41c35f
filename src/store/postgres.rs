//! PostgreSQL store
//!
//! Exclusive wallet access maps to `SELECT ... FOR UPDATE` row locks held by
//! one database transaction per session, with a statement-level lock timeout.
//! The unique index on `(wallet_id, sequence_number)` backs the per-wallet
//! chain continuity; the unique index on `reference` backs retry idempotency.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::domain::ledger::{EntryDirection, LedgerEntry, GENESIS_HASH};
use crate::domain::money::{Currency, Money};
use crate::domain::transaction::{Transaction, TransactionKind, TransactionStatus};
use crate::domain::wallet::Wallet;
use crate::fraud::FraudRule;
use crate::reconciliation::{ReconciliationRecord, ReconciliationStatus};

use super::{Store, StoreError, StoreSession};

/// Postgres error code for `lock_timeout` expiry.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    /// Applied as `SET LOCAL lock_timeout` on every session.
    lock_wait_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_wait: std::time::Duration) -> Self {
        Self {
            pool,
            lock_wait_ms: lock_wait.as_millis() as u64,
        }
    }
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

fn constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.constraint().map(|c| c.to_string()),
        _ => None,
    }
}

fn decode_err(message: impl Into<String>) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(message.into().into()))
}

fn money_from_row(row: &PgRow, column: &str, currency: Currency) -> Result<Money, StoreError> {
    let amount: Decimal = row.try_get(column).map_err(StoreError::Database)?;
    Money::new(amount, currency).map_err(|e| decode_err(e.to_string()))
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet, StoreError> {
    let currency: Currency = row
        .try_get::<String, _>("currency")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(|e: crate::domain::money::MoneyError| decode_err(e.to_string()))?;
    Ok(Wallet {
        id: row.try_get("id")?,
        owner_reference: row.try_get("owner_reference")?,
        balance: money_from_row(row, "balance", currency)?,
        currency,
        daily_limit: money_from_row(row, "daily_limit", currency)?,
        monthly_limit: money_from_row(row, "monthly_limit", currency)?,
        daily_spent: money_from_row(row, "daily_spent", currency)?,
        monthly_spent: money_from_row(row, "monthly_spent", currency)?,
        spent_as_of: row.try_get("spent_as_of")?,
        locked: row.try_get("locked")?,
        lock_reason: row.try_get("lock_reason")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        active: row.try_get("active")?,
        ledger_sequence: row.try_get("ledger_sequence")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let currency: Currency = row
        .try_get::<String, _>("currency")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(|e: crate::domain::money::MoneyError| decode_err(e.to_string()))?;
    let kind: TransactionKind = row
        .try_get::<String, _>("kind")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(decode_err)?;
    let status: TransactionStatus = row
        .try_get::<String, _>("status")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(decode_err)?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata = match metadata {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    let fraud_score: i16 = row.try_get("fraud_score")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        kind,
        status,
        sender_wallet: row.try_get("sender_wallet")?,
        receiver_wallet: row.try_get("receiver_wallet")?,
        amount: money_from_row(row, "amount", currency)?,
        fee: money_from_row(row, "fee", currency)?,
        reference: row.try_get("reference")?,
        external_reference: row.try_get("external_reference")?,
        description: row.try_get("description")?,
        fraud_score: fraud_score.clamp(0, 100) as u8,
        flagged_reason: row.try_get("flagged_reason")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        metadata,
        failure_reason: row.try_get("failure_reason")?,
        reversal_of: row.try_get("reversal_of")?,
        reversed_by: row.try_get("reversed_by")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let currency: Currency = row
        .try_get::<String, _>("currency")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(|e: crate::domain::money::MoneyError| decode_err(e.to_string()))?;
    let direction: EntryDirection = row
        .try_get::<String, _>("direction")
        .map_err(StoreError::Database)?
        .parse()
        .map_err(decode_err)?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        transaction_id: row.try_get("transaction_id")?,
        direction,
        amount: money_from_row(row, "amount", currency)?,
        balance_before: money_from_row(row, "balance_before", currency)?,
        balance_after: money_from_row(row, "balance_after", currency)?,
        sequence_number: row.try_get("sequence_number")?,
        created_at: row.try_get("created_at")?,
        content_hash: row.try_get("content_hash")?,
        previous_hash: row.try_get("previous_hash")?,
    })
}

const WALLET_COLUMNS: &str = "id, owner_reference, balance, currency, daily_limit, \
    monthly_limit, daily_spent, monthly_spent, spent_as_of, locked, lock_reason, \
    locked_by, locked_at, active, ledger_sequence, created_at";

const TRANSACTION_COLUMNS: &str = "id, kind, status, sender_wallet, receiver_wallet, \
    amount, currency, fee, reference, external_reference, description, fraud_score, \
    flagged_reason, reviewed_by, reviewed_at, metadata, failure_reason, reversal_of, \
    reversed_by, created_at, completed_at, failed_at";

const ENTRY_COLUMNS: &str = "id, wallet_id, transaction_id, direction, amount, currency, \
    balance_before, balance_after, sequence_number, created_at, content_hash, previous_hash";

const RECONCILIATION_COLUMNS: &str = "date, wallet_id, expected_balance, computed_balance, \
    discrepancy, status, details, end_sequence, end_hash";

fn reconciliation_from_row(row: &PgRow) -> Result<ReconciliationRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status: ReconciliationStatus =
        serde_json::from_value(serde_json::Value::String(status))?;
    Ok(ReconciliationRecord {
        date: row.try_get("date")?,
        wallet_id: row.try_get("wallet_id")?,
        expected_balance: row.try_get("expected_balance")?,
        computed_balance: row.try_get("computed_balance")?,
        discrepancy: row.try_get("discrepancy")?,
        status,
        details: row.try_get("details")?,
        end_sequence: row.try_get("end_sequence")?,
        end_hash: row.try_get("end_hash")?,
    })
}

async fn upsert_transaction<'e, E>(executor: E, tx: &Transaction) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let metadata = serde_json::Value::Object(tx.metadata.clone());
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, kind, status, sender_wallet, receiver_wallet, amount, currency, fee,
            reference, external_reference, description, fraud_score, flagged_reason,
            reviewed_by, reviewed_at, metadata, failure_reason, reversal_of,
            reversed_by, created_at, completed_at, failed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21, $22)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            fraud_score = EXCLUDED.fraud_score,
            flagged_reason = EXCLUDED.flagged_reason,
            reviewed_by = EXCLUDED.reviewed_by,
            reviewed_at = EXCLUDED.reviewed_at,
            metadata = EXCLUDED.metadata,
            failure_reason = EXCLUDED.failure_reason,
            reversed_by = EXCLUDED.reversed_by,
            completed_at = EXCLUDED.completed_at,
            failed_at = EXCLUDED.failed_at
        "#,
    )
    .bind(tx.id)
    .bind(tx.kind.as_str())
    .bind(tx.status.as_str())
    .bind(tx.sender_wallet)
    .bind(tx.receiver_wallet)
    .bind(tx.amount.amount())
    .bind(tx.amount.currency().code())
    .bind(tx.fee.amount())
    .bind(&tx.reference)
    .bind(&tx.external_reference)
    .bind(&tx.description)
    .bind(tx.fraud_score as i16)
    .bind(&tx.flagged_reason)
    .bind(&tx.reviewed_by)
    .bind(tx.reviewed_at)
    .bind(&metadata)
    .bind(&tx.failure_reason)
    .bind(tx.reversal_of)
    .bind(tx.reversed_by)
    .bind(tx.created_at)
    .bind(tx.completed_at)
    .bind(tx.failed_at)
    .execute(executor)
    .await
    .map_err(|err| {
        if db_code(&err).as_deref() == Some(UNIQUE_VIOLATION) {
            match constraint(&err).as_deref() {
                Some("transactions_reference_key") => {
                    return StoreError::DuplicateReference(tx.reference.clone());
                }
                Some("transactions_live_reversal_key") => {
                    if let Some(original) = tx.reversal_of {
                        return StoreError::DuplicateReversal(original);
                    }
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    })?;
    Ok(())
}

async fn update_wallet_row<'e, E>(executor: E, wallet: &Wallet) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let updated = sqlx::query(
        r#"
        UPDATE wallets SET
            balance = $2, daily_spent = $3, monthly_spent = $4, spent_as_of = $5,
            locked = $6, lock_reason = $7, locked_by = $8, locked_at = $9,
            active = $10, ledger_sequence = $11
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(wallet.balance.amount())
    .bind(wallet.daily_spent.amount())
    .bind(wallet.monthly_spent.amount())
    .bind(wallet.spent_as_of)
    .bind(wallet.locked)
    .bind(&wallet.lock_reason)
    .bind(&wallet.locked_by)
    .bind(wallet.locked_at)
    .bind(wallet.active)
    .bind(wallet.ledger_sequence)
    .execute(executor)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::WalletNotFound(wallet.id));
    }
    Ok(())
}

impl Store for PgStore {
    type Session = PgSession;

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        let mut tx = self.pool.begin().await?;
        // LOCAL scopes the timeout to this transaction.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_wait_ms))
            .execute(&mut *tx)
            .await?;
        Ok(PgSession { tx })
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (
                id, owner_reference, balance, currency, daily_limit, monthly_limit,
                daily_spent, monthly_spent, spent_as_of, locked, lock_reason,
                locked_by, locked_at, active, ledger_sequence, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(wallet.id)
        .bind(&wallet.owner_reference)
        .bind(wallet.balance.amount())
        .bind(wallet.currency.code())
        .bind(wallet.daily_limit.amount())
        .bind(wallet.monthly_limit.amount())
        .bind(wallet.daily_spent.amount())
        .bind(wallet.monthly_spent.amount())
        .bind(wallet.spent_as_of)
        .bind(wallet.locked)
        .bind(&wallet.lock_reason)
        .bind(&wallet.locked_by)
        .bind(wallet.locked_at)
        .bind(wallet.active)
        .bind(wallet.ledger_sequence)
        .bind(wallet.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if db_code(&err).as_deref() == Some(UNIQUE_VIOLATION) {
                StoreError::DuplicateWallet {
                    owner: wallet.owner_reference.clone(),
                    currency: wallet.currency,
                }
            } else {
                StoreError::Database(err)
            }
        })?;
        Ok(())
    }

    async fn fetch_wallet(&self, id: Uuid) -> Result<Wallet, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::WalletNotFound(id))?;
        wallet_from_row(&row)
    }

    async fn find_wallet(
        &self,
        owner_reference: &str,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE owner_reference = $1 AND currency = $2"
        ))
        .bind(owner_reference)
        .bind(currency.code())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn update_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        update_wallet_row(&self.pool, wallet).await
    }

    async fn update_wallet_controls(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE wallets SET
                locked = $2, lock_reason = $3, locked_by = $4, locked_at = $5,
                active = $6
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.locked)
        .bind(&wallet.lock_reason)
        .bind(&wallet.locked_by)
        .bind(wallet.locked_at)
        .bind(wallet.active)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::WalletNotFound(wallet.id));
        }
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        upsert_transaction(&self.pool, tx).await
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        upsert_transaction(&self.pool, tx).await
    }

    async fn fetch_transaction(&self, id: Uuid) -> Result<Transaction, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::TransactionNotFound(id))?;
        transaction_from_row(&row)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn outgoing_since(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE sender_wallet = $1 AND created_at >= $2 \
               AND status IN ('COMPLETED', 'PROCESSING') \
             ORDER BY created_at ASC"
        ))
        .bind(wallet_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn completed_outgoing_count(&self, wallet_id: Uuid) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions \
             WHERE sender_wallet = $1 AND status = 'COMPLETED'",
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn average_completed_amount(
        &self,
        wallet_id: Uuid,
    ) -> Result<Option<Decimal>, StoreError> {
        let average: Option<Decimal> = sqlx::query_scalar(
            "SELECT AVG(amount) FROM transactions \
             WHERE sender_wallet = $1 AND status = 'COMPLETED'",
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(average)
    }

    async fn active_rules(&self) -> Result<Vec<FraudRule>, StoreError> {
        let rows: Vec<(Uuid, String, serde_json::Value, i16, bool)> = sqlx::query_as(
            "SELECT id, name, parameters, weight, active FROM fraud_rules \
             WHERE active ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(id, name, parameters, weight, active)| {
                let kind = serde_json::from_value(parameters)?;
                Ok(FraudRule {
                    id,
                    name,
                    kind,
                    weight: weight.clamp(0, 100) as u8,
                    active,
                })
            })
            .collect()
    }

    async fn upsert_rule(&self, rule: &FraudRule) -> Result<(), StoreError> {
        let parameters = serde_json::to_value(&rule.kind)?;
        sqlx::query(
            r#"
            INSERT INTO fraud_rules (id, name, parameters, weight, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                parameters = EXCLUDED.parameters,
                weight = EXCLUDED.weight,
                active = EXCLUDED.active
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&parameters)
        .bind(rule.weight as i16)
        .bind(rule.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn entries_after(
        &self,
        wallet_id: Uuid,
        after: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE wallet_id = $1 AND sequence_number > $2 \
             ORDER BY sequence_number ASC LIMIT $3"
        ))
        .bind(wallet_id)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE transaction_id = $1 ORDER BY created_at ASC"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn wallets_with_activity(
        &self,
        date: NaiveDate,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT wallet_id FROM ledger_entries \
             WHERE created_at::date = $1 AND created_at < $2 \
             ORDER BY wallet_id",
        )
        .bind(date)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn save_reconciliation_records(
        &self,
        records: &[ReconciliationRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            let status = serde_json::to_value(record.status)?;
            let status = status.as_str().unwrap_or("ERROR").to_string();
            sqlx::query(
                r#"
                INSERT INTO reconciliation_records (
                    date, wallet_id, expected_balance, computed_balance,
                    discrepancy, status, details, end_sequence, end_hash
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (date, wallet_id) DO UPDATE SET
                    expected_balance = EXCLUDED.expected_balance,
                    computed_balance = EXCLUDED.computed_balance,
                    discrepancy = EXCLUDED.discrepancy,
                    status = EXCLUDED.status,
                    details = EXCLUDED.details,
                    end_sequence = EXCLUDED.end_sequence,
                    end_hash = EXCLUDED.end_hash
                "#,
            )
            .bind(record.date)
            .bind(record.wallet_id)
            .bind(record.expected_balance)
            .bind(record.computed_balance)
            .bind(record.discrepancy)
            .bind(status)
            .bind(&record.details)
            .bind(record.end_sequence)
            .bind(&record.end_hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reconciliation_records(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ReconciliationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_records \
             WHERE date = $1 ORDER BY wallet_id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reconciliation_from_row).collect()
    }

    async fn latest_reconciliation(
        &self,
        wallet_id: Uuid,
        before: NaiveDate,
    ) -> Result<Option<ReconciliationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_records \
             WHERE wallet_id = $1 AND date < $2 ORDER BY date DESC LIMIT 1"
        ))
        .bind(wallet_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reconciliation_from_row).transpose()
    }
}

pub struct PgSession {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl StoreSession for PgSession {
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Wallet, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| {
            if db_code(&err).as_deref() == Some(LOCK_NOT_AVAILABLE) {
                StoreError::LockTimeout { wallet_id: id }
            } else {
                StoreError::Database(err)
            }
        })?
        .ok_or(StoreError::WalletNotFound(id))?;
        wallet_from_row(&row)
    }

    async fn ledger_tip(&mut self, wallet_id: Uuid) -> Result<(i64, String), StoreError> {
        let tip: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_number, content_hash FROM ledger_entries \
             WHERE wallet_id = $1 ORDER BY sequence_number DESC LIMIT 1",
        )
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(tip.unwrap_or_else(|| (0, GENESIS_HASH.to_string())))
    }

    async fn append_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    id, wallet_id, transaction_id, direction, amount, currency,
                    balance_before, balance_after, sequence_number, created_at,
                    content_hash, previous_hash
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id)
            .bind(entry.wallet_id)
            .bind(entry.transaction_id)
            .bind(entry.direction.as_str())
            .bind(entry.amount.amount())
            .bind(entry.amount.currency().code())
            .bind(entry.balance_before.amount())
            .bind(entry.balance_after.amount())
            .bind(entry.sequence_number)
            .bind(entry.created_at)
            .bind(entry.content_hash.clone())
            .bind(entry.previous_hash.clone())
            .execute(&mut *self.tx)
            .await
            .map_err(|err| {
                // Row locks make this a backstop; a violation means the tip
                // moved between read and write.
                if db_code(&err).as_deref() == Some(UNIQUE_VIOLATION) {
                    StoreError::SequenceConflict {
                        wallet_id: entry.wallet_id,
                        expected: entry.sequence_number,
                        actual: entry.sequence_number,
                    }
                } else {
                    StoreError::Database(err)
                }
            })?;
        }
        Ok(())
    }

    async fn store_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        update_wallet_row(&mut *self.tx, wallet).await
    }

    async fn store_transaction(&mut self, tx: &Transaction) -> Result<(), StoreError> {
        upsert_transaction(&mut *self.tx, tx).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
