//! Wallet administration
//!
//! Creation, balance queries, administrative lock/unlock, deactivation, and
//! on-demand ledger chain verification. These writes bypass the settlement
//! session: they never touch balances or the ledger.

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::context::OperationContext;
use crate::domain::events::DomainEvent;
use crate::domain::ledger::ChainVerifier;
use crate::domain::wallet::{BalanceSummary, Wallet};
use crate::error::{EngineError, EngineResult};
use crate::store::{EntryCursor, Store};

use super::Engine;

impl<S: Store> Engine<S> {
    /// Open a wallet for an owner in the configured base currency. One
    /// wallet per owner and currency.
    pub async fn create_wallet(&self, owner_reference: &str) -> EngineResult<Wallet> {
        self.owners.verify(owner_reference)?;
        let config = self.config();
        let wallet = Wallet::new(
            owner_reference,
            config.base_currency,
            config.default_daily_limit(),
            config.default_monthly_limit(),
            Utc::now(),
        );
        self.store.insert_wallet(&wallet).await?;
        info!(wallet_id = %wallet.id, owner = owner_reference, "wallet created");
        Ok(wallet)
    }

    pub async fn wallet(&self, wallet_id: Uuid) -> EngineResult<Wallet> {
        Ok(self.store.fetch_wallet(wallet_id).await?)
    }

    /// Balance and remaining limit headroom as of `as_of`, applying the
    /// daily/monthly reset rule without mutating stored counters.
    pub async fn balance(
        &self,
        wallet_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> EngineResult<BalanceSummary> {
        let wallet = self.store.fetch_wallet(wallet_id).await?;
        BalanceSummary::of(&wallet, as_of)
    }

    /// Administrative lock. In-flight transactions finish; new ones are
    /// rejected until unlock.
    pub async fn lock_wallet(
        &self,
        wallet_id: Uuid,
        reason: &str,
        ctx: &OperationContext,
    ) -> EngineResult<Wallet> {
        let mut wallet = self.store.fetch_wallet(wallet_id).await?;
        let actor = ctx.actor.clone().unwrap_or_else(|| "system".to_string());
        let now = Utc::now();
        wallet.lock(reason, actor.clone(), now);
        // Control columns only, so a settlement committing between the
        // fetch and this write keeps its balance and ledger tip.
        self.store.update_wallet_controls(&wallet).await?;
        info!(%wallet_id, reason, actor, "wallet locked");
        self.notifier.dispatch(&DomainEvent::WalletLocked {
            wallet_id,
            reason: reason.to_string(),
            actor,
            locked_at: now,
        });
        Ok(wallet)
    }

    pub async fn unlock_wallet(&self, wallet_id: Uuid) -> EngineResult<Wallet> {
        let mut wallet = self.store.fetch_wallet(wallet_id).await?;
        wallet.unlock();
        self.store.update_wallet_controls(&wallet).await?;
        info!(%wallet_id, "wallet unlocked");
        Ok(wallet)
    }

    /// Soft deactivation; the wallet and its ledger remain queryable.
    pub async fn deactivate_wallet(&self, wallet_id: Uuid) -> EngineResult<Wallet> {
        let mut wallet = self.store.fetch_wallet(wallet_id).await?;
        wallet.deactivate();
        self.store.update_wallet_controls(&wallet).await?;
        info!(%wallet_id, "wallet deactivated");
        Ok(wallet)
    }

    /// Verify the wallet's entire hash chain from genesis. Returns the
    /// number of entries checked; a violation is never repaired, only
    /// reported.
    pub async fn verify_ledger_integrity(&self, wallet_id: Uuid) -> EngineResult<u64> {
        let mut verifier = ChainVerifier::new();
        let mut cursor = EntryCursor::new(&self.store, wallet_id, 0);
        while let Some(entry) = cursor.next().await? {
            if let Err(fault) = verifier.check(&entry) {
                error!(%wallet_id, sequence = entry.sequence_number, %fault, "chain violation");
                return Err(EngineError::ChainIntegrity {
                    wallet_id,
                    detail: fault.to_string(),
                });
            }
        }
        Ok(verifier.entries_checked())
    }
}
