//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;

use wallet_engine::{
    Currency, Engine, EngineConfig, MemoryStore, Money, NullNotifier, OperationContext,
    TransactionRequest, Wallet,
};

pub fn xof(value: Decimal) -> Money {
    Money::new(value, Currency::Xof).expect("valid test amount")
}

/// Route engine logs through the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine over a fresh in-memory store with default configuration and a
/// silent notifier.
pub fn engine() -> Engine<MemoryStore> {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> Engine<MemoryStore> {
    init_tracing();
    Engine::new(MemoryStore::default(), config).with_notifier(Arc::new(NullNotifier))
}

/// Create a wallet and fund it through a deposit.
pub async fn funded_wallet(
    engine: &Engine<MemoryStore>,
    owner: &str,
    balance: Money,
) -> Wallet {
    let wallet = engine.create_wallet(owner).await.expect("create wallet");
    if balance.is_positive() {
        engine
            .execute(
                TransactionRequest::deposit(wallet.id, balance),
                &OperationContext::new(),
            )
            .await
            .expect("seed deposit");
    }
    engine.wallet(wallet.id).await.expect("reload wallet")
}
