//! Concurrency behavior: ordered locking, bounded lock waits, and balance
//! conservation under parallel load.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use wallet_engine::{
    Currency, Engine, EngineConfig, EngineError, MemoryStore, Money, NullNotifier,
    OperationContext, Store, StoreSession, TransactionRequest,
};

mod common;
use common::{funded_wallet, xof};

fn engine_over(store: MemoryStore) -> Engine<MemoryStore> {
    common::init_tracing();
    Engine::new(store, EngineConfig::default()).with_notifier(Arc::new(NullNotifier))
}

#[tokio::test]
async fn test_opposite_transfers_do_not_deadlock() {
    let engine = Arc::new(engine_over(MemoryStore::new(Duration::from_millis(500))));
    let a = funded_wallet(&engine, "alice", xof(dec!(10000))).await;
    let b = funded_wallet(&engine, "bob", xof(dec!(10000))).await;

    let ab = {
        let engine = Arc::clone(&engine);
        let (a, b) = (a.id, b.id);
        tokio::spawn(async move {
            engine
                .execute(
                    TransactionRequest::transfer(a, b, xof(dec!(300))),
                    &OperationContext::new(),
                )
                .await
        })
    };
    let ba = {
        let engine = Arc::clone(&engine);
        let (a, b) = (a.id, b.id);
        tokio::spawn(async move {
            engine
                .execute(
                    TransactionRequest::transfer(b, a, xof(dec!(200))),
                    &OperationContext::new(),
                )
                .await
        })
    };

    // Ascending-id lock order makes both complete within the bounded wait.
    ab.await.unwrap().unwrap();
    ba.await.unwrap().unwrap();

    assert_eq!(engine.wallet(a.id).await.unwrap().balance, xof(dec!(9900)));
    assert_eq!(engine.wallet(b.id).await.unwrap().balance, xof(dec!(10100)));
}

#[tokio::test]
async fn test_lock_timeout_fails_cleanly() {
    let store = MemoryStore::new(Duration::from_millis(50));
    let engine = engine_over(store.clone());
    let a = funded_wallet(&engine, "alice", xof(dec!(10000))).await;
    let b = funded_wallet(&engine, "bob", Money::zero(Currency::Xof)).await;

    // Hold exclusive access to the sender out-of-band
    let mut blocker = store.begin().await.unwrap();
    blocker.lock_wallet(a.id).await.unwrap();

    let err = engine
        .execute(
            TransactionRequest::transfer(a.id, b.id, xof(dec!(100)))
                .with_reference("STUCK-1"),
            &OperationContext::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout { .. }));
    assert!(err.is_transient());
    blocker.rollback().await.unwrap();

    // Nothing moved; a fresh reference retries successfully
    assert_eq!(engine.wallet(a.id).await.unwrap().balance, xof(dec!(10000)));
    engine
        .execute(
            TransactionRequest::transfer(a.id, b.id, xof(dec!(100))),
            &OperationContext::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transient_failure_retries_under_same_reference() {
    let store = MemoryStore::new(Duration::from_millis(50));
    let engine = engine_over(store.clone());
    let a = funded_wallet(&engine, "alice", xof(dec!(10000))).await;
    let b = funded_wallet(&engine, "bob", Money::zero(Currency::Xof)).await;

    let mut blocker = store.begin().await.unwrap();
    blocker.lock_wallet(a.id).await.unwrap();

    let request = TransactionRequest::transfer(a.id, b.id, xof(dec!(100)))
        .with_reference("RETRY-1");
    let err = engine
        .execute(request.clone(), &OperationContext::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    blocker.rollback().await.unwrap();

    // Same reference, lock released: the failed record re-processes
    let retried = engine
        .execute(request.clone(), &OperationContext::new())
        .await
        .unwrap();
    assert_eq!(retried.reference, "RETRY-1");
    assert!(retried.completed_at.is_some());
    assert_eq!(engine.wallet(b.id).await.unwrap().balance, xof(dec!(100)));

    // A third submission is a pure dedupe: funds move exactly once
    let deduped = engine
        .execute(request, &OperationContext::new())
        .await
        .unwrap();
    assert_eq!(deduped.id, retried.id);
    assert_eq!(engine.wallet(b.id).await.unwrap().balance, xof(dec!(100)));
}

#[tokio::test]
async fn test_concurrent_reversals_apply_once() {
    let engine = Arc::new(engine_over(MemoryStore::new(Duration::from_millis(2000))));
    let a = funded_wallet(&engine, "alice", xof(dec!(10000))).await;
    let b = funded_wallet(&engine, "bob", Money::zero(Currency::Xof)).await;

    let original = engine
        .execute(
            TransactionRequest::transfer(a.id, b.id, xof(dec!(4000))),
            &OperationContext::new(),
        )
        .await
        .unwrap();

    let spawn_reverse = |engine: Arc<Engine<MemoryStore>>, id| {
        tokio::spawn(async move { engine.reverse(id, &OperationContext::new()).await })
    };
    let first = spawn_reverse(Arc::clone(&engine), original.id);
    let second = spawn_reverse(Arc::clone(&engine), original.id);
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(err, EngineError::AlreadyReversed(_)));
        }
    }

    // The amount moved back exactly once
    assert_eq!(engine.wallet(a.id).await.unwrap().balance, xof(dec!(10000)));
    assert_eq!(engine.wallet(b.id).await.unwrap().balance, Money::zero(Currency::Xof));
    let original = engine.transaction(original.id).await.unwrap();
    assert!(original.reversed_by.is_some());
}

#[tokio::test]
async fn test_parallel_spends_conserve_money_and_sequence() {
    let engine = Arc::new(engine_over(MemoryStore::new(Duration::from_millis(2000))));
    let a = funded_wallet(&engine, "alice", xof(dec!(10000))).await;
    let b = funded_wallet(&engine, "bob", Money::zero(Currency::Xof)).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let (a, b) = (a.id, b.id);
        handles.push(tokio::spawn(async move {
            engine
                .execute(
                    TransactionRequest::transfer(a, b, xof(dec!(500))),
                    &OperationContext::new(),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let a = engine.wallet(a.id).await.unwrap();
    let b = engine.wallet(b.id).await.unwrap();
    assert_eq!(a.balance, xof(dec!(8000)));
    assert_eq!(b.balance, xof(dec!(2000)));

    // One seed credit plus four debits, contiguous and hash-linked
    assert_eq!(engine.verify_ledger_integrity(a.id).await.unwrap(), 5);
    assert_eq!(a.ledger_sequence, 5);
    assert_eq!(b.ledger_sequence, 4);
}
