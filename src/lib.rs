//! Wallet Ledger & Transaction Engine
//!
//! Append-only, hash-chained double-entry ledger with wallet balance
//! projections, a rule-based fraud engine, a transaction state machine, and
//! daily reconciliation, over pluggable in-memory or PostgreSQL storage.

pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fraud;
pub mod notify;
pub mod reconciliation;
pub mod store;

pub use config::{EngineConfig, FraudConfig};
pub use domain::{
    BalanceSummary, ChainFault, ChainVerifier, Currency, EntryDirection, FeePolicy, GeoPoint,
    LedgerEntry, LimitWindow, Money, MoneyError, OperationContext, Transaction, TransactionKind,
    TransactionStatus, Wallet, GENESIS_HASH,
};
pub use engine::{Engine, OpenDirectory, OwnerDirectory, TransactionRequest};
pub use error::{EngineError, EngineResult};
pub use fraud::{FraudAction, FraudRule, RuleKind, Verdict};
pub use notify::{Notifier, NullNotifier, TracingNotifier};
pub use reconciliation::{
    NoProvider, ProviderLedger, ReconciliationRecord, ReconciliationStatus, Reconciler,
};
pub use store::{MemoryStore, PgStore, Store, StoreError, StoreSession};
