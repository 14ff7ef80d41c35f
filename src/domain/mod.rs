//! Domain module
//!
//! Core domain types and business rules: money, wallets, transactions, the
//! hash-chained ledger, and the events the engine emits.

pub mod context;
pub mod events;
pub mod ledger;
pub mod money;
pub mod transaction;
pub mod wallet;

pub use context::{GeoPoint, OperationContext};
pub use events::DomainEvent;
pub use ledger::{ChainFault, ChainVerifier, EntryDirection, LedgerEntry, GENESIS_HASH};
pub use money::{Currency, FeePolicy, Money, MoneyError, Rounding};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
pub use wallet::{BalanceSummary, LimitWindow, Wallet};
