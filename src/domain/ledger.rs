//! Ledger entries
//!
//! Append-only, double-entry records of every balance change. Each wallet has
//! its own hash chain: an entry's `content_hash` is a SHA-256 digest over its
//! fields concatenated with the previous entry's hash, rooted at a fixed
//! genesis value. Recomputing the chain detects any post-hoc alteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::money::Money;

/// Root of every per-wallet hash chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Debit => "DEBIT",
            EntryDirection::Credit => "CREDIT",
        }
    }
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(EntryDirection::Debit),
            "CREDIT" => Ok(EntryDirection::Credit),
            other => Err(format!("unknown entry direction: {other}")),
        }
    }
}

/// One immutable balance-affecting record.
///
/// `sequence_number` is monotonic per wallet starting at 1, matching the
/// order exclusive access was granted. Entries are created exactly once, when
/// a transaction reaches COMPLETED, and never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub transaction_id: Uuid,
    pub direction: EntryDirection,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub previous_hash: String,
}

impl LedgerEntry {
    /// Build the next entry in a wallet's chain, computing its content hash
    /// over the fields and `previous_hash`.
    #[allow(clippy::too_many_arguments)]
    pub fn next(
        wallet_id: Uuid,
        transaction_id: Uuid,
        direction: EntryDirection,
        amount: Money,
        balance_before: Money,
        balance_after: Money,
        sequence_number: i64,
        previous_hash: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            wallet_id,
            transaction_id,
            direction,
            amount,
            balance_before,
            balance_after,
            sequence_number,
            created_at,
            content_hash: String::new(),
            previous_hash,
        };
        entry.content_hash = entry.compute_hash();
        entry
    }

    /// Digest over the entry's own fields plus the previous hash.
    ///
    /// Amounts are normalized to the minor unit so a replayed chain hashes
    /// identically regardless of intermediate Decimal scale.
    pub fn compute_hash(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}|{:.2}|{:.2}|{:.2}|{}|{}",
            self.wallet_id,
            self.transaction_id,
            self.direction,
            self.sequence_number,
            self.amount.amount(),
            self.balance_before.amount(),
            self.balance_after.amount(),
            self.created_at.to_rfc3339(),
            self.previous_hash,
        );
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainFault {
    #[error("Entry {sequence} links to {found}, expected {expected}")]
    BrokenLink {
        sequence: i64,
        expected: String,
        found: String,
    },

    #[error("Entry {sequence} content hash does not match its fields")]
    TamperedEntry { sequence: i64 },

    #[error("Entry sequence jumps from {previous} to {found}")]
    SequenceGap { previous: i64, found: i64 },

    #[error("Entry {sequence} balance arithmetic is inconsistent")]
    BalanceMismatch { sequence: i64 },
}

/// Incremental verifier for one wallet's chain, fed entries in sequence
/// order starting from genesis.
#[derive(Debug)]
pub struct ChainVerifier {
    previous_hash: String,
    last_sequence: i64,
    entries_checked: u64,
}

impl ChainVerifier {
    pub fn new() -> Self {
        Self::resume(0, GENESIS_HASH.to_string())
    }

    /// Resume verification from a previously verified tip, so a daily pass
    /// does not have to replay the whole history every run.
    pub fn resume(sequence: i64, previous_hash: String) -> Self {
        Self {
            previous_hash,
            last_sequence: sequence,
            entries_checked: 0,
        }
    }

    pub fn entries_checked(&self) -> u64 {
        self.entries_checked
    }

    /// Last verified `(sequence, content_hash)` tip; the resume point for
    /// the next pass.
    pub fn tip(&self) -> (i64, &str) {
        (self.last_sequence, &self.previous_hash)
    }

    /// Final running balance is the last entry's `balance_after`.
    pub fn check(&mut self, entry: &LedgerEntry) -> Result<(), ChainFault> {
        if entry.sequence_number != self.last_sequence + 1 {
            return Err(ChainFault::SequenceGap {
                previous: self.last_sequence,
                found: entry.sequence_number,
            });
        }
        if entry.previous_hash != self.previous_hash {
            return Err(ChainFault::BrokenLink {
                sequence: entry.sequence_number,
                expected: self.previous_hash.clone(),
                found: entry.previous_hash.clone(),
            });
        }
        if entry.compute_hash() != entry.content_hash {
            return Err(ChainFault::TamperedEntry {
                sequence: entry.sequence_number,
            });
        }
        let expected_after = match entry.direction {
            EntryDirection::Debit => entry.balance_before.checked_sub(&entry.amount),
            EntryDirection::Credit => entry.balance_before.checked_add(&entry.amount),
        };
        match expected_after {
            Ok(after) if after == entry.balance_after => {}
            _ => {
                return Err(ChainFault::BalanceMismatch {
                    sequence: entry.sequence_number,
                });
            }
        }
        self.previous_hash = entry.content_hash.clone();
        self.last_sequence = entry.sequence_number;
        self.entries_checked += 1;
        Ok(())
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn xof(v: rust_decimal::Decimal) -> Money {
        Money::new(v, Currency::Xof).unwrap()
    }

    fn chain(wallet_id: Uuid) -> Vec<LedgerEntry> {
        let now = Utc::now();
        let e1 = LedgerEntry::next(
            wallet_id,
            Uuid::new_v4(),
            EntryDirection::Credit,
            xof(dec!(50000)),
            xof(dec!(0)),
            xof(dec!(50000)),
            1,
            GENESIS_HASH.to_string(),
            now,
        );
        let e2 = LedgerEntry::next(
            wallet_id,
            Uuid::new_v4(),
            EntryDirection::Debit,
            xof(dec!(15000)),
            xof(dec!(50000)),
            xof(dec!(35000)),
            2,
            e1.content_hash.clone(),
            now,
        );
        vec![e1, e2]
    }

    #[test]
    fn test_valid_chain_verifies() {
        let entries = chain(Uuid::new_v4());
        let mut verifier = ChainVerifier::new();
        for entry in &entries {
            verifier.check(entry).unwrap();
        }
        assert_eq!(verifier.entries_checked(), 2);
    }

    #[test]
    fn test_amount_tamper_detected() {
        let mut entries = chain(Uuid::new_v4());
        entries[1].amount = xof(dec!(14000));
        let mut verifier = ChainVerifier::new();
        verifier.check(&entries[0]).unwrap();
        assert!(matches!(
            verifier.check(&entries[1]),
            Err(ChainFault::TamperedEntry { sequence: 2 })
        ));
    }

    #[test]
    fn test_broken_link_detected() {
        let mut entries = chain(Uuid::new_v4());
        entries[1].previous_hash = GENESIS_HASH.to_string();
        entries[1].content_hash = entries[1].compute_hash();
        let mut verifier = ChainVerifier::new();
        verifier.check(&entries[0]).unwrap();
        assert!(matches!(
            verifier.check(&entries[1]),
            Err(ChainFault::BrokenLink { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_sequence_gap_detected() {
        let entries = chain(Uuid::new_v4());
        let mut verifier = ChainVerifier::new();
        assert!(matches!(
            verifier.check(&entries[1]),
            Err(ChainFault::SequenceGap {
                previous: 0,
                found: 2
            })
        ));
    }

    #[test]
    fn test_balance_arithmetic_checked() {
        let now = Utc::now();
        // Hash is consistent but the before/after math is wrong
        let entry = LedgerEntry::next(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EntryDirection::Credit,
            xof(dec!(100)),
            xof(dec!(0)),
            xof(dec!(99)),
            1,
            GENESIS_HASH.to_string(),
            now,
        );
        let mut verifier = ChainVerifier::new();
        assert!(matches!(
            verifier.check(&entry),
            Err(ChainFault::BalanceMismatch { sequence: 1 })
        ));
    }

    #[test]
    fn test_resume_continues_mid_chain() {
        let entries = chain(Uuid::new_v4());
        let mut full = ChainVerifier::new();
        full.check(&entries[0]).unwrap();
        let (seq, hash) = full.tip();

        let mut resumed = ChainVerifier::resume(seq, hash.to_string());
        resumed.check(&entries[1]).unwrap();
        assert_eq!(resumed.entries_checked(), 1);
        assert_eq!(resumed.tip().0, 2);

        // A wrong resume hash surfaces as a broken link on the next entry
        let mut bad = ChainVerifier::resume(1, "f".repeat(64));
        assert!(matches!(
            bad.check(&entries[1]),
            Err(ChainFault::BrokenLink { sequence: 2, .. })
        ));
    }

    #[test]
    fn test_hash_normalizes_scale() {
        let now = Utc::now();
        let a = LedgerEntry::next(
            Uuid::nil(),
            Uuid::nil(),
            EntryDirection::Credit,
            xof(dec!(100)),
            xof(dec!(0)),
            xof(dec!(100)),
            1,
            GENESIS_HASH.to_string(),
            now,
        );
        let b = LedgerEntry {
            amount: xof(dec!(100.00)),
            ..a.clone()
        };
        assert_eq!(a.compute_hash(), b.compute_hash());
    }
}
