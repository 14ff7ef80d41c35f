//! Fraud engine
//!
//! Rule-based risk scoring for pending transactions. Each active rule is a
//! tagged variant dispatching to a pure evaluator; a matching rule adds its
//! weight to the running score, capped at 100. Evaluation is side-effect-free
//! and deterministic given the same rule set and history snapshot: nothing
//! here reads clocks or mutates wallet or ledger state.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::FraudConfig;
use crate::domain::context::GeoPoint;
use crate::domain::money::Money;

/// Recommended action for a scored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudAction {
    Allow,
    /// Funds move, but the transaction is flagged for manual audit.
    Review,
    /// Rejected before any wallet or ledger mutation.
    Block,
}

/// Closed set of rule evaluators. Parameters live on the variant; rules are
/// stored as data and administrator-managed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// Flags amounts above a multiple of the sender's historical average,
    /// or a first transaction above an absolute threshold.
    AmountThreshold {
        absolute: Decimal,
        average_multiplier: Decimal,
    },

    /// Flags too many outgoing transactions, or too much aggregate volume,
    /// within a trailing window.
    Velocity {
        window_minutes: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_count: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_volume: Option<Decimal>,
    },

    /// Flags round amounts (exact multiples of `round_step`) as a weak
    /// test/probing signal.
    Pattern { round_step: Decimal },

    /// Flags a large amount sent to a receiver wallet created moments ago,
    /// a common mule pattern.
    NewReceiver {
        min_amount: Decimal,
        max_age_minutes: i64,
    },

    /// Flags a declared location far from the sender's recent locations.
    /// A no-op when location data is absent on either side.
    Geolocation { max_distance_km: f64 },

    /// Flags sender or receiver identities on the list; a match alone
    /// forces BLOCK regardless of cumulative score.
    Blacklist { owners: Vec<String> },
}

/// One administrator-managed fraud rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRule {
    pub id: Uuid,
    pub name: String,
    pub kind: RuleKind,
    /// Score contribution when the rule matches.
    pub weight: u8,
    pub active: bool,
}

impl FraudRule {
    pub fn new(name: impl Into<String>, kind: RuleKind, weight: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            weight,
            active: true,
        }
    }

    /// The built-in rule set with product-default thresholds.
    pub fn default_rules() -> Vec<FraudRule> {
        vec![
            FraudRule::new(
                "high-amount",
                RuleKind::AmountThreshold {
                    absolute: Decimal::from(100_000),
                    average_multiplier: Decimal::from(3),
                },
                10,
            ),
            FraudRule::new(
                "hourly-count",
                RuleKind::Velocity {
                    window_minutes: 60,
                    max_count: Some(5),
                    max_volume: None,
                },
                15,
            ),
            FraudRule::new(
                "hourly-volume",
                RuleKind::Velocity {
                    window_minutes: 60,
                    max_count: None,
                    max_volume: Some(Decimal::from(1_000_000)),
                },
                20,
            ),
            FraudRule::new(
                "round-amount",
                RuleKind::Pattern {
                    round_step: Decimal::from(1_000),
                },
                5,
            ),
            FraudRule::new(
                "location-jump",
                RuleKind::Geolocation {
                    max_distance_km: 500.0,
                },
                15,
            ),
            FraudRule::new(
                "new-receiver",
                RuleKind::NewReceiver {
                    min_amount: Decimal::from(100_000),
                    max_age_minutes: 60,
                },
                10,
            ),
        ]
    }
}

/// One past outgoing transaction of the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
}

/// Immutable snapshot of the sender's history at evaluation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderHistory {
    /// All-time count of completed outgoing transactions.
    pub completed_count: u64,
    /// All-time average completed outgoing amount, if any.
    pub average_amount: Option<Decimal>,
    /// Recent outgoing transactions (completed or processing), newest last.
    /// Must cover the longest velocity window among the active rules.
    pub recent: Vec<HistoryItem>,
}

/// Everything a rule may look at.
#[derive(Debug, Clone)]
pub struct EvaluationInput<'a> {
    pub amount: Money,
    pub sender_owner: Option<&'a str>,
    pub receiver_owner: Option<&'a str>,
    /// When the receiver wallet was created, if there is one.
    pub receiver_created_at: Option<DateTime<Utc>>,
    pub declared_location: Option<GeoPoint>,
    pub history: &'a SenderHistory,
    /// Evaluation reference time; windows are computed against this, never
    /// against a live clock.
    pub as_of: DateTime<Utc>,
}

/// Outcome of scoring one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: u8,
    pub action: FraudAction,
    pub reasons: Vec<String>,
}

/// Score a pending transaction against the active rules.
pub fn evaluate(input: &EvaluationInput<'_>, rules: &[FraudRule], bands: &FraudConfig) -> Verdict {
    let mut score: u32 = 0;
    let mut reasons = Vec::new();
    let mut blacklisted = false;

    for rule in rules.iter().filter(|r| r.active) {
        if let Some(reason) = check_rule(&rule.kind, input) {
            score += u32::from(rule.weight);
            if matches!(rule.kind, RuleKind::Blacklist { .. }) {
                blacklisted = true;
            }
            reasons.push(format!("{}: {}", rule.name, reason));
        }
    }

    let score = score.min(100) as u8;
    let action = if blacklisted || score >= bands.block_threshold {
        FraudAction::Block
    } else if score >= bands.review_threshold {
        FraudAction::Review
    } else {
        FraudAction::Allow
    };

    Verdict {
        score,
        action,
        reasons,
    }
}

fn check_rule(kind: &RuleKind, input: &EvaluationInput<'_>) -> Option<String> {
    match kind {
        RuleKind::AmountThreshold {
            absolute,
            average_multiplier,
        } => check_amount_threshold(input, *absolute, *average_multiplier),
        RuleKind::Velocity {
            window_minutes,
            max_count,
            max_volume,
        } => check_velocity(input, *window_minutes, *max_count, *max_volume),
        RuleKind::Pattern { round_step } => check_pattern(input, *round_step),
        RuleKind::NewReceiver {
            min_amount,
            max_age_minutes,
        } => check_new_receiver(input, *min_amount, *max_age_minutes),
        RuleKind::Geolocation { max_distance_km } => check_geolocation(input, *max_distance_km),
        RuleKind::Blacklist { owners } => check_blacklist(input, owners),
    }
}

fn check_amount_threshold(
    input: &EvaluationInput<'_>,
    absolute: Decimal,
    average_multiplier: Decimal,
) -> Option<String> {
    input.sender_owner?;
    let amount = input.amount.amount();
    if input.history.completed_count == 0 {
        if amount >= absolute {
            return Some(format!(
                "first transaction of {} exceeds threshold {}",
                amount, absolute
            ));
        }
        return None;
    }
    let average = input.history.average_amount?;
    if average > Decimal::ZERO && amount >= average * average_multiplier {
        return Some(format!(
            "amount {} exceeds {}x historical average {}",
            amount, average_multiplier, average
        ));
    }
    None
}

fn check_velocity(
    input: &EvaluationInput<'_>,
    window_minutes: i64,
    max_count: Option<u32>,
    max_volume: Option<Decimal>,
) -> Option<String> {
    input.sender_owner?;
    let window_start = input.as_of - Duration::minutes(window_minutes);
    let in_window: Vec<&HistoryItem> = input
        .history
        .recent
        .iter()
        .filter(|item| item.created_at >= window_start)
        .collect();

    if let Some(max) = max_count {
        if in_window.len() as u32 >= max {
            return Some(format!(
                "{} transactions in {} minutes",
                in_window.len(),
                window_minutes
            ));
        }
    }
    if let Some(ceiling) = max_volume {
        let volume: Decimal = in_window.iter().map(|item| item.amount).sum();
        if volume >= ceiling {
            return Some(format!(
                "volume {} in {} minutes exceeds {}",
                volume, window_minutes, ceiling
            ));
        }
    }
    None
}

fn check_pattern(input: &EvaluationInput<'_>, round_step: Decimal) -> Option<String> {
    // Pattern signals describe sender behavior; inbound-only movements
    // (deposits) carry none.
    input.sender_owner?;
    if round_step <= Decimal::ZERO {
        return None;
    }
    let amount = input.amount.amount();
    if amount > Decimal::ZERO && (amount % round_step).is_zero() {
        return Some(format!("round amount {} (multiple of {})", amount, round_step));
    }
    None
}

fn check_new_receiver(
    input: &EvaluationInput<'_>,
    min_amount: Decimal,
    max_age_minutes: i64,
) -> Option<String> {
    input.sender_owner?;
    let created_at = input.receiver_created_at?;
    let age = input.as_of - created_at;
    if input.amount.amount() >= min_amount && age <= Duration::minutes(max_age_minutes) {
        return Some(format!(
            "amount {} to a wallet created {} minutes ago",
            input.amount.amount(),
            age.num_minutes()
        ));
    }
    None
}

fn check_geolocation(input: &EvaluationInput<'_>, max_distance_km: f64) -> Option<String> {
    // Never fabricate a score from missing data.
    let declared = input.declared_location?;
    let known: Vec<GeoPoint> = input
        .history
        .recent
        .iter()
        .filter_map(|item| item.location)
        .collect();
    if known.is_empty() {
        return None;
    }
    let nearest = known
        .iter()
        .map(|point| haversine_km(declared, *point))
        .fold(f64::INFINITY, f64::min);
    if nearest > max_distance_km {
        return Some(format!(
            "declared location {:.0} km from recent history (limit {:.0} km)",
            nearest, max_distance_km
        ));
    }
    None
}

fn check_blacklist(input: &EvaluationInput<'_>, owners: &[String]) -> Option<String> {
    let hit = |owner: Option<&str>| owner.is_some_and(|o| owners.iter().any(|b| b == o));
    if hit(input.sender_owner) {
        return Some("sender identity is blacklisted".to_string());
    }
    if hit(input.receiver_owner) {
        return Some("receiver identity is blacklisted".to_string());
    }
    None
}

/// Great-circle distance between two points, in kilometers.
fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn input<'a>(amount: Decimal, history: &'a SenderHistory) -> EvaluationInput<'a> {
        EvaluationInput {
            amount: Money::new(amount, Currency::Xof).unwrap(),
            sender_owner: Some("alice"),
            receiver_owner: Some("bob"),
            receiver_created_at: None,
            declared_location: None,
            history,
            as_of: Utc::now(),
        }
    }

    fn bands() -> FraudConfig {
        FraudConfig::default()
    }

    #[test]
    fn test_no_rules_allows() {
        let history = SenderHistory::default();
        let verdict = evaluate(&input(dec!(123.45), &history), &[], &bands());
        assert_eq!(verdict.score, 0);
        assert_eq!(verdict.action, FraudAction::Allow);
    }

    #[test]
    fn test_first_transaction_threshold() {
        let history = SenderHistory::default();
        let rule = FraudRule::new(
            "high-amount",
            RuleKind::AmountThreshold {
                absolute: dec!(100000),
                average_multiplier: dec!(3),
            },
            10,
        );
        let verdict = evaluate(&input(dec!(150001), &history), &[rule.clone()], &bands());
        assert_eq!(verdict.score, 10);
        // Below the absolute threshold: clean
        let verdict = evaluate(&input(dec!(99999.99), &history), &[rule], &bands());
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn test_average_multiplier_threshold() {
        let history = SenderHistory {
            completed_count: 20,
            average_amount: Some(dec!(5000)),
            recent: vec![],
        };
        let rule = FraudRule::new(
            "high-amount",
            RuleKind::AmountThreshold {
                absolute: dec!(100000),
                average_multiplier: dec!(3),
            },
            10,
        );
        let verdict = evaluate(&input(dec!(15001), &history), &[rule.clone()], &bands());
        assert_eq!(verdict.score, 10);
        let verdict = evaluate(&input(dec!(14999), &history), &[rule], &bands());
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn test_velocity_count_and_volume() {
        let now = Utc::now();
        let recent: Vec<HistoryItem> = (0..5)
            .map(|i| HistoryItem {
                amount: dec!(250000),
                created_at: now - Duration::minutes(i * 10),
                location: None,
            })
            .collect();
        let history = SenderHistory {
            completed_count: 5,
            average_amount: Some(dec!(250000)),
            recent,
        };
        let count_rule = FraudRule::new(
            "hourly-count",
            RuleKind::Velocity {
                window_minutes: 60,
                max_count: Some(5),
                max_volume: None,
            },
            15,
        );
        let volume_rule = FraudRule::new(
            "hourly-volume",
            RuleKind::Velocity {
                window_minutes: 60,
                max_count: None,
                max_volume: Some(dec!(1000000)),
            },
            20,
        );
        let mut sample = input(dec!(10), &history);
        sample.as_of = now;
        let verdict = evaluate(&sample, &[count_rule, volume_rule], &bands());
        assert_eq!(verdict.score, 35);
        assert_eq!(verdict.action, FraudAction::Review);
        assert_eq!(verdict.reasons.len(), 2);
    }

    #[test]
    fn test_velocity_window_excludes_old_history() {
        let now = Utc::now();
        let history = SenderHistory {
            completed_count: 10,
            average_amount: Some(dec!(100)),
            recent: vec![HistoryItem {
                amount: dec!(2000000),
                created_at: now - Duration::minutes(90),
                location: None,
            }],
        };
        let rule = FraudRule::new(
            "hourly-volume",
            RuleKind::Velocity {
                window_minutes: 60,
                max_count: None,
                max_volume: Some(dec!(1000000)),
            },
            20,
        );
        let mut sample = input(dec!(10), &history);
        sample.as_of = now;
        assert_eq!(evaluate(&sample, &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_pattern_round_amount() {
        let history = SenderHistory {
            completed_count: 3,
            average_amount: Some(dec!(10000)),
            recent: vec![],
        };
        let rule = FraudRule::new(
            "round-amount",
            RuleKind::Pattern {
                round_step: dec!(1000),
            },
            5,
        );
        assert_eq!(
            evaluate(&input(dec!(15000), &history), &[rule.clone()], &bands()).score,
            5
        );
        assert_eq!(
            evaluate(&input(dec!(15000.50), &history), &[rule], &bands()).score,
            0
        );
    }

    #[test]
    fn test_pattern_ignores_inbound_movements() {
        let history = SenderHistory::default();
        let rule = FraudRule::new(
            "round-amount",
            RuleKind::Pattern {
                round_step: dec!(1000),
            },
            5,
        );
        // A deposit has no sender; round amounts are normal there.
        let mut sample = input(dec!(50000), &history);
        sample.sender_owner = None;
        assert_eq!(evaluate(&sample, &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_new_receiver_scored_by_age_and_amount() {
        let now = Utc::now();
        let history = SenderHistory::default();
        let rule = FraudRule::new(
            "new-receiver",
            RuleKind::NewReceiver {
                min_amount: dec!(100000),
                max_age_minutes: 60,
            },
            10,
        );
        let mut sample = input(dec!(150000), &history);
        sample.as_of = now;
        sample.receiver_created_at = Some(now - Duration::minutes(5));
        assert_eq!(evaluate(&sample, &[rule.clone()], &bands()).score, 10);

        // Old wallet: clean
        sample.receiver_created_at = Some(now - Duration::hours(48));
        assert_eq!(evaluate(&sample, &[rule.clone()], &bands()).score, 0);

        // Small amount to a fresh wallet: clean
        sample.receiver_created_at = Some(now - Duration::minutes(5));
        sample.amount = Money::new(dec!(5000), Currency::Xof).unwrap();
        assert_eq!(evaluate(&sample, &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_geolocation_noop_without_data() {
        let history = SenderHistory::default();
        let rule = FraudRule::new(
            "location-jump",
            RuleKind::Geolocation {
                max_distance_km: 500.0,
            },
            15,
        );
        // No declared location, no history: silent
        assert_eq!(evaluate(&input(dec!(100), &history), &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_geolocation_flags_distant_declaration() {
        let now = Utc::now();
        // Dakar
        let home = GeoPoint { lat: 14.7167, lon: -17.4677 };
        // Paris, ~4200 km away
        let away = GeoPoint { lat: 48.8566, lon: 2.3522 };
        let history = SenderHistory {
            completed_count: 4,
            average_amount: Some(dec!(100)),
            recent: vec![HistoryItem {
                amount: dec!(100),
                created_at: now - Duration::minutes(30),
                location: Some(home),
            }],
        };
        let rule = FraudRule::new(
            "location-jump",
            RuleKind::Geolocation {
                max_distance_km: 500.0,
            },
            15,
        );
        let mut sample = input(dec!(100), &history);
        sample.as_of = now;
        sample.declared_location = Some(away);
        assert_eq!(evaluate(&sample, &[rule.clone()], &bands()).score, 15);

        sample.declared_location = Some(GeoPoint { lat: 14.8, lon: -17.3 });
        assert_eq!(evaluate(&sample, &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_blacklist_forces_block() {
        let history = SenderHistory::default();
        let rule = FraudRule::new(
            "blocked-parties",
            RuleKind::Blacklist {
                owners: vec!["bob".to_string()],
            },
            10,
        );
        // Score 10 is deep in the allow band, but the blacklist wins
        let verdict = evaluate(&input(dec!(5), &history), &[rule], &bands());
        assert_eq!(verdict.score, 10);
        assert_eq!(verdict.action, FraudAction::Block);
    }

    #[test]
    fn test_score_caps_at_100() {
        let history = SenderHistory::default();
        let rules: Vec<FraudRule> = (0..5)
            .map(|i| {
                FraudRule::new(
                    format!("pattern-{}", i),
                    RuleKind::Pattern {
                        round_step: dec!(1000),
                    },
                    90,
                )
            })
            .collect();
        let verdict = evaluate(&input(dec!(1000), &history), &rules, &bands());
        assert_eq!(verdict.score, 100);
        assert_eq!(verdict.action, FraudAction::Block);
    }

    #[test]
    fn test_inactive_rules_skipped() {
        let history = SenderHistory::default();
        let mut rule = FraudRule::new(
            "round-amount",
            RuleKind::Pattern {
                round_step: dec!(1000),
            },
            5,
        );
        rule.active = false;
        assert_eq!(evaluate(&input(dec!(1000), &history), &[rule], &bands()).score, 0);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let now = Utc::now();
        let history = SenderHistory {
            completed_count: 2,
            average_amount: Some(dec!(500)),
            recent: vec![HistoryItem {
                amount: dec!(500),
                created_at: now - Duration::minutes(5),
                location: None,
            }],
        };
        let rules = FraudRule::default_rules();
        let mut sample = input(dec!(2000), &history);
        sample.as_of = now;
        let first = evaluate(&sample, &rules, &bands());
        for _ in 0..10 {
            assert_eq!(evaluate(&sample, &rules, &bands()), first);
        }
    }

    #[test]
    fn test_rule_parameters_roundtrip_as_data() {
        let rule = FraudRule::new(
            "hourly-count",
            RuleKind::Velocity {
                window_minutes: 60,
                max_count: Some(5),
                max_volume: None,
            },
            15,
        );
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("VELOCITY"));
        let back: FraudRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
