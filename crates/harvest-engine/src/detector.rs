//! Opportunity Detector
//!
//! Evaluates open lots against current prices and produces loss candidates
//! with holding-period and tax classification.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use harvest_core::HoldingPeriod;
use lot_ledger::Lot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::HarvestConfig;

/// A read-only evaluation of one open lot against the current price.
/// Recomputed on every detection pass; never persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestCandidate {
    pub token: String,
    pub lot_id: Uuid,
    pub wallet: Option<String>,
    pub quantity: Decimal,
    pub unit_cost_basis: Decimal,
    pub current_price: Decimal,
    /// Signed unrealized P&L; always negative for a candidate.
    pub unrealized_pnl: Decimal,
    /// P&L as a percentage of cost basis; None for zero-basis lots.
    pub pnl_percent: Option<Decimal>,
    /// Whole calendar days held, on UTC date boundaries.
    pub holding_days: i64,
    pub holding_period: HoldingPeriod,
    /// Days remaining until long-term treatment, when still short-term.
    pub days_until_long_term: Option<i64>,
    /// Sequence of the transaction that opened the lot, used to tell the
    /// lot's own acquisition apart from other events at the same instant.
    pub acquired_sequence: u64,
    pub acquired_at: DateTime<Utc>,
}

impl HarvestCandidate {
    /// Loss magnitude (positive).
    pub fn loss_amount(&self) -> Decimal {
        self.unrealized_pnl.abs()
    }
}

/// Whole calendar days between two instants, computed on UTC date
/// components so timezone boundaries never drift the count.
pub fn holding_days(acquired_at: DateTime<Utc>, as_of: DateTime<Utc>) -> i64 {
    (as_of.date_naive() - acquired_at.date_naive()).num_days()
}

/// Classify a holding period. Long-term requires strictly more days than
/// the threshold: at exactly 365 days the lot is still short-term.
pub fn classify_holding(days: i64, threshold_days: i64) -> HoldingPeriod {
    if days > threshold_days {
        HoldingPeriod::LongTerm
    } else {
        HoldingPeriod::ShortTerm
    }
}

/// Evaluate open lots against current prices and return loss candidates,
/// largest loss first (ties broken by token symbol for determinism).
///
/// Lots with no price quote, zero/dust quantity, or an unrealized gain are
/// skipped, never errors.
pub fn detect(
    open_lots: &[Lot],
    prices: &HashMap<String, Decimal>,
    as_of: DateTime<Utc>,
    config: &HarvestConfig,
) -> Vec<HarvestCandidate> {
    let mut candidates = Vec::new();

    for lot in open_lots {
        if lot.remaining_quantity <= config.dust_epsilon {
            continue;
        }
        let current_price = match prices.get(&lot.token) {
            Some(&p) => p,
            None => continue, // unavailable price excludes the token
        };

        let unrealized_pnl = (current_price - lot.unit_cost_basis) * lot.remaining_quantity;
        if unrealized_pnl >= Decimal::ZERO {
            continue;
        }

        let basis_value = lot.unit_cost_basis * lot.remaining_quantity;
        let pnl_percent = if basis_value.is_zero() {
            None
        } else {
            Some(unrealized_pnl / basis_value * Decimal::ONE_HUNDRED)
        };

        let days = holding_days(lot.acquired_at, as_of);
        let holding_period = classify_holding(days, config.long_term_threshold_days);
        let days_until_long_term = match holding_period {
            HoldingPeriod::LongTerm => None,
            HoldingPeriod::ShortTerm => Some(config.long_term_threshold_days + 1 - days),
        };

        candidates.push(HarvestCandidate {
            token: lot.token.clone(),
            lot_id: lot.id,
            wallet: lot.wallet.clone(),
            quantity: lot.remaining_quantity,
            unit_cost_basis: lot.unit_cost_basis,
            current_price,
            unrealized_pnl,
            pnl_percent,
            holding_days: days,
            holding_period,
            days_until_long_term,
            acquired_sequence: lot.acquired_sequence,
            acquired_at: lot.acquired_at,
        });
    }

    candidates.sort_by(|a, b| {
        b.loss_amount()
            .cmp(&a.loss_amount())
            .then_with(|| a.token.cmp(&b.token))
    });

    tracing::debug!(candidates = candidates.len(), "detection pass evaluated lots");
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::days(day)
    }

    fn lot(token: &str, quantity: Decimal, basis: Decimal, day: i64) -> Lot {
        Lot {
            id: Uuid::new_v4(),
            owner: "user1".to_string(),
            wallet: None,
            token: token.to_string(),
            acquired_sequence: 1,
            acquired_at: ts(day),
            original_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost_basis: basis,
        }
    }

    #[test]
    fn test_pnl_correctness() {
        let lots = vec![lot("ETH", dec!(10), dec!(3000), 0)];
        let prices = HashMap::from([("ETH".to_string(), dec!(2100))]);
        let candidates = detect(&lots, &prices, ts(100), &HarvestConfig::default());

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.unrealized_pnl, dec!(-9000)); // (2100 - 3000) * 10
        assert_eq!(c.pnl_percent, Some(dec!(-30)));
        assert_eq!(c.holding_days, 100);
        assert_eq!(c.holding_period, HoldingPeriod::ShortTerm);
        assert_eq!(c.days_until_long_term, Some(266));
    }

    #[test]
    fn test_gains_excluded() {
        let lots = vec![lot("ETH", dec!(5), dec!(2000), 0)];
        let prices = HashMap::from([("ETH".to_string(), dec!(2100))]);
        let candidates = detect(&lots, &prices, ts(100), &HarvestConfig::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_missing_price_excluded() {
        let lots = vec![
            lot("ETH", dec!(10), dec!(3000), 0),
            lot("SOL", dec!(100), dec!(200), 0),
        ];
        let prices = HashMap::from([("ETH".to_string(), dec!(2100))]);
        let candidates = detect(&lots, &prices, ts(100), &HarvestConfig::default());

        // Partial success: SOL has no quote, ETH still evaluated.
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].token, "ETH");
    }

    #[test]
    fn test_classification_boundary() {
        assert_eq!(classify_holding(365, 365), HoldingPeriod::ShortTerm);
        assert_eq!(classify_holding(366, 365), HoldingPeriod::LongTerm);
    }

    #[test]
    fn test_holding_days_on_calendar_boundaries() {
        // 23:59 to 00:01 the next day is one whole calendar day.
        let bought = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 3, 2, 0, 1, 0).unwrap();
        assert_eq!(holding_days(bought, as_of), 1);
    }

    #[test]
    fn test_ordering_largest_loss_first() {
        let lots = vec![
            lot("AAA", dec!(1), dec!(1000), 0),
            lot("BBB", dec!(1), dec!(5000), 0),
            lot("CCC", dec!(1), dec!(1000), 0),
        ];
        let prices = HashMap::from([
            ("AAA".to_string(), dec!(500)),
            ("BBB".to_string(), dec!(500)),
            ("CCC".to_string(), dec!(500)),
        ]);
        let candidates = detect(&lots, &prices, ts(10), &HarvestConfig::default());

        let tokens: Vec<_> = candidates.iter().map(|c| c.token.as_str()).collect();
        // BBB has the largest loss; AAA/CCC tie broken by symbol.
        assert_eq!(tokens, vec!["BBB", "AAA", "CCC"]);
    }

    #[test]
    fn test_zero_basis_lot_has_no_percentage() {
        // An airdropped lot can never show a loss, so it is simply skipped.
        let lots = vec![lot("ARB", dec!(100), dec!(0), 0)];
        let prices = HashMap::from([("ARB".to_string(), dec!(1))]);
        let candidates = detect(&lots, &prices, ts(10), &HarvestConfig::default());
        assert!(candidates.is_empty());
    }
}
