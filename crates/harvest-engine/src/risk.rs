//! Risk Classifier
//!
//! Assigns a risk tier from two independent signals, combined by worst-case
//! selection: the third-party security score and the gas cost as a fraction
//! of the loss being harvested. Missing external data fails closed to HIGH.

use harvest_core::RiskTier;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::eligibility::EligibleOpportunity;

/// Named band thresholds, tunable per jurisdiction/product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBands {
    /// Security score at or above this is LOW risk.
    pub low_score_min: u8,
    /// Security score at or above this (but below `low_score_min`) is MEDIUM.
    pub medium_score_min: u8,
    /// Gas below this percentage of the loss is LOW-leaning.
    pub gas_low_max_percent: Decimal,
    /// Gas at or below this percentage (but above the low band) is
    /// MEDIUM-leaning; anything higher is HIGH-leaning.
    pub gas_medium_max_percent: Decimal,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low_score_min: 80,
            medium_score_min: 50,
            gas_low_max_percent: Decimal::new(5, 0),
            gas_medium_max_percent: Decimal::new(15, 0),
        }
    }
}

impl RiskBands {
    /// Band from the security score; an unvetted token is HIGH.
    pub fn score_band(&self, score: Option<u8>) -> RiskTier {
        match score {
            Some(s) if s >= self.low_score_min => RiskTier::Low,
            Some(s) if s >= self.medium_score_min => RiskTier::Medium,
            Some(_) => RiskTier::High,
            None => RiskTier::High,
        }
    }

    /// Band from gas cost as a fraction of the loss; a missing estimate or
    /// a zero loss is HIGH.
    pub fn cost_band(&self, gas: Option<Decimal>, loss_amount: Decimal) -> RiskTier {
        let gas = match gas {
            Some(g) => g,
            None => return RiskTier::High,
        };
        if loss_amount <= Decimal::ZERO {
            return RiskTier::High;
        }
        let percent = gas / loss_amount * Decimal::ONE_HUNDRED;
        if percent < self.gas_low_max_percent {
            RiskTier::Low
        } else if percent <= self.gas_medium_max_percent {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }
}

/// Execution cost inputs, in currency units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostInputs {
    pub gas: Decimal,
    pub slippage: Decimal,
    pub fee: Decimal,
}

impl CostInputs {
    pub fn total(&self) -> Decimal {
        self.gas + self.slippage + self.fee
    }
}

/// An eligible opportunity with its risk classification attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedOpportunity {
    pub opportunity: EligibleOpportunity,
    /// The more conservative of the two signal bands.
    pub risk_tier: RiskTier,
    pub security_score: Option<u8>,
    pub score_band: RiskTier,
    pub cost_band: RiskTier,
    /// None when gas or slippage estimation failed; the opportunity is then
    /// excluded from recommendation until an estimate succeeds.
    pub costs: Option<CostInputs>,
}

impl ClassifiedOpportunity {
    /// Stable identity for session-conflict and suppression checks.
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.opportunity.candidate.token, self.opportunity.candidate.lot_id
        )
    }
}

/// Classify one eligible opportunity from external signals.
pub fn classify(
    opportunity: EligibleOpportunity,
    security_score: Option<u8>,
    gas: Option<Decimal>,
    slippage: Option<Decimal>,
    fee: Decimal,
    bands: &RiskBands,
) -> ClassifiedOpportunity {
    let loss_amount = opportunity.candidate.loss_amount();
    let score_band = bands.score_band(security_score);
    let cost_band = bands.cost_band(gas, loss_amount);

    let costs = match (gas, slippage) {
        (Some(gas), Some(slippage)) => Some(CostInputs { gas, slippage, fee }),
        _ => None,
    };
    // Any failed estimate fails closed, whichever signal it reached.
    let risk_tier = if costs.is_none() {
        RiskTier::High
    } else {
        score_band.max(cost_band)
    };

    if risk_tier == RiskTier::High {
        tracing::debug!(
            token = %opportunity.candidate.token,
            ?security_score,
            "opportunity classified HIGH risk"
        );
    }

    ClassifiedOpportunity {
        opportunity,
        risk_tier,
        security_score,
        score_band,
        cost_band,
        costs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::HarvestCandidate;
    use crate::eligibility::WashSaleWindow;
    use chrono::{TimeZone, Utc};
    use harvest_core::HoldingPeriod;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn opportunity(loss: Decimal) -> EligibleOpportunity {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        EligibleOpportunity {
            candidate: HarvestCandidate {
                token: "ETH".to_string(),
                lot_id: Uuid::new_v4(),
                wallet: None,
                quantity: dec!(1),
                unit_cost_basis: dec!(1000),
                current_price: dec!(1000) - loss,
                unrealized_pnl: -loss,
                pnl_percent: None,
                holding_days: 100,
                holding_period: HoldingPeriod::ShortTerm,
                days_until_long_term: Some(266),
                acquired_sequence: 1,
                acquired_at: as_of - chrono::Duration::days(100),
            },
            wash_sale_window: WashSaleWindow::around(as_of.date_naive(), 30),
        }
    }

    #[test]
    fn test_score_bands() {
        let bands = RiskBands::default();
        assert_eq!(bands.score_band(Some(80)), RiskTier::Low);
        assert_eq!(bands.score_band(Some(79)), RiskTier::Medium);
        assert_eq!(bands.score_band(Some(50)), RiskTier::Medium);
        assert_eq!(bands.score_band(Some(49)), RiskTier::High);
    }

    #[test]
    fn test_missing_score_fails_closed() {
        let bands = RiskBands::default();
        assert_eq!(bands.score_band(None), RiskTier::High);
    }

    #[test]
    fn test_gas_fraction_bands() {
        let bands = RiskBands::default();
        // 4% / 10% / 20% of a 1000 loss.
        assert_eq!(bands.cost_band(Some(dec!(40)), dec!(1000)), RiskTier::Low);
        assert_eq!(bands.cost_band(Some(dec!(100)), dec!(1000)), RiskTier::Medium);
        assert_eq!(bands.cost_band(Some(dec!(200)), dec!(1000)), RiskTier::High);
        assert_eq!(bands.cost_band(None, dec!(1000)), RiskTier::High);
    }

    #[test]
    fn test_worst_case_combination() {
        let bands = RiskBands::default();
        // Safe token, expensive gas: the gas signal wins.
        let classified = classify(
            opportunity(dec!(1000)),
            Some(95),
            Some(dec!(200)),
            Some(dec!(10)),
            dec!(5),
            &bands,
        );
        assert_eq!(classified.score_band, RiskTier::Low);
        assert_eq!(classified.cost_band, RiskTier::High);
        assert_eq!(classified.risk_tier, RiskTier::High);
    }

    #[test]
    fn test_failed_estimate_drops_costs() {
        let bands = RiskBands::default();
        let classified = classify(
            opportunity(dec!(1000)),
            Some(95),
            Some(dec!(40)),
            None,
            dec!(5),
            &bands,
        );
        assert!(classified.costs.is_none());
        assert_eq!(classified.risk_tier, RiskTier::High);
    }
}
