//! Detection pass orchestration.
//!
//! One logical unit of work for one owner: pull history, build the lot
//! book, look up prices, then run detector -> eligibility -> risk ->
//! net-benefit over the collaborator interfaces. One token's unavailable
//! data never fails the pass for the others.

use std::collections::HashMap;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use harvest_core::{
    CostEstimator, HarvestError, HistorySource, HoldingPeriod, PriceSource, RiskTier,
    SecurityScoreProvider,
};
use lot_ledger::{LedgerConfig, LotLedger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::net_benefit::{calculate, HarvestCalculation};
use crate::risk::{classify, ClassifiedOpportunity, RiskBands};
use crate::{detector, eligibility, HarvestConfig};

/// One fully evaluated opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityReport {
    pub classified: ClassifiedOpportunity,
    /// None when cost estimation failed; such an opportunity is excluded
    /// from recommendation until an estimate succeeds.
    pub calculation: Option<HarvestCalculation>,
}

impl OpportunityReport {
    pub fn is_recommended(&self) -> bool {
        self.calculation
            .as_ref()
            .map(|c| c.recommended)
            .unwrap_or(false)
    }
}

/// Aggregate view over one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub candidates: usize,
    pub eligible: usize,
    pub recommended: usize,
    pub total_harvestable_losses: Decimal,
    pub total_potential_savings: Decimal,
    pub short_term: usize,
    pub long_term: usize,
    /// Tokens excluded because no price quote was available.
    pub tokens_without_price: Vec<String>,
}

/// Output of one detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassOutcome {
    pub opportunities: Vec<OpportunityReport>,
    pub summary: PassSummary,
}

/// The harvest-decision pipeline for one owner at a time.
///
/// Collaborators are passed in per call; the pass holds only configuration
/// and shares no mutable state, so passes for different owners may run
/// fully in parallel.
pub struct HarvestPass {
    config: HarvestConfig,
    bands: RiskBands,
}

impl Default for HarvestPass {
    fn default() -> Self {
        Self::new()
    }
}

impl HarvestPass {
    pub fn new() -> Self {
        Self {
            config: HarvestConfig::default(),
            bands: RiskBands::default(),
        }
    }

    pub fn with_config(config: HarvestConfig, bands: RiskBands) -> Self {
        Self { config, bands }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run one full detection pass, pulling the owner's history from the
    /// history source first. A history-source failure is fatal for the
    /// pass: there is nothing to evaluate without it.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_for_owner(
        &self,
        owner: &str,
        source: &dyn HistorySource,
        prices: &dyn PriceSource,
        scores: &dyn SecurityScoreProvider,
        costs: &dyn CostEstimator,
        as_of: DateTime<Utc>,
    ) -> Result<PassOutcome, HarvestError> {
        let history = source
            .get_transactions(owner)
            .await
            .map_err(|e| HarvestError::Provider(format!("history source: {e}")))?;
        self.run(owner, &history, prices, scores, costs, as_of).await
    }

    /// Run one full detection pass over an already-fetched history.
    pub async fn run(
        &self,
        owner: &str,
        history: &[harvest_core::Transaction],
        prices: &dyn PriceSource,
        scores: &dyn SecurityScoreProvider,
        costs: &dyn CostEstimator,
        as_of: DateTime<Utc>,
    ) -> Result<PassOutcome, HarvestError> {
        let ledger = LotLedger::with_config(LedgerConfig {
            dust_epsilon: self.config.dust_epsilon,
            ..LedgerConfig::default()
        });
        let book = ledger.apply_transactions(history)?;

        // Price lookup per distinct held token; an unavailable quote (or a
        // failed lookup for that one token) excludes the token only.
        let tokens: HashSet<&str> = book.open_lots.iter().map(|l| l.token.as_str()).collect();
        let mut price_map: HashMap<String, Decimal> = HashMap::new();
        let mut tokens_without_price = Vec::new();
        for token in tokens {
            match prices.get_price(token).await {
                Ok(Some(price)) => {
                    price_map.insert(token.to_string(), price);
                }
                Ok(None) => tokens_without_price.push(token.to_string()),
                Err(e) => {
                    tracing::warn!(token, error = %e, "price lookup failed, excluding token");
                    tokens_without_price.push(token.to_string());
                }
            }
        }
        tokens_without_price.sort();

        let candidates = detector::detect(&book.open_lots, &price_map, as_of, &self.config);
        let candidate_count = candidates.len();

        let mut eligible = eligibility::filter(candidates, history, as_of, &self.config);
        eligible.truncate(self.config.max_opportunities);
        let eligible_count = eligible.len();

        let mut opportunities = Vec::with_capacity(eligible.len());
        for opportunity in eligible {
            let token = opportunity.candidate.token.clone();
            let quantity = opportunity.candidate.quantity;
            let loss_amount = opportunity.candidate.loss_amount();

            let score = match scores.get_score(&token).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "score lookup failed, failing closed");
                    None
                }
            };
            let gas = match costs.estimate_gas(&token, quantity).await {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "gas estimate failed, failing closed");
                    None
                }
            };
            let slippage = match costs.estimate_slippage(&token, quantity).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "slippage estimate failed, failing closed");
                    None
                }
            };

            let classified = classify(
                opportunity,
                score,
                gas,
                slippage,
                self.config.trading_fee,
                &self.bands,
            );

            let calculation = classified.costs.map(|c| {
                calculate(loss_amount, self.config.tax_rate, c.gas, c.slippage, c.fee)
            });

            opportunities.push(OpportunityReport {
                classified,
                calculation,
            });
        }

        let summary = summarize(
            candidate_count,
            eligible_count,
            &opportunities,
            tokens_without_price,
        );
        tracing::info!(
            owner,
            candidates = summary.candidates,
            eligible = summary.eligible,
            recommended = summary.recommended,
            "detection pass complete"
        );

        Ok(PassOutcome {
            opportunities,
            summary,
        })
    }
}

fn summarize(
    candidates: usize,
    eligible: usize,
    opportunities: &[OpportunityReport],
    tokens_without_price: Vec<String>,
) -> PassSummary {
    let total_harvestable_losses = opportunities
        .iter()
        .map(|o| o.classified.opportunity.candidate.loss_amount())
        .sum();
    let total_potential_savings = opportunities
        .iter()
        .filter_map(|o| o.calculation.as_ref())
        .map(|c| c.tax_savings)
        .sum();
    let short_term = opportunities
        .iter()
        .filter(|o| o.classified.opportunity.candidate.holding_period == HoldingPeriod::ShortTerm)
        .count();
    let recommended = opportunities
        .iter()
        .filter(|o| o.is_recommended() && o.classified.risk_tier != RiskTier::High)
        .count();

    PassSummary {
        candidates,
        eligible,
        recommended,
        total_harvestable_losses,
        total_potential_savings,
        short_term,
        long_term: opportunities.len() - short_term,
        tokens_without_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use harvest_core::{Transaction, TransactionKind};
    use rust_decimal_macros::dec;

    struct FixedPrices(HashMap<String, Decimal>);

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn get_price(&self, token: &str) -> Result<Option<Decimal>> {
            Ok(self.0.get(token).copied())
        }
    }

    struct FixedScores(Option<u8>);

    #[async_trait]
    impl SecurityScoreProvider for FixedScores {
        async fn get_score(&self, _token: &str) -> Result<Option<u8>> {
            Ok(self.0)
        }
    }

    struct FixedCosts {
        gas: Option<Decimal>,
        slippage: Option<Decimal>,
    }

    #[async_trait]
    impl CostEstimator for FixedCosts {
        async fn estimate_gas(&self, _token: &str, _quantity: Decimal) -> Result<Option<Decimal>> {
            Ok(self.gas)
        }
        async fn estimate_slippage(
            &self,
            _token: &str,
            _quantity: Decimal,
        ) -> Result<Option<Decimal>> {
            Ok(self.slippage)
        }
    }

    fn ts(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::days(day)
    }

    fn buy(sequence: u64, token: &str, quantity: Decimal, price: Decimal, day: i64) -> Transaction {
        Transaction {
            sequence,
            owner: "user1".to_string(),
            wallet: "wallet1".to_string(),
            token: token.to_string(),
            kind: TransactionKind::Buy,
            quantity,
            unit_price: Some(price),
            timestamp: ts(day),
            provenance: None,
        }
    }

    /// The end-to-end worked example: two ETH lots, $2,100 price, day-100
    /// evaluation, 24% rate, $50 gas + $30 slippage + $20 fees.
    #[tokio::test]
    async fn test_end_to_end_worked_example() {
        let history = vec![
            buy(1, "ETH", dec!(10), dec!(3000), 0),
            buy(2, "ETH", dec!(5), dec!(2000), 30),
        ];
        let prices = FixedPrices(HashMap::from([("ETH".to_string(), dec!(2100))]));
        let scores = FixedScores(Some(90));
        let costs = FixedCosts {
            gas: Some(dec!(50)),
            slippage: Some(dec!(30)),
        };

        let pass = HarvestPass::with_config(
            HarvestConfig {
                trading_fee: dec!(20),
                ..HarvestConfig::default()
            },
            RiskBands::default(),
        );
        let outcome = pass
            .run("user1", &history, &prices, &scores, &costs, ts(100))
            .await
            .unwrap();

        // Only the first lot is at a loss; the second has a $500 gain.
        assert_eq!(outcome.opportunities.len(), 1);
        let report = &outcome.opportunities[0];
        let candidate = &report.classified.opportunity.candidate;
        assert_eq!(candidate.unrealized_pnl, dec!(-9000));
        assert_eq!(candidate.holding_days, 100);
        assert_eq!(candidate.holding_period, HoldingPeriod::ShortTerm);

        let calc = report.calculation.as_ref().unwrap();
        assert_eq!(calc.tax_savings, dec!(2160.00));
        assert_eq!(calc.total_costs, dec!(100));
        assert_eq!(calc.net_benefit, dec!(2060.00));
        assert!(calc.recommended);

        assert_eq!(outcome.summary.recommended, 1);
        assert_eq!(outcome.summary.short_term, 1);
    }

    #[tokio::test]
    async fn test_missing_price_is_partial_success() {
        let history = vec![
            buy(1, "ETH", dec!(10), dec!(3000), 0),
            buy(2, "DOGE", dec!(1000), dec!(1), 0),
        ];
        let prices = FixedPrices(HashMap::from([("ETH".to_string(), dec!(2100))]));
        let scores = FixedScores(Some(90));
        let costs = FixedCosts {
            gas: Some(dec!(50)),
            slippage: Some(dec!(30)),
        };

        let pass = HarvestPass::new();
        let outcome = pass
            .run("user1", &history, &prices, &scores, &costs, ts(100))
            .await
            .unwrap();

        assert_eq!(outcome.opportunities.len(), 1);
        assert_eq!(
            outcome.summary.tokens_without_price,
            vec!["DOGE".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unscored_token_is_never_recommended() {
        let history = vec![buy(1, "ETH", dec!(10), dec!(3000), 0)];
        let prices = FixedPrices(HashMap::from([("ETH".to_string(), dec!(2100))]));
        let scores = FixedScores(None);
        let costs = FixedCosts {
            gas: Some(dec!(50)),
            slippage: Some(dec!(30)),
        };

        let outcome = HarvestPass::new()
            .run("user1", &history, &prices, &scores, &costs, ts(100))
            .await
            .unwrap();

        let report = &outcome.opportunities[0];
        assert_eq!(report.classified.risk_tier, RiskTier::High);
        assert_eq!(outcome.summary.recommended, 0);
    }

    #[tokio::test]
    async fn test_failed_cost_estimate_excludes_recommendation() {
        let history = vec![buy(1, "ETH", dec!(10), dec!(3000), 0)];
        let prices = FixedPrices(HashMap::from([("ETH".to_string(), dec!(2100))]));
        let scores = FixedScores(Some(90));
        let costs = FixedCosts {
            gas: None,
            slippage: Some(dec!(30)),
        };

        let outcome = HarvestPass::new()
            .run("user1", &history, &prices, &scores, &costs, ts(100))
            .await
            .unwrap();

        let report = &outcome.opportunities[0];
        assert!(report.calculation.is_none());
        assert!(!report.is_recommended());
        assert_eq!(report.classified.risk_tier, RiskTier::High);
    }
}
