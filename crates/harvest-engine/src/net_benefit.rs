//! Net-Benefit Calculator
//!
//! The financial case for realizing one loss: tax saved minus execution
//! costs, plus secondary metrics. Pure, side-effect free, and recomputable;
//! a calculation is never authoritative unless costs and prices are fresh.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Descriptive payback estimate derived from the cost-to-savings ratio.
/// An estimate, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaybackEstimate {
    /// Costs are negligible next to the savings (or zero).
    Immediate,
    /// Costs recovered within the current tax year's savings.
    WithinTaxYear,
    /// Costs exceed the savings; the harvest never pays for itself.
    BeyondSavings,
    /// No savings to recover against.
    NotApplicable,
}

/// The terminal decision object for one opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestCalculation {
    /// Loss magnitude (positive), in currency units.
    pub loss_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_savings: Decimal,
    pub gas_cost: Decimal,
    pub slippage_cost: Decimal,
    pub fee_cost: Decimal,
    pub total_costs: Decimal,
    /// Signed: tax savings minus total costs.
    pub net_benefit: Decimal,
    /// True only when net benefit is strictly positive.
    pub recommended: bool,
    /// None when total costs are zero (infinite, not divided).
    pub benefit_cost_ratio: Option<Decimal>,
    /// net_benefit / tax_savings as a percentage, clamped to 0-100.
    pub efficiency_score: Decimal,
    /// Tax rate at which the harvest would exactly break even.
    pub break_even_tax_rate: Option<Decimal>,
    pub payback: PaybackEstimate,
}

/// Compute the harvest calculation for one loss.
///
/// `loss` may be passed signed or as a magnitude; only its absolute value
/// matters. Cost components are summed commutatively.
pub fn calculate(
    loss: Decimal,
    tax_rate: Decimal,
    gas: Decimal,
    slippage: Decimal,
    fees: Decimal,
) -> HarvestCalculation {
    let loss_amount = loss.abs();
    let tax_savings = loss_amount * tax_rate;
    let total_costs = gas + slippage + fees;
    let net_benefit = tax_savings - total_costs;
    let recommended = net_benefit > Decimal::ZERO;

    let benefit_cost_ratio = if total_costs.is_zero() {
        None
    } else {
        Some(net_benefit / total_costs)
    };

    let efficiency_score = if tax_savings.is_zero() {
        Decimal::ZERO
    } else {
        (net_benefit / tax_savings * Decimal::ONE_HUNDRED)
            .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
    };

    let break_even_tax_rate = if loss_amount.is_zero() {
        None
    } else {
        Some(total_costs / loss_amount)
    };

    let payback = if tax_savings.is_zero() {
        PaybackEstimate::NotApplicable
    } else {
        let ratio = total_costs / tax_savings;
        if ratio <= Decimal::new(1, 1) {
            PaybackEstimate::Immediate
        } else if ratio <= Decimal::ONE {
            PaybackEstimate::WithinTaxYear
        } else {
            PaybackEstimate::BeyondSavings
        }
    };

    HarvestCalculation {
        loss_amount,
        tax_rate,
        tax_savings,
        gas_cost: gas,
        slippage_cost: slippage,
        fee_cost: fees,
        total_costs,
        net_benefit,
        recommended,
        benefit_cost_ratio,
        efficiency_score,
        break_even_tax_rate,
        payback,
    }
}
