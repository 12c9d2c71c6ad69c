//! Harvest Engine
//!
//! The harvest-decision pipeline: evaluates open lots against live prices,
//! filters out positions disqualified by wash-sale or threshold rules,
//! assigns a risk tier from external signals, and quantifies the net
//! financial benefit of realizing each loss.

pub mod detector;
pub mod eligibility;
pub mod net_benefit;
pub mod pass;
pub mod risk;

pub use detector::HarvestCandidate;
pub use eligibility::{EligibleOpportunity, WashSaleWindow};
pub use net_benefit::{HarvestCalculation, PaybackEstimate};
pub use pass::{HarvestPass, OpportunityReport, PassOutcome, PassSummary};
pub use risk::{ClassifiedOpportunity, CostInputs, RiskBands};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine-wide thresholds. Named configuration rather than embedded
/// constants so jurisdictions/products can tune them without touching the
/// algorithms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Minimum loss magnitude worth recommending, in currency units.
    pub min_loss_threshold: Decimal,
    /// Whole days of holding after which a position is long-term.
    /// The boundary is exclusive: exactly this many days is still short-term.
    pub long_term_threshold_days: i64,
    /// Wash-sale lookback window in days before the prospective sale date.
    pub wash_sale_window_days: i64,
    /// Remaining quantity at or below this is skipped as dust.
    pub dust_epsilon: Decimal,
    /// Flat tax rate applied to realized losses.
    pub tax_rate: Decimal,
    /// Flat venue/protocol fee per harvest trade, in currency units.
    pub trading_fee: Decimal,
    /// Cap on opportunities returned by one pass.
    pub max_opportunities: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_loss_threshold: Decimal::new(50, 0),
            long_term_threshold_days: 365,
            wash_sale_window_days: 30,
            dust_epsilon: Decimal::new(1, 8),
            tax_rate: Decimal::new(24, 2), // 0.24
            trading_fee: Decimal::ZERO,
            max_opportunities: 20,
        }
    }
}
