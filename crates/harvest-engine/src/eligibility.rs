//! Eligibility Filter
//!
//! Applies wash-sale, minimum-loss, and duplicate-suppression rules to
//! harvest candidates. Pure and side-effect free: rejections are simply
//! excluded from the output, never errors.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use harvest_core::Transaction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detector::HarvestCandidate;
use crate::HarvestConfig;

/// The wash-sale window around a prospective sale date. Acquiring the same
/// token anywhere inside it disallows the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashSaleWindow {
    pub starts: NaiveDate,
    pub ends: NaiveDate,
}

impl WashSaleWindow {
    /// Window centered on the sale date, `window_days` on each side.
    pub fn around(sale_date: NaiveDate, window_days: i64) -> Self {
        Self {
            starts: sale_date - Duration::days(window_days),
            ends: sale_date + Duration::days(window_days),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.starts && date <= self.ends
    }
}

/// A candidate that passed every eligibility rule.
///
/// Only the backward-looking half of the wash-sale window can be checked at
/// decision time; the forward-looking half must be re-checked by the caller
/// immediately before execution commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleOpportunity {
    pub candidate: HarvestCandidate,
    /// Full window around the prospective sale date.
    pub wash_sale_window: WashSaleWindow,
}

impl EligibleOpportunity {
    /// Suppression key: at most one opportunity per (token, lot) per pass.
    pub fn suppression_key(&self) -> (String, Uuid) {
        (self.candidate.token.clone(), self.candidate.lot_id)
    }
}

/// Filter candidates against the full transaction history as of the
/// prospective sale instant.
pub fn filter(
    candidates: Vec<HarvestCandidate>,
    history: &[Transaction],
    as_of: DateTime<Utc>,
    config: &HarvestConfig,
) -> Vec<EligibleOpportunity> {
    let sale_date = as_of.date_naive();
    let mut by_key: HashMap<(String, Uuid), EligibleOpportunity> = HashMap::new();

    for candidate in candidates {
        if candidate.loss_amount() < config.min_loss_threshold {
            continue;
        }

        if let Some(acquired) = recent_acquisition(
            history,
            &candidate,
            sale_date,
            config.wash_sale_window_days,
        ) {
            tracing::debug!(
                token = %candidate.token,
                acquired = %acquired,
                "candidate rejected: acquisition inside wash-sale window"
            );
            continue;
        }

        let opportunity = EligibleOpportunity {
            wash_sale_window: WashSaleWindow::around(sale_date, config.wash_sale_window_days),
            candidate,
        };

        // Duplicate suppression: keep the larger loss per (token, lot).
        let key = opportunity.suppression_key();
        match by_key.get(&key) {
            Some(existing)
                if existing.candidate.loss_amount() >= opportunity.candidate.loss_amount() => {}
            _ => {
                by_key.insert(key, opportunity);
            }
        }
    }

    let mut eligible: Vec<_> = by_key.into_values().collect();
    eligible.sort_by(|a, b| {
        b.candidate
            .loss_amount()
            .cmp(&a.candidate.loss_amount())
            .then_with(|| a.candidate.token.cmp(&b.candidate.token))
    });
    eligible
}

/// Backward-looking wash-sale check: the date of the most recent acquisition
/// of the candidate's token within the lookback window, if any.
///
/// The acquisition that created the candidate lot itself does not count: a
/// lot bought and sold with no other purchase retains no replacement
/// position, so its loss is not disallowed. The exclusion is keyed on the
/// originating sequence, not the timestamp, so a separate repurchase at the
/// exact same instant still disqualifies.
fn recent_acquisition(
    history: &[Transaction],
    candidate: &HarvestCandidate,
    sale_date: NaiveDate,
    window_days: i64,
) -> Option<NaiveDate> {
    let window_start = sale_date - Duration::days(window_days);

    history
        .iter()
        .filter(|tx| tx.kind.is_acquisition() && tx.token == candidate.token)
        .filter(|tx| tx.sequence != candidate.acquired_sequence)
        .map(|tx| tx.timestamp.date_naive())
        .filter(|d| *d >= window_start && *d <= sale_date)
        .max()
}
