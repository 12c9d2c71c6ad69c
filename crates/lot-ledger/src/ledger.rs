//! FIFO cost-basis lot accounting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use harvest_core::{HarvestError, Transaction, TransactionKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// When true, lots are grouped per (owner, token) across all wallets;
    /// when false, per (owner, wallet, token).
    pub aggregate_wallets: bool,
    /// Remaining quantity at or below this is treated as fully closed.
    pub dust_epsilon: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            aggregate_wallets: true,
            dust_epsilon: Decimal::new(1, 8), // 1e-8
        }
    }
}

/// A slice of acquired quantity with its own cost basis.
///
/// Owned exclusively by the ledger: created by a buy/transfer-in, consumed
/// oldest-first by sells/transfer-outs. A closed lot is retained for
/// wash-sale lookback and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub owner: String,
    /// Acquiring wallet. None when the ledger aggregates across wallets.
    pub wallet: Option<String>,
    pub token: String,
    /// Sequence of the acquiring transaction, kept so downstream checks can
    /// tell this lot's own acquisition apart from other events at the same
    /// timestamp.
    pub acquired_sequence: u64,
    pub acquired_at: DateTime<Utc>,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub unit_cost_basis: Decimal,
}

impl Lot {
    /// Cost basis of the still-open remainder.
    pub fn remaining_cost_basis(&self) -> Decimal {
        self.remaining_quantity * self.unit_cost_basis
    }
}

/// A realized gain/loss fragment attributable to one source lot.
///
/// Produced when a disposal spans one or more lots; downstream wash-sale
/// matching and year-end reporting key off the source-lot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedDisposal {
    pub lot_id: Uuid,
    pub token: String,
    pub kind: TransactionKind,
    pub quantity: Decimal,
    pub unit_cost_basis: Decimal,
    /// Per-unit proceeds; None for transfer-outs with no sale proceeds.
    pub unit_proceeds: Option<Decimal>,
    /// Realized gain (positive) or loss (negative); zero when no proceeds.
    pub realized_pnl: Decimal,
    pub acquired_at: DateTime<Utc>,
    pub disposed_at: DateTime<Utc>,
}

/// Output of one ledger pass over a full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBook {
    pub open_lots: Vec<Lot>,
    pub closed_lots: Vec<Lot>,
    pub disposals: Vec<RealizedDisposal>,
    dust_epsilon: Decimal,
    /// Net quantity per token acknowledged in the history but deliberately
    /// dropped from open lots as dust (skipped sub-epsilon events plus
    /// sub-epsilon remainders closed early). The conservation check nets
    /// this out so dust handling never accumulates into a false integrity
    /// violation.
    dropped_dust: HashMap<String, Decimal>,
}

impl LedgerBook {
    /// Open lots for one token, in acquisition order.
    pub fn open_lots_for(&self, token: &str) -> Vec<&Lot> {
        self.open_lots.iter().filter(|l| l.token == token).collect()
    }

    /// Total still-open quantity for one token.
    pub fn open_quantity(&self, token: &str) -> Decimal {
        self.open_lots
            .iter()
            .filter(|l| l.token == token)
            .map(|l| l.remaining_quantity)
            .sum()
    }

    /// Conservation invariant: for every token, open quantity must equal
    /// the net quantity implied by the full history, less whatever the
    /// ledger dropped as dust, within the dust tolerance. A mismatch is a
    /// fatal data-integrity error.
    pub fn verify_conservation(&self, history: &[Transaction]) -> Result<(), HarvestError> {
        let mut net: HashMap<&str, Decimal> = HashMap::new();
        for tx in history {
            let entry = net.entry(tx.token.as_str()).or_insert(Decimal::ZERO);
            if tx.kind.is_acquisition() {
                *entry += tx.quantity;
            } else {
                *entry -= tx.quantity;
            }
        }

        for (token, raw) in net {
            let dropped = self
                .dropped_dust
                .get(token)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let expected = raw - dropped;
            let open = self.open_quantity(token);
            if (open - expected).abs() > self.dust_epsilon {
                return Err(HarvestError::DataIntegrity(format!(
                    "lot conservation broken for {token}: open {open}, history implies {expected}"
                )));
            }
        }
        Ok(())
    }
}

/// FIFO lot ledger.
pub struct LotLedger {
    config: LedgerConfig,
}

impl Default for LotLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LotLedger {
    pub fn new() -> Self {
        Self {
            config: LedgerConfig::default(),
        }
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Apply a full, already-sorted transaction history and return the
    /// resulting book of open lots, closed lots, and realized fragments.
    ///
    /// The input must be sorted by (timestamp, sequence); the ledger never
    /// re-sorts silently. An out-of-order event, a negative quantity, or a
    /// priced event missing its price is a validation error. A disposal
    /// exceeding the open quantity is a data-integrity error.
    pub fn apply_transactions(&self, history: &[Transaction]) -> Result<LedgerBook, HarvestError> {
        let eps = self.config.dust_epsilon;
        let mut queues: HashMap<(String, String, String), Vec<Lot>> = HashMap::new();
        let mut closed_lots = Vec::new();
        let mut disposals = Vec::new();
        let mut dropped_dust: HashMap<String, Decimal> = HashMap::new();
        let mut prev_key: Option<(DateTime<Utc>, u64)> = None;

        for tx in history {
            if let Some(prev) = prev_key {
                if tx.ordering_key() < prev {
                    return Err(HarvestError::Validation(format!(
                        "history out of order at sequence {} ({})",
                        tx.sequence, tx.timestamp
                    )));
                }
            }
            prev_key = Some(tx.ordering_key());

            if tx.quantity < Decimal::ZERO {
                return Err(HarvestError::Validation(format!(
                    "negative quantity {} at sequence {}",
                    tx.quantity, tx.sequence
                )));
            }
            if tx.token.trim().is_empty() {
                return Err(HarvestError::Validation(format!(
                    "unknown token at sequence {}",
                    tx.sequence
                )));
            }
            if tx.quantity <= eps {
                // Dust event: no lot to open or consume, but the quantity is
                // still part of the history's net and must be recorded so
                // conservation stays balanced across any number of them.
                let entry = dropped_dust
                    .entry(tx.token.clone())
                    .or_insert(Decimal::ZERO);
                if tx.kind.is_acquisition() {
                    *entry += tx.quantity;
                } else {
                    *entry -= tx.quantity;
                }
                continue;
            }

            let key = self.position_key(tx);
            let queue = queues.entry(key).or_default();

            match tx.kind {
                TransactionKind::Buy | TransactionKind::TransferIn => {
                    let basis = match tx.kind {
                        TransactionKind::Buy => tx.unit_price.ok_or_else(|| {
                            HarvestError::Validation(format!(
                                "buy without unit price at sequence {}",
                                tx.sequence
                            ))
                        })?,
                        // Pure transfer-in with no cost data is a
                        // zero-cost-basis lot (e.g. airdrop).
                        _ => tx.unit_price.unwrap_or(Decimal::ZERO),
                    };
                    if basis < Decimal::ZERO {
                        return Err(HarvestError::Validation(format!(
                            "negative unit price at sequence {}",
                            tx.sequence
                        )));
                    }

                    let lot = Lot {
                        id: Uuid::new_v4(),
                        owner: tx.owner.clone(),
                        wallet: if self.config.aggregate_wallets {
                            None
                        } else {
                            Some(tx.wallet.clone())
                        },
                        token: tx.token.clone(),
                        acquired_sequence: tx.sequence,
                        acquired_at: tx.timestamp,
                        original_quantity: tx.quantity,
                        remaining_quantity: tx.quantity,
                        unit_cost_basis: basis,
                    };
                    tracing::debug!(
                        token = %lot.token,
                        quantity = %lot.original_quantity,
                        basis = %lot.unit_cost_basis,
                        "opened lot"
                    );
                    queue.push(lot);
                }
                TransactionKind::Sell | TransactionKind::TransferOut => {
                    let proceeds = match tx.kind {
                        TransactionKind::Sell => Some(tx.unit_price.ok_or_else(|| {
                            HarvestError::Validation(format!(
                                "sell without proceeds at sequence {}",
                                tx.sequence
                            ))
                        })?),
                        _ => None,
                    };

                    let available: Decimal = queue.iter().map(|l| l.remaining_quantity).sum();
                    if tx.quantity > available + eps {
                        return Err(HarvestError::DataIntegrity(format!(
                            "disposal of {} {} at sequence {} exceeds open quantity {}",
                            tx.quantity, tx.token, tx.sequence, available
                        )));
                    }

                    let mut needed = tx.quantity;
                    while needed > eps {
                        // Queue front is always the oldest open lot.
                        let lot = match queue.first_mut() {
                            Some(l) => l,
                            None => break,
                        };
                        let take = lot.remaining_quantity.min(needed);
                        lot.remaining_quantity -= take;
                        needed -= take;

                        let realized_pnl = proceeds
                            .map(|p| (p - lot.unit_cost_basis) * take)
                            .unwrap_or(Decimal::ZERO);
                        disposals.push(RealizedDisposal {
                            lot_id: lot.id,
                            token: lot.token.clone(),
                            kind: tx.kind,
                            quantity: take,
                            unit_cost_basis: lot.unit_cost_basis,
                            unit_proceeds: proceeds,
                            realized_pnl,
                            acquired_at: lot.acquired_at,
                            disposed_at: tx.timestamp,
                        });
                        tracing::debug!(
                            token = %lot.token,
                            quantity = %take,
                            pnl = %realized_pnl,
                            "consumed lot"
                        );

                        if lot.remaining_quantity <= eps {
                            if lot.remaining_quantity > Decimal::ZERO {
                                *dropped_dust
                                    .entry(lot.token.clone())
                                    .or_insert(Decimal::ZERO) += lot.remaining_quantity;
                            }
                            lot.remaining_quantity = Decimal::ZERO;
                            closed_lots.push(queue.remove(0));
                        }
                    }
                    if needed > Decimal::ZERO {
                        // Disposal exceeded open quantity by a sub-epsilon
                        // sliver already allowed by the availability check.
                        *dropped_dust
                            .entry(tx.token.clone())
                            .or_insert(Decimal::ZERO) -= needed;
                    }
                }
            }
        }

        let mut open_lots: Vec<Lot> = queues.into_values().flatten().collect();
        open_lots.sort_by(|a, b| {
            a.acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| a.token.cmp(&b.token))
        });

        let book = LedgerBook {
            open_lots,
            closed_lots,
            disposals,
            dust_epsilon: eps,
            dropped_dust,
        };
        book.verify_conservation(history)?;
        Ok(book)
    }

    fn position_key(&self, tx: &Transaction) -> (String, String, String) {
        if self.config.aggregate_wallets {
            (tx.owner.clone(), String::new(), tx.token.clone())
        } else {
            (tx.owner.clone(), tx.wallet.clone(), tx.token.clone())
        }
    }
}
