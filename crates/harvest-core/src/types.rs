//! Core data model shared by every engine stage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of a normalized transaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Buy,
    Sell,
    TransferIn,
    TransferOut,
}

impl TransactionKind {
    /// Whether this event adds quantity to the position (creates a lot).
    pub fn is_acquisition(&self) -> bool {
        matches!(self, TransactionKind::Buy | TransactionKind::TransferIn)
    }

    /// Whether this event removes quantity from the position (consumes lots).
    pub fn is_disposal(&self) -> bool {
        matches!(self, TransactionKind::Sell | TransactionKind::TransferOut)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Buy => write!(f, "buy"),
            TransactionKind::Sell => write!(f, "sell"),
            TransactionKind::TransferIn => write!(f, "transfer-in"),
            TransactionKind::TransferOut => write!(f, "transfer-out"),
        }
    }
}

/// Source metadata for observability and idempotency tracing. Carried
/// opaquely through the engine; never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub method: String,
    pub request_id: String,
}

/// An immutable, timestamped event for one (owner, wallet, token).
///
/// Created once by ingestion and never mutated. The canonical ordering key
/// is (timestamp, sequence); `sequence` is the stable ingestion tiebreak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable ingestion sequence number, unique per owner.
    pub sequence: u64,
    /// Tax-owner identity (may span multiple wallets).
    pub owner: String,
    /// Physical wallet or exchange account the event occurred in.
    pub wallet: String,
    /// Token symbol.
    pub token: String,
    pub kind: TransactionKind,
    /// Quantity moved; always non-negative.
    pub quantity: Decimal,
    /// Unit price (buys/sells) or per-unit cost data for transfers.
    /// None for pure transfers with no cost data (e.g. airdrops).
    pub unit_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub provenance: Option<Provenance>,
}

impl Transaction {
    /// Canonical ordering key: timestamp first, ingestion sequence as tiebreak.
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Holding-period classification. Long-term requires strictly more than the
/// configured threshold (365 whole days by default: day 365 is still
/// short-term, day 366 is long-term).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

impl std::fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldingPeriod::ShortTerm => write!(f, "short-term"),
            HoldingPeriod::LongTerm => write!(f, "long-term"),
        }
    }
}

/// Risk tier for a classified opportunity. Ordered so that the more
/// conservative tier compares greater; combining signals takes the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "LOW"),
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(TransactionKind::Buy.is_acquisition());
        assert!(TransactionKind::TransferIn.is_acquisition());
        assert!(TransactionKind::Sell.is_disposal());
        assert!(TransactionKind::TransferOut.is_disposal());
        assert!(!TransactionKind::Buy.is_disposal());
    }

    #[test]
    fn test_risk_tier_ordering() {
        assert!(RiskTier::High > RiskTier::Medium);
        assert!(RiskTier::Medium > RiskTier::Low);
        assert_eq!(RiskTier::Medium.max(RiskTier::High), RiskTier::High);
    }
}
