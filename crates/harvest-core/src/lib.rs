//! Harvest Core
//!
//! Shared data model, error taxonomy, and collaborator traits for the
//! tax-loss harvesting decision engine. The engine itself is a computation
//! library: ingestion, price feeds, storage, and trade routing all live
//! behind the traits defined here.

pub mod error;
pub mod traits;
pub mod types;

pub use error::HarvestError;
pub use traits::{
    ApprovalGate, CostEstimator, ExecutionAction, ExecutionConfirmation, ExecutionProvider,
    ExecutionRequest, HistorySource, PriceSource, ScreeningOutcome, SecurityScoreProvider,
    SubmitError,
};
pub use types::{HoldingPeriod, Provenance, RiskTier, Transaction, TransactionKind};
