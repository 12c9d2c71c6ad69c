//! Abstract collaborator interfaces consumed by the engine.
//!
//! Shapes only, no transport detail. Unavailable data is an `Ok(None)`,
//! never an error: a missing price excludes the token from detection and a
//! missing security score fails closed to HIGH risk.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::Transaction;

/// Live market price lookup.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current price for a token, or None when no quote is available.
    async fn get_price(&self, token: &str) -> Result<Option<Decimal>>;
}

/// Pre-normalized transaction history, sorted by the canonical ordering key.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn get_transactions(&self, owner: &str) -> Result<Vec<Transaction>>;
}

/// Third-party token security score, 0-100 (higher is safer).
#[async_trait]
pub trait SecurityScoreProvider: Send + Sync {
    /// None means the token has not been vetted; callers must fail closed.
    async fn get_score(&self, token: &str) -> Result<Option<u8>>;
}

/// On-chain gas and market slippage estimates, in currency units.
#[async_trait]
pub trait CostEstimator: Send + Sync {
    async fn estimate_gas(&self, token: &str, quantity: Decimal) -> Result<Option<Decimal>>;

    async fn estimate_slippage(&self, token: &str, quantity: Decimal) -> Result<Option<Decimal>>;
}

// ---------------------------------------------------------------------------
// Execution provider (chain/exchange submission)
// ---------------------------------------------------------------------------

/// What an execution step asks the provider to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ExecutionAction {
    /// Submit the loss-realizing sell order.
    SubmitSale,
    /// Await durable confirmation of a prior submission.
    AwaitConfirmation { reference: String },
    /// Record the realized loss for downstream reporting.
    RecordRealizedLoss { amount: Decimal },
}

/// One unit of work handed to the execution provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub session_id: Uuid,
    pub user: String,
    pub token: String,
    pub quantity: Decimal,
    pub action: ExecutionAction,
}

/// Durable acknowledgement from the execution provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfirmation {
    /// Provider-side reference (tx hash, order id, record id).
    pub reference: String,
    pub executed_at: DateTime<Utc>,
    /// Fill price, when the action produced one.
    pub fill_price: Option<Decimal>,
    /// Realized loss actually achieved, when the provider reports it.
    pub realized_amount: Option<Decimal>,
}

/// Submission failure, classified for retry handling.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Worth retrying: network timeout, congestion, provider hiccup.
    #[error("transient execution failure: {0}")]
    Transient(String),

    /// Not worth retrying: rejected transaction, screening block.
    #[error("submission rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    async fn submit(&self, request: &ExecutionRequest)
        -> Result<ExecutionConfirmation, SubmitError>;
}

// ---------------------------------------------------------------------------
// Approval / screening gate
// ---------------------------------------------------------------------------

/// Result of a sanctions/KYT screen on a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Clear,
    Flagged,
}

/// Capability check injected into the execution state machine so the
/// maker/checker gate is a policy decision, not a hard-coded tier branch.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Whether this (user, opportunity) pair needs dual-control sign-off.
    async fn requires_approval(&self, user: &str, opportunity_key: &str) -> Result<bool>;

    /// Sanctions/KYT screen on the counterparty.
    async fn screen(&self, counterparty: &str) -> Result<ScreeningOutcome>;
}
