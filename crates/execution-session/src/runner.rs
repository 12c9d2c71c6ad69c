//! Step runner.
//!
//! Drives one session through its ordered steps against the execution
//! provider: transient failures retry with bounded exponential backoff,
//! per-step timeouts count as transient, non-transient rejections fail the
//! step immediately. A step is only marked succeeded after the external
//! call has resolved, so no step outruns its durable effect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harvest_core::{
    ApprovalGate, ExecutionAction, ExecutionConfirmation, ExecutionProvider, ExecutionRequest,
    ScreeningOutcome, SubmitError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

use crate::session::{ExecutionSession, SessionError, StepKind, StepStatus};

/// Per-step retry policy. Timeouts apply per step, never per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// First retry delay; doubles on each subsequent attempt.
    pub base_delay: Duration,
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the execution of one session at a time.
pub struct SessionRunner {
    provider: Arc<dyn ExecutionProvider>,
    gate: Arc<dyn ApprovalGate>,
    policy: RetryPolicy,
}

impl SessionRunner {
    pub fn new(provider: Arc<dyn ExecutionProvider>, gate: Arc<dyn ApprovalGate>) -> Self {
        Self {
            provider,
            gate,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(
        provider: Arc<dyn ExecutionProvider>,
        gate: Arc<dyn ApprovalGate>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            gate,
            policy,
        }
    }

    /// Start a draft session: consult the approval/screening gate, then
    /// either park the session awaiting sign-off or run it to a terminal
    /// state. A gate failure is surfaced, never bypassed.
    pub async fn start(&self, session: &mut ExecutionSession) -> Result<(), SessionError> {
        let needs_approval = self
            .gate
            .requires_approval(&session.user, &session.opportunity_key)
            .await
            .map_err(|e| SessionError::GateUnavailable(e.to_string()))?;
        let screening = self
            .gate
            .screen(&session.user)
            .await
            .map_err(|e| SessionError::GateUnavailable(e.to_string()))?;

        if needs_approval || screening == ScreeningOutcome::Flagged {
            let reason = if screening == ScreeningOutcome::Flagged {
                "screening flag"
            } else {
                "dual-control policy"
            };
            session.require_approval(reason)?;
            tracing::info!(session = %session.id, reason, "session awaiting approval");
            return Ok(());
        }

        self.run(session).await
    }

    /// Run an approved (or gate-cleared) session through its steps. Always
    /// leaves the session in a terminal state; a step failure is recorded
    /// on the session, not returned as an error.
    pub async fn run(&self, session: &mut ExecutionSession) -> Result<(), SessionError> {
        session.begin_execution()?;

        let kinds: Vec<StepKind> = session.steps.iter().map(|s| s.kind).collect();
        let mut sale_reference: Option<String> = None;

        for kind in kinds {
            let action = match kind {
                StepKind::SubmitSale => ExecutionAction::SubmitSale,
                StepKind::AwaitConfirmation => ExecutionAction::AwaitConfirmation {
                    reference: sale_reference.clone().unwrap_or_default(),
                },
                StepKind::RecordRealizedLoss => ExecutionAction::RecordRealizedLoss {
                    amount: self.realized_loss(session),
                },
            };

            match self.run_step(session, kind, action).await {
                Ok(confirmation) => {
                    if kind == StepKind::SubmitSale {
                        sale_reference = Some(confirmation.reference.clone());
                    }
                }
                Err(cause) => {
                    session.fail(kind, cause);
                    return Ok(());
                }
            }
        }

        let realized = self.realized_loss(session);
        session.complete(realized);
        Ok(())
    }

    /// Run one step to success or exhaustion. The step transition is only
    /// committed after the provider call resolves.
    async fn run_step(
        &self,
        session: &mut ExecutionSession,
        kind: StepKind,
        action: ExecutionAction,
    ) -> Result<ExecutionConfirmation, String> {
        let request = ExecutionRequest {
            session_id: session.id,
            user: session.user.clone(),
            token: session.opportunity.opportunity.candidate.token.clone(),
            quantity: session.opportunity.opportunity.candidate.quantity,
            action,
        };

        {
            let step = session.step_mut(kind);
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            session.step_mut(kind).attempts = attempt;

            let outcome = timeout(self.policy.step_timeout, self.provider.submit(&request)).await;
            match outcome {
                Ok(Ok(confirmation)) => {
                    let step = session.step_mut(kind);
                    step.status = StepStatus::Succeeded;
                    step.finished_at = Some(Utc::now());
                    step.confirmation = Some(confirmation.clone());
                    step.last_error = None;
                    tracing::info!(session = %session.id, step = %kind, attempt, "step succeeded");
                    return Ok(confirmation);
                }
                Ok(Err(SubmitError::Rejected(cause))) => {
                    let step = session.step_mut(kind);
                    step.status = StepStatus::Failed;
                    step.finished_at = Some(Utc::now());
                    step.last_error = Some(cause.clone());
                    tracing::warn!(session = %session.id, step = %kind, %cause, "step rejected");
                    return Err(cause);
                }
                Ok(Err(SubmitError::Transient(cause))) => {
                    last_error = cause;
                }
                Err(_) => {
                    last_error = format!("step timed out after {:?}", self.policy.step_timeout);
                }
            }

            let step = session.step_mut(kind);
            step.last_error = Some(last_error.clone());
            tracing::warn!(
                session = %session.id,
                step = %kind,
                attempt,
                error = %last_error,
                "transient step failure"
            );

            if attempt < self.policy.max_attempts {
                let delay = self.policy.base_delay * 2u32.pow(attempt - 1);
                sleep(delay).await;
            }
        }

        let cause = format!(
            "exhausted {} attempts: {last_error}",
            self.policy.max_attempts
        );
        let step = session.step_mut(kind);
        step.status = StepStatus::Failed;
        step.finished_at = Some(Utc::now());
        Err(cause)
    }

    /// Realized loss actually achieved: the provider-reported amount when
    /// available, otherwise recomputed from the confirmed fill price,
    /// falling back to the detection-time estimate.
    fn realized_loss(&self, session: &ExecutionSession) -> Decimal {
        if let Some(amount) = session
            .step(StepKind::RecordRealizedLoss)
            .and_then(|s| s.confirmation.as_ref())
            .and_then(|c| c.realized_amount)
        {
            return amount;
        }

        let candidate = &session.opportunity.opportunity.candidate;
        if let Some(fill_price) = session
            .step(StepKind::AwaitConfirmation)
            .and_then(|s| s.confirmation.as_ref())
            .and_then(|c| c.fill_price)
        {
            return (candidate.unit_cost_basis - fill_price) * candidate.quantity;
        }
        candidate.loss_amount()
    }
}
