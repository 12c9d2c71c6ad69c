//! Session state machine and audit record.

use chrono::{DateTime, Utc};
use harvest_core::ExecutionConfirmation;
use harvest_engine::ClassifiedOpportunity;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session lifecycle:
/// `Draft -> (AwaitingApproval |) Executing -> {Completed, Failed, Cancelled}`.
///
/// `Cancelled` is reachable from `Draft` and `AwaitingApproval` only; a
/// session that has started executing is never cancelled, to avoid
/// orphaning a half-submitted on-chain action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Draft,
    AwaitingApproval,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Draft => write!(f, "draft"),
            SessionState::AwaitingApproval => write!(f, "awaiting-approval"),
            SessionState::Executing => write!(f, "executing"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The ordered steps every harvest execution runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SubmitSale,
    AwaitConfirmation,
    RecordRealizedLoss,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::SubmitSale => write!(f, "submit-sale"),
            StepKind::AwaitConfirmation => write!(f, "await-confirmation"),
            StepKind::RecordRealizedLoss => write!(f, "record-realized-loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// One atomic unit of a session. Owned by its parent session, never shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub kind: StepKind,
    pub status: StepStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub confirmation: Option<ExecutionConfirmation>,
}

impl ExecutionStep {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
            confirmation: None,
        }
    }
}

/// Maker/checker sign-off metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    /// Why approval was required (dual-control policy, screening flag).
    pub reason: String,
}

/// The step and cause that failed a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFailure {
    pub step: StepKind,
    pub cause: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// A non-terminal session already exists for this (user, opportunity).
    #[error("active session {existing} already exists for {user}/{opportunity_key}")]
    Conflict {
        user: String,
        opportunity_key: String,
        existing: Uuid,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// The approval gate itself failed; the session cannot proceed safely.
    #[error("approval gate error: {0}")]
    GateUnavailable(String),
}

/// A mutable execution workflow while live; an immutable audit record once
/// terminal. Partial progress is preserved, never rolled back: on-chain
/// actions already taken are not reversible by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub user: String,
    /// Stable (token, lot) identity used for the concurrency invariant.
    pub opportunity_key: String,
    /// Snapshot of the opportunity the user committed to.
    pub opportunity: ClassifiedOpportunity,
    pub state: SessionState,
    pub steps: Vec<ExecutionStep>,
    pub approval: Option<ApprovalRecord>,
    pub failure: Option<SessionFailure>,
    /// Realized loss actually achieved; may differ from the estimate if
    /// the market moved between detection and fill.
    pub realized_loss: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionSession {
    /// Create a draft session for a user committing to one opportunity.
    pub fn new(user: impl Into<String>, opportunity: ClassifiedOpportunity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            opportunity_key: opportunity.key(),
            opportunity,
            state: SessionState::Draft,
            steps: vec![
                ExecutionStep::new(StepKind::SubmitSale),
                ExecutionStep::new(StepKind::AwaitConfirmation),
                ExecutionStep::new(StepKind::RecordRealizedLoss),
            ],
            approval: None,
            failure: None,
            realized_loss: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self, kind: StepKind) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    pub(crate) fn step_mut(&mut self, kind: StepKind) -> &mut ExecutionStep {
        self.steps
            .iter_mut()
            .find(|s| s.kind == kind)
            .expect("session steps are fixed at construction")
    }

    /// Park the session behind the dual-control gate.
    pub fn require_approval(&mut self, reason: impl Into<String>) -> Result<(), SessionError> {
        self.transition(SessionState::Draft, SessionState::AwaitingApproval)?;
        self.approval = Some(ApprovalRecord {
            approved_by: String::new(),
            approved_at: self.updated_at,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Record the checker's sign-off. The session stays in
    /// `AwaitingApproval` until the runner picks it back up.
    pub fn approve(&mut self, approver: impl Into<String>) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingApproval {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::AwaitingApproval,
            });
        }
        let record = self
            .approval
            .get_or_insert_with(|| ApprovalRecord {
                approved_by: String::new(),
                approved_at: Utc::now(),
                reason: "dual-control".to_string(),
            });
        record.approved_by = approver.into();
        record.approved_at = Utc::now();
        self.touch();
        Ok(())
    }

    pub fn is_approved(&self) -> bool {
        self.approval
            .as_ref()
            .map(|a| !a.approved_by.is_empty())
            .unwrap_or(false)
    }

    /// Enter `Executing` from `Draft`, or from `AwaitingApproval` once the
    /// checker has signed off.
    pub fn begin_execution(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Draft => {}
            SessionState::AwaitingApproval if self.is_approved() => {}
            from => {
                return Err(SessionError::InvalidTransition {
                    from,
                    to: SessionState::Executing,
                })
            }
        }
        self.state = SessionState::Executing;
        self.touch();
        tracing::info!(session = %self.id, user = %self.user, "session executing");
        Ok(())
    }

    /// User- or operator-initiated cancellation. Allowed only before
    /// execution starts.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Draft | SessionState::AwaitingApproval => {
                for step in &mut self.steps {
                    step.status = StepStatus::Skipped;
                }
                self.state = SessionState::Cancelled;
                self.touch();
                tracing::info!(session = %self.id, "session cancelled");
                Ok(())
            }
            from => Err(SessionError::InvalidTransition {
                from,
                to: SessionState::Cancelled,
            }),
        }
    }

    pub(crate) fn complete(&mut self, realized_loss: Decimal) {
        self.state = SessionState::Completed;
        self.realized_loss = Some(realized_loss);
        self.touch();
        tracing::info!(
            session = %self.id,
            realized_loss = %realized_loss,
            "session completed"
        );
    }

    pub(crate) fn fail(&mut self, step: StepKind, cause: String) {
        // Steps after the failing one stay pending in the audit record;
        // mark them skipped so the record reads unambiguously.
        let mut past_failure = false;
        for s in &mut self.steps {
            if s.kind == step {
                past_failure = true;
                continue;
            }
            if past_failure && s.status == StepStatus::Pending {
                s.status = StepStatus::Skipped;
            }
        }
        self.failure = Some(SessionFailure {
            step,
            cause: cause.clone(),
            failed_at: Utc::now(),
        });
        self.state = SessionState::Failed;
        self.touch();
        tracing::warn!(session = %self.id, step = %step, cause = %cause, "session failed");
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::sample_opportunity;

    #[test]
    fn test_draft_to_executing() {
        let mut session = ExecutionSession::new("user1", sample_opportunity());
        assert_eq!(session.state, SessionState::Draft);
        session.begin_execution().unwrap();
        assert_eq!(session.state, SessionState::Executing);
    }

    #[test]
    fn test_approval_gate_path() {
        let mut session = ExecutionSession::new("user1", sample_opportunity());
        session.require_approval("dual-control policy").unwrap();
        assert_eq!(session.state, SessionState::AwaitingApproval);

        // Not approved yet: execution must not start.
        assert!(session.begin_execution().is_err());

        session.approve("checker1").unwrap();
        session.begin_execution().unwrap();
        assert_eq!(session.state, SessionState::Executing);
        assert_eq!(session.approval.as_ref().unwrap().approved_by, "checker1");
    }

    #[test]
    fn test_cancel_from_draft_and_awaiting_only() {
        let mut session = ExecutionSession::new("user1", sample_opportunity());
        session.cancel().unwrap();
        assert_eq!(session.state, SessionState::Cancelled);
        assert!(session.steps.iter().all(|s| s.status == StepStatus::Skipped));

        let mut session = ExecutionSession::new("user1", sample_opportunity());
        session.begin_execution().unwrap();
        let err = session.cancel().unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failure_records_step_and_cause() {
        let mut session = ExecutionSession::new("user1", sample_opportunity());
        session.begin_execution().unwrap();
        session.fail(StepKind::SubmitSale, "rejected by venue".to_string());

        assert_eq!(session.state, SessionState::Failed);
        let failure = session.failure.as_ref().unwrap();
        assert_eq!(failure.step, StepKind::SubmitSale);
        assert_eq!(failure.cause, "rejected by venue");
        // Later steps skipped, not silently pending.
        assert_eq!(
            session.step(StepKind::AwaitConfirmation).unwrap().status,
            StepStatus::Skipped
        );
    }
}
