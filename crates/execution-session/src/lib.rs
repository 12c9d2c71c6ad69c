//! Execution Session
//!
//! The gated, auditable workflow that carries an approved harvest
//! opportunity through to a realized, recorded trade: a session state
//! machine, a step runner with bounded retry and per-step timeouts, and a
//! registry enforcing at most one active session per (user, opportunity).

pub mod registry;
pub mod runner;
pub mod session;

pub use registry::SessionRegistry;
pub use runner::{RetryPolicy, SessionRunner};
pub use session::{
    ApprovalRecord, ExecutionSession, ExecutionStep, SessionError, SessionFailure, SessionState,
    StepKind, StepStatus,
};
