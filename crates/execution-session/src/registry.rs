//! Active-session registry.
//!
//! Enforces the orchestrator-level concurrency invariant: at most one
//! non-terminal session per (user, opportunity) key. Creation of a second
//! one is rejected with a conflict, never queued.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use harvest_engine::ClassifiedOpportunity;
use uuid::Uuid;

use crate::session::{ExecutionSession, SessionError};

#[derive(Default)]
pub struct SessionRegistry {
    active: DashMap<(String, String), Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a draft session for a user committing to an
    /// opportunity. Fails with `SessionError::Conflict` while another
    /// session for the same key is still live.
    pub fn open(
        &self,
        user: &str,
        opportunity: ClassifiedOpportunity,
    ) -> Result<ExecutionSession, SessionError> {
        let key = (user.to_string(), opportunity.key());
        match self.active.entry(key) {
            Entry::Occupied(occupied) => Err(SessionError::Conflict {
                user: user.to_string(),
                opportunity_key: opportunity.key(),
                existing: *occupied.get(),
            }),
            Entry::Vacant(vacant) => {
                let session = ExecutionSession::new(user, opportunity);
                vacant.insert(session.id);
                tracing::debug!(session = %session.id, user, "session registered");
                Ok(session)
            }
        }
    }

    /// Release a session's key once it has reached a terminal state. A
    /// non-terminal session stays registered.
    pub fn release(&self, session: &ExecutionSession) {
        if !session.state.is_terminal() {
            return;
        }
        let key = (session.user.clone(), session.opportunity_key.clone());
        self.active.remove_if(&key, |_, id| *id == session.id);
    }

    pub fn is_active(&self, user: &str, opportunity_key: &str) -> bool {
        self.active
            .contains_key(&(user.to_string(), opportunity_key.to_string()))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use harvest_core::{HoldingPeriod, RiskTier};
    use harvest_engine::detector::HarvestCandidate;
    use harvest_engine::eligibility::{EligibleOpportunity, WashSaleWindow};
    use harvest_engine::risk::CostInputs;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_opportunity() -> ClassifiedOpportunity {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ClassifiedOpportunity {
            opportunity: EligibleOpportunity {
                candidate: HarvestCandidate {
                    token: "ETH".to_string(),
                    lot_id: Uuid::new_v4(),
                    wallet: None,
                    quantity: dec!(10),
                    unit_cost_basis: dec!(3000),
                    current_price: dec!(2100),
                    unrealized_pnl: dec!(-9000),
                    pnl_percent: Some(dec!(-30)),
                    holding_days: 100,
                    holding_period: HoldingPeriod::ShortTerm,
                    days_until_long_term: Some(266),
                    acquired_sequence: 1,
                    acquired_at: as_of - chrono::Duration::days(100),
                },
                wash_sale_window: WashSaleWindow::around(as_of.date_naive(), 30),
            },
            risk_tier: RiskTier::Low,
            security_score: Some(90),
            score_band: RiskTier::Low,
            cost_band: RiskTier::Low,
            costs: Some(CostInputs {
                gas: dec!(50),
                slippage: dec!(30),
                fee: dec!(20),
            }),
        }
    }

    #[test]
    fn test_second_active_session_conflicts() {
        let registry = SessionRegistry::new();
        let opportunity = sample_opportunity();

        let first = registry.open("user1", opportunity.clone()).unwrap();
        let err = registry.open("user1", opportunity.clone()).unwrap_err();
        match err {
            SessionError::Conflict { existing, .. } => assert_eq!(existing, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }

        // A different user is an independent key.
        assert!(registry.open("user2", opportunity).is_ok());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_terminal_session_frees_the_key() {
        let registry = SessionRegistry::new();
        let opportunity = sample_opportunity();

        let mut session = registry.open("user1", opportunity.clone()).unwrap();

        // Still active: release is a no-op.
        registry.release(&session);
        assert!(registry.is_active("user1", &session.opportunity_key));

        session.cancel().unwrap();
        registry.release(&session);
        assert!(!registry.is_active("user1", &session.opportunity_key));

        // Key is free for a fresh attempt.
        assert!(registry.open("user1", opportunity).is_ok());
    }
}
