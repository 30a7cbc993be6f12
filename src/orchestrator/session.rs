//! Orchestration session state.
//!
//! A session carries one intent through the authorize-then-act sequence.
//! State moves only through [`OrchestrationSession::advance`], which
//! rejects transitions outside the machine; everything else on the record
//! is bookkeeping the engine and its callers read.
//!
//! At most one transaction is in flight per session. The `pending` slot
//! holds its handle and survives a timed-out wait, which is what makes a
//! later resume possible without resubmitting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::classify::ClassifiedError;
use crate::fees::FeeBreakdown;
use crate::ledger::{PendingTransaction, TxReceipt};
use crate::types::{ExternalId, TransactionIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Authorizing,
    AwaitingAuthorization,
    Acting,
    AwaitingAction,
    Succeeded,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded | SessionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Authorizing => "authorizing",
            SessionState::AwaitingAuthorization => "awaiting_authorization",
            SessionState::Acting => "acting",
            SessionState::AwaitingAction => "awaiting_action",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed => "failed",
        }
    }

    fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match self {
            Idle => matches!(next, Authorizing | Acting | Failed),
            Authorizing => matches!(next, AwaitingAuthorization | Failed),
            // Back to Authorizing when the confirmed allowance still does
            // not cover the total.
            AwaitingAuthorization => matches!(next, Acting | Authorizing | Failed),
            Acting => matches!(next, AwaitingAction | Authorizing | Failed),
            // Acting again on an identifier retry, Authorizing again on an
            // allowance revert.
            AwaitingAction => matches!(next, Succeeded | Acting | Authorizing | Failed),
            Succeeded | Failed => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which leg of the two-phase sequence a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Authorization,
    Action,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Authorization => "authorization",
            Phase::Action => "action",
        }
    }
}

/// The single in-flight transaction of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPhase {
    pub phase: Phase,
    pub tx: PendingTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// How one driving pass over a session ended.
///
/// `TimedOut` is not terminal: the session keeps its pending handle and
/// can be resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Succeeded {
        receipt: TxReceipt,
        external_id: ExternalId,
    },
    Failed(ClassifiedError),
    TimedOut {
        phase: Phase,
    },
}

impl SessionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionOutcome::TimedOut { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Succeeded { .. } => "succeeded",
            SessionOutcome::Failed(_) => "failed",
            SessionOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

#[derive(Debug)]
pub struct OrchestrationSession {
    pub id: Uuid,
    pub intent: TransactionIntent,
    /// Fee breakdown fixed at session creation; the required total never
    /// changes mid-session.
    pub breakdown: FeeBreakdown,
    state: SessionState,
    /// Action submissions so far, identifier retries included.
    pub(crate) attempts: u32,
    /// Authorization rounds so far, the initial one included.
    pub(crate) auth_rounds: u32,
    pub(crate) external_id: Option<ExternalId>,
    pub(crate) pending: Option<PendingPhase>,
    pub(crate) last_error: Option<ClassifiedError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationSession {
    pub fn new(intent: TransactionIntent, breakdown: FeeBreakdown) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            intent,
            breakdown,
            state: SessionState::Idle,
            attempts: 0,
            auth_rounds: 0,
            external_id: None,
            pending: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn auth_rounds(&self) -> u32 {
        self.auth_rounds
    }

    /// Identifier carried by the most recent action submission.
    pub fn external_id(&self) -> Option<&ExternalId> {
        self.external_id.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingPhase> {
        self.pending.as_ref()
    }

    pub fn last_error(&self) -> Option<&ClassifiedError> {
        self.last_error.as_ref()
    }

    pub(crate) fn advance(&mut self, next: SessionState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        debug!(session = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn set_pending(&mut self, phase: Phase, tx: PendingTransaction) {
        self.pending = Some(PendingPhase { phase, tx });
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = None;
    }

    pub(crate) fn note_failure(&mut self, err: ClassifiedError) {
        self.last_error = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees;
    use crate::types::{ActionKind, Address, SpendPolicy};
    use serde_json::json;

    fn session() -> OrchestrationSession {
        let intent = TransactionIntent::new(
            ActionKind::List,
            1_000,
            SpendPolicy::flat(42),
            Address::new("0xmarketplace"),
            json!({}),
        )
        .unwrap();
        let breakdown = fees::required_spend(intent.principal, &intent.policy).unwrap();
        OrchestrationSession::new(intent, breakdown)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        for next in [
            SessionState::Authorizing,
            SessionState::AwaitingAuthorization,
            SessionState::Acting,
            SessionState::AwaitingAction,
            SessionState::Succeeded,
        ] {
            s.advance(next).unwrap();
        }
        assert!(s.state().is_terminal());
    }

    #[test]
    fn test_recovery_transitions() {
        // Re-authorization after a confirmed but insufficient approval.
        let mut s = session();
        s.advance(SessionState::Authorizing).unwrap();
        s.advance(SessionState::AwaitingAuthorization).unwrap();
        s.advance(SessionState::Authorizing).unwrap();

        // Identifier retry loops Acting through AwaitingAction.
        let mut s = session();
        s.advance(SessionState::Acting).unwrap();
        s.advance(SessionState::AwaitingAction).unwrap();
        s.advance(SessionState::Acting).unwrap();

        // Allowance revert at action time goes back to Authorizing.
        let mut s = session();
        s.advance(SessionState::Acting).unwrap();
        s.advance(SessionState::AwaitingAction).unwrap();
        s.advance(SessionState::Authorizing).unwrap();
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut s = session();
        assert!(s.advance(SessionState::AwaitingAction).is_err());
        assert!(s.advance(SessionState::Succeeded).is_err());

        s.advance(SessionState::Acting).unwrap();
        s.advance(SessionState::AwaitingAction).unwrap();
        s.advance(SessionState::Succeeded).unwrap();
        // Terminal states accept nothing.
        let err = s.advance(SessionState::Idle).unwrap_err();
        assert_eq!(err.from, SessionState::Succeeded);
    }

    #[test]
    fn test_skip_authorization_path() {
        let mut s = session();
        s.advance(SessionState::Acting).unwrap();
        assert_eq!(s.state(), SessionState::Acting);
    }

    #[test]
    fn test_outcome_terminality() {
        assert!(!SessionOutcome::TimedOut {
            phase: Phase::Action
        }
        .is_terminal());
        assert!(SessionOutcome::Failed(crate::classify::ClassifiedError::user_rejected())
            .is_terminal());
    }
}
