//! Structured logging for orchestration sessions.

use uuid::Uuid;

use crate::classify::ClassifiedError;
use crate::observability::CorrelationId;
use crate::types::{ActionKind, Amount, TxHash};

/// Structured logger scoped to one orchestration session.
///
/// Every line carries the session's correlation id, so a ticket naming a
/// session resolves to its full ledger history with one filter.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    correlation_id: CorrelationId,
}

impl SessionLogger {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn for_session(session_id: Uuid) -> Self {
        Self::new(CorrelationId::for_session(session_id))
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_session_opened(&self, kind: ActionKind, principal: Amount, total: Amount) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            kind = %kind,
            principal = %principal,
            total_spend = %total,
            "Session opened"
        );
    }

    pub fn log_authorization_submitted(&self, tx_hash: &TxHash, amount: Amount) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            tx_hash = %tx_hash,
            amount = %amount,
            "Authorization submitted"
        );
    }

    pub fn log_authorization_confirmed(&self, tx_hash: &TxHash, block_number: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            tx_hash = %tx_hash,
            block_number = %block_number,
            "Authorization confirmed"
        );
    }

    pub fn log_action_submitted(&self, external_id: &str, tx_hash: &TxHash, attempt: u32) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            external_id = %external_id,
            tx_hash = %tx_hash,
            attempt = %attempt,
            "Action submitted"
        );
    }

    pub fn log_action_confirmed(
        &self,
        external_id: &str,
        tx_hash: &TxHash,
        block_number: u64,
        gas_used: u64,
    ) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            external_id = %external_id,
            tx_hash = %tx_hash,
            block_number = %block_number,
            gas_used = %gas_used,
            "Action confirmed"
        );
    }

    pub fn log_identifier_retry(&self, rejected_id: &str, attempt: u32) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            rejected_id = %rejected_id,
            attempt = %attempt,
            "Identifier rejected as duplicate, retrying with a fresh one"
        );
    }

    pub fn log_reauthorization(&self, round: u32) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            round = %round,
            "Allowance insufficient at action time, re-authorizing"
        );
    }

    pub fn log_failure(&self, error: &ClassifiedError) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            kind = %error.kind,
            retryable = %error.retryable,
            raw = %error.raw_message,
            "Session failed"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            message = %message,
            "Warning"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            message = %message,
            "Error"
        );
    }
}
