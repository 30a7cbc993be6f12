//! Transaction assembly and broadcast.
//!
//! One [`LedgerSession`] binds a signer to a connector and owns the
//! submission sequence: read the pending nonce, price the transaction,
//! sign, broadcast. The nonce is fetched fresh for every submission; a
//! cached nonce goes stale the moment anything else transacts for the
//! same account.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use super::{LedgerConnector, LedgerError, PendingTransaction, TxRequest};
use crate::classify::{classify, ClassifiedError, FailureKind};
use crate::metrics::Metrics;
use crate::types::Address;
use crate::wallet::{SignerError, TransactionSigner};

/// Default headroom over the gas estimate, in basis points.
pub const DEFAULT_GAS_MARGIN_BPS: u32 = 1_500;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// Estimation refused to price the transaction. Never silently
    /// replaced with a fallback limit.
    #[error("gas estimation failed: {0}")]
    Estimation(LedgerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl SessionError {
    /// Map a submission failure into the client-facing taxonomy.
    ///
    /// Estimation reverts that carry a recognizable contract reason keep
    /// that classification; a revert with no usable reason is reported as
    /// an estimation failure rather than an unknown.
    pub fn classify(&self) -> ClassifiedError {
        match self {
            SessionError::Signer(SignerError::Rejected) => ClassifiedError::user_rejected(),
            SessionError::Signer(other) => {
                ClassifiedError::new(FailureKind::Unknown, other.to_string())
            }
            SessionError::Estimation(LedgerError::Reverted {
                reason: Some(reason),
            }) => {
                let classified = classify(reason);
                if classified.kind == FailureKind::Unknown {
                    ClassifiedError::gas_estimation(reason.clone())
                } else {
                    classified
                }
            }
            SessionError::Estimation(err) => ClassifiedError::gas_estimation(err.raw_text()),
            SessionError::Ledger(err) => classify(&err.raw_text()),
        }
    }
}

/// Broadcast pipeline for one signing account.
pub struct LedgerSession {
    connector: Arc<dyn LedgerConnector>,
    signer: Arc<dyn TransactionSigner>,
    gas_margin_bps: u32,
}

impl LedgerSession {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        signer: Arc<dyn TransactionSigner>,
        gas_margin_bps: u32,
    ) -> Self {
        Self {
            connector,
            signer,
            gas_margin_bps,
        }
    }

    pub fn signer_address(&self) -> &Address {
        self.signer.address()
    }

    pub fn connector(&self) -> &Arc<dyn LedgerConnector> {
        &self.connector
    }

    /// Assemble, price, sign, and broadcast one transaction.
    pub async fn submit(
        &self,
        to: &Address,
        payload: Bytes,
    ) -> Result<PendingTransaction, SessionError> {
        let from = self.signer.address().clone();
        let nonce = self.connector.pending_nonce(&from).await?;
        let mut request = TxRequest::new(from, to.clone(), nonce, payload);

        let estimate = self
            .connector
            .estimate_gas(&request)
            .await
            .map_err(SessionError::Estimation)?;
        let gas_limit = apply_gas_margin(estimate, self.gas_margin_bps);
        request.gas_limit = Some(gas_limit);
        Metrics::global().gas_limits.observe(gas_limit as f64);
        debug!(nonce, estimate, gas_limit, "transaction priced");

        let signed = self.signer.sign(&request).await?;
        let hash = self.connector.submit(&signed).await?;
        info!(hash = %hash, nonce, gas_limit, "transaction submitted");
        Ok(PendingTransaction::new(hash, nonce))
    }
}

/// Estimate plus headroom, so near-boundary executions do not run dry.
fn apply_gas_margin(estimate: u64, margin_bps: u32) -> u64 {
    let raised = (estimate as u128) * (10_000 + margin_bps as u128) / 10_000;
    u64::try_from(raised).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::abi;
    use crate::ledger::sim::SimulatedLedger;
    use crate::wallet::{LocalWallet, ScriptedSigner};

    fn session_on(sim: Arc<SimulatedLedger>) -> (LedgerSession, Arc<ScriptedSigner>) {
        let signer = Arc::new(ScriptedSigner::new(LocalWallet::from_secret_bytes(&[5u8; 32])));
        let session = LedgerSession::new(sim, signer.clone(), DEFAULT_GAS_MARGIN_BPS);
        (session, signer)
    }

    fn approve_payload(sim: &SimulatedLedger) -> Bytes {
        abi::approve_calldata(&sim.marketplace_address(), 1_000).unwrap()
    }

    #[test]
    fn test_gas_margin_math() {
        assert_eq!(apply_gas_margin(100_000, 1_500), 115_000);
        assert_eq!(apply_gas_margin(100_000, 1_000), 110_000);
        assert_eq!(apply_gas_margin(100_000, 2_000), 120_000);
        // Rounds down, never below the raw estimate.
        assert_eq!(apply_gas_margin(3, 1_500), 3);
        assert_eq!(apply_gas_margin(u64::MAX, 2_000), u64::MAX);
    }

    #[tokio::test]
    async fn test_submit_prices_with_margin_and_fresh_nonce() {
        let sim = Arc::new(SimulatedLedger::new());
        let (session, _) = session_on(sim.clone());
        let token = sim.token_address();

        let payload = approve_payload(&sim);
        let probe = TxRequest::new(
            session.signer_address().clone(),
            token.clone(),
            0,
            payload.clone(),
        );
        let estimate = sim.estimate_gas(&probe).await.unwrap();

        let first = session.submit(&token, payload.clone()).await.unwrap();
        let second = session.submit(&token, payload).await.unwrap();
        assert_eq!(first.nonce, 0);
        assert_eq!(second.nonce, 1);

        let journal = sim.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(
            journal[0].gas_limit,
            apply_gas_margin(estimate, DEFAULT_GAS_MARGIN_BPS)
        );
    }

    #[tokio::test]
    async fn test_estimation_failure_stops_submission() {
        let sim = Arc::new(SimulatedLedger::new());
        let (session, _) = session_on(sim.clone());
        sim.queue_estimate_failure(LedgerError::Rpc {
            code: -32000,
            message: "cannot estimate gas".to_string(),
        });

        let err = session
            .submit(&sim.token_address(), approve_payload(&sim))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Estimation(_)));
        assert_eq!(err.classify().kind, FailureKind::GasEstimationFailed);
        assert_eq!(sim.submissions(), 0);
    }

    #[tokio::test]
    async fn test_estimation_revert_keeps_contract_reason() {
        let sim = Arc::new(SimulatedLedger::new());
        let (session, _) = session_on(sim.clone());
        sim.queue_estimate_failure(LedgerError::Reverted {
            reason: Some("Pausable: paused".to_string()),
        });

        let err = session
            .submit(&sim.token_address(), approve_payload(&sim))
            .await
            .unwrap_err();
        assert_eq!(err.classify().kind, FailureKind::ContractPaused);
    }

    #[tokio::test]
    async fn test_estimation_revert_without_reason_is_estimation_failure() {
        let sim = Arc::new(SimulatedLedger::new());
        let (session, _) = session_on(sim.clone());
        sim.queue_estimate_failure(LedgerError::Reverted { reason: None });

        let err = session
            .submit(&sim.token_address(), approve_payload(&sim))
            .await
            .unwrap_err();
        assert_eq!(err.classify().kind, FailureKind::GasEstimationFailed);
    }

    #[tokio::test]
    async fn test_rejected_signature_submits_nothing() {
        let sim = Arc::new(SimulatedLedger::new());
        let (session, signer) = session_on(sim.clone());
        signer.reject_next();

        let err = session
            .submit(&sim.token_address(), approve_payload(&sim))
            .await
            .unwrap_err();
        assert_eq!(err.classify().kind, FailureKind::UserRejected);
        assert_eq!(sim.submissions(), 0);
    }
}
