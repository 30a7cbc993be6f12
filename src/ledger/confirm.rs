//! Confirmation polling.
//!
//! Watches one broadcast transaction until the ledger reports a final
//! state or the deadline passes. Status query failures and not-yet-known
//! hashes are both normal mid-flight conditions; the waiter logs them and
//! keeps polling, the deadline is the only thing that stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{LedgerConnector, PendingTransaction, TxReceipt, TxStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a watched transaction ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(TxReceipt),
    Reverted { reason: Option<String> },
    /// Deadline passed with no final state. The transaction may still
    /// land later; the pending handle stays valid for another wait.
    TimedOut { waited: Duration },
}

pub struct ConfirmationWaiter {
    connector: Arc<dyn LedgerConnector>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationWaiter {
    pub fn new(connector: Arc<dyn LedgerConnector>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            connector,
            poll_interval,
            timeout,
        }
    }

    pub fn with_defaults(connector: Arc<dyn LedgerConnector>) -> Self {
        Self::new(connector, DEFAULT_POLL_INTERVAL, DEFAULT_CONFIRM_TIMEOUT)
    }

    /// Poll until `pending` reaches a final state or the deadline passes.
    pub async fn wait(&self, pending: &PendingTransaction) -> ConfirmationOutcome {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let waited = started.elapsed();
            if waited >= self.timeout {
                warn!(hash = %pending.hash, waited_ms = waited.as_millis() as u64, "confirmation wait timed out");
                return ConfirmationOutcome::TimedOut { waited };
            }
            match self.connector.transaction_status(&pending.hash).await {
                Ok(TxStatus::Confirmed(receipt)) => {
                    info!(hash = %pending.hash, block = receipt.block_number, "transaction confirmed");
                    return ConfirmationOutcome::Confirmed(receipt);
                }
                Ok(TxStatus::Reverted { reason }) => {
                    warn!(hash = %pending.hash, reason = reason.as_deref().unwrap_or("<none>"), "transaction reverted");
                    return ConfirmationOutcome::Reverted { reason };
                }
                Ok(TxStatus::Pending) | Ok(TxStatus::NotFound) => {
                    debug!(hash = %pending.hash, "not final yet");
                }
                // A failed status query says nothing about the transaction
                // itself; the deadline bounds how long we tolerate it.
                Err(err) => {
                    warn!(hash = %pending.hash, error = %err, "status query failed, repolling");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::abi;
    use crate::ledger::sim::SimulatedLedger;
    use crate::ledger::{LedgerError, TxRequest};
    use crate::types::TxHash;
    use crate::wallet::{LocalWallet, TransactionSigner};

    async fn submit_approve(sim: &SimulatedLedger, wallet: &LocalWallet) -> PendingTransaction {
        let nonce = sim.pending_nonce(wallet.address()).await.unwrap();
        let mut request = TxRequest::new(
            wallet.address().clone(),
            sim.token_address(),
            nonce,
            abi::approve_calldata(&sim.marketplace_address(), 5).unwrap(),
        );
        request.gas_limit = Some(100_000);
        let signed = wallet.sign(&request).await.unwrap();
        let hash = sim.submit(&signed).await.unwrap();
        PendingTransaction::new(hash, nonce)
    }

    fn waiter(sim: &Arc<SimulatedLedger>) -> ConfirmationWaiter {
        ConfirmationWaiter::new(
            sim.clone(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_after_inclusion_delay() {
        let sim = Arc::new(SimulatedLedger::new());
        sim.set_confirmation_delay(3);
        let wallet = LocalWallet::from_secret_bytes(&[4u8; 32]);
        let pending = submit_approve(&sim, &wallet).await;

        match waiter(&sim).wait(&pending).await {
            ConfirmationOutcome::Confirmed(receipt) => assert_eq!(receipt.tx_hash, pending.hash),
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_reason_survives_the_wait() {
        let sim = Arc::new(SimulatedLedger::new());
        sim.set_paused(true);
        sim.set_confirmation_delay(0);
        let wallet = LocalWallet::from_secret_bytes(&[4u8; 32]);

        // The pause only reverts marketplace actions, approvals still
        // land, so submit an action call.
        let codec = crate::orchestrator::codec::JsonActionCodec;
        use crate::orchestrator::codec::ActionCodec;
        let intent = crate::types::TransactionIntent::new(
            crate::types::ActionKind::List,
            1_000,
            crate::types::SpendPolicy::flat(42),
            sim.marketplace_address(),
            serde_json::json!({}),
        )
        .unwrap();
        let id = crate::types::ExternalId::new("lst_wait").unwrap();
        let nonce = sim.pending_nonce(wallet.address()).await.unwrap();
        let mut request = TxRequest::new(
            wallet.address().clone(),
            sim.marketplace_address(),
            nonce,
            codec.encode_action(&intent, &id).unwrap(),
        );
        request.gas_limit = Some(100_000);
        let signed = wallet.sign(&request).await.unwrap();
        let hash = sim.submit(&signed).await.unwrap();
        let pending = PendingTransaction::new(hash, nonce);

        assert_eq!(
            waiter(&sim).wait(&pending).await,
            ConfirmationOutcome::Reverted {
                reason: Some("Pausable: paused".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_included() {
        let sim = Arc::new(SimulatedLedger::new());
        sim.set_confirmation_delay(u32::MAX);
        let wallet = LocalWallet::from_secret_bytes(&[4u8; 32]);
        let pending = submit_approve(&sim, &wallet).await;

        match waiter(&sim).wait(&pending).await {
            ConfirmationOutcome::TimedOut { waited } => {
                assert!(waited >= Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failures_do_not_end_the_wait() {
        let sim = Arc::new(SimulatedLedger::new());
        sim.set_confirmation_delay(1);
        let wallet = LocalWallet::from_secret_bytes(&[4u8; 32]);
        let pending = submit_approve(&sim, &wallet).await;
        sim.queue_status_failure(LedgerError::Transport("connection reset".into()));
        sim.queue_status_failure(LedgerError::Rpc {
            code: -32005,
            message: "rate limited".into(),
        });

        assert!(matches!(
            waiter(&sim).wait(&pending).await,
            ConfirmationOutcome::Confirmed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_hash_polls_until_timeout() {
        let sim = Arc::new(SimulatedLedger::new());
        let pending = PendingTransaction::new(TxHash::new([7u8; 32]), 0);
        assert!(matches!(
            waiter(&sim).wait(&pending).await,
            ConfirmationOutcome::TimedOut { .. }
        ));
    }
}
