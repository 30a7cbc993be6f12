//! Live fee and gas quoting.
//!
//! While a form is being edited the fee breakdown for its current inputs,
//! and optionally a gas preview from the ledger, are recomputed and shown
//! next to the fields. Edits arrive faster than quotes are worth
//! publishing, so recomputation is debounced: a quote goes out only
//! after the input has been quiet for the configured window. Readers take
//! the latest quote lock-free; a half-typed amount never blocks them.
//!
//! Everything here is read-only. Nothing is signed, nothing is broadcast,
//! and the submission path never consults a quote.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::fees::{self, FeeBreakdown};
use crate::ident::IdentifierAllocator;
use crate::ledger::{LedgerConnector, TxRequest};
use crate::orchestrator::codec::ActionCodec;
use crate::types::{ActionKind, Address, Amount, SpendPolicy, TransactionIntent};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// One snapshot of form inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteInput {
    pub kind: ActionKind,
    pub principal: Amount,
    pub policy: SpendPolicy,
}

/// A published quote: the breakdown for some settled input, plus a gas
/// preview when a quoter is wired in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub kind: ActionKind,
    pub principal: Amount,
    pub policy: SpendPolicy,
    pub breakdown: FeeBreakdown,
    pub gas_estimate: Option<u64>,
    pub computed_at: DateTime<Utc>,
}

/// Prices the call a settled input would make, without submitting it.
#[async_trait]
pub trait GasQuoter: Send + Sync {
    /// Gas for the would-be action call, or `None` when the ledger cannot
    /// price it right now.
    async fn quote_gas(&self, input: &QuoteInput) -> Option<u64>;
}

/// [`GasQuoter`] backed by the ledger's own estimator.
///
/// Builds the same action payload a submission would carry, under a
/// throwaway identifier, and asks the connector to price it.
pub struct ActionGasQuoter {
    connector: Arc<dyn LedgerConnector>,
    codec: Arc<dyn ActionCodec>,
    allocator: IdentifierAllocator,
    owner: Address,
    marketplace: Address,
}

impl ActionGasQuoter {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        codec: Arc<dyn ActionCodec>,
        owner: Address,
        marketplace: Address,
    ) -> Self {
        Self {
            connector,
            codec,
            allocator: IdentifierAllocator::default(),
            owner,
            marketplace,
        }
    }
}

#[async_trait]
impl GasQuoter for ActionGasQuoter {
    async fn quote_gas(&self, input: &QuoteInput) -> Option<u64> {
        let intent = TransactionIntent::new(
            input.kind,
            input.principal,
            input.policy,
            self.marketplace.clone(),
            serde_json::json!({}),
        )
        .ok()?;
        let placeholder = self.allocator.allocate(input.kind);
        let payload = self.codec.encode_action(&intent, &placeholder).ok()?;
        let nonce = self.connector.pending_nonce(&self.owner).await.ok()?;
        let request = TxRequest::new(
            self.owner.clone(),
            self.marketplace.clone(),
            nonce,
            payload,
        );
        self.connector.estimate_gas(&request).await.ok()
    }
}

pub struct QuoteService {
    latest: Arc<ArcSwapOption<Quote>>,
    input_tx: watch::Sender<Option<QuoteInput>>,
    worker: JoinHandle<()>,
}

impl QuoteService {
    /// Fee-only quoting; `gas_estimate` stays `None`.
    pub fn spawn(debounce: Duration) -> Self {
        Self::spawn_inner(debounce, None)
    }

    /// Fee quoting plus a gas preview for every settled input.
    pub fn spawn_with_gas(debounce: Duration, quoter: Arc<dyn GasQuoter>) -> Self {
        Self::spawn_inner(debounce, Some(quoter))
    }

    fn spawn_inner(debounce: Duration, quoter: Option<Arc<dyn GasQuoter>>) -> Self {
        let latest: Arc<ArcSwapOption<Quote>> = Arc::new(ArcSwapOption::const_empty());
        let (input_tx, mut input_rx) = watch::channel(None::<QuoteInput>);
        let published = latest.clone();

        let worker = tokio::spawn(async move {
            loop {
                if input_rx.changed().await.is_err() {
                    return;
                }
                // Restart the quiet window on every further edit.
                loop {
                    match tokio::time::timeout(debounce, input_rx.changed()).await {
                        Ok(Ok(())) => continue,
                        Ok(Err(_)) => return,
                        Err(_) => break,
                    }
                }
                let input = input_rx.borrow().clone();
                let Some(input) = input else { continue };
                match fees::required_spend(input.principal, &input.policy) {
                    Ok(breakdown) => {
                        // A failed probe leaves the gas field blank rather
                        // than publishing a guess.
                        let gas_estimate = match &quoter {
                            Some(q) => q.quote_gas(&input).await,
                            None => None,
                        };
                        published.store(Some(Arc::new(Quote {
                            kind: input.kind,
                            principal: input.principal,
                            policy: input.policy,
                            breakdown,
                            gas_estimate,
                            computed_at: Utc::now(),
                        })));
                    }
                    Err(e) => {
                        // Invalid inputs clear the display instead of
                        // leaving a quote for different numbers up.
                        warn!(error = %e, "quote input rejected");
                        published.store(None);
                    }
                }
            }
        });

        Self {
            latest,
            input_tx,
            worker,
        }
    }

    /// Feed the current form state. Cheap; call on every edit.
    pub fn update(&self, input: QuoteInput) {
        let _ = self.input_tx.send(Some(input));
    }

    /// Latest published quote, if any input has settled yet.
    pub fn latest(&self) -> Option<Arc<Quote>> {
        self.latest.load_full()
    }
}

impl Drop for QuoteService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sim::SimulatedLedger;
    use crate::ledger::LedgerError;
    use crate::orchestrator::codec::JsonActionCodec;

    fn input(principal: Amount) -> QuoteInput {
        QuoteInput {
            kind: ActionKind::Purchase,
            principal,
            policy: SpendPolicy::flat(420),
        }
    }

    fn sim_quoter(sim: &Arc<SimulatedLedger>) -> Arc<ActionGasQuoter> {
        Arc::new(ActionGasQuoter::new(
            sim.clone(),
            Arc::new(JsonActionCodec),
            Address::new("0xbuyer"),
            sim.marketplace_address(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_settled_input_is_published() {
        let service = QuoteService::spawn(Duration::from_millis(200));
        assert!(service.latest().is_none());

        service.update(input(1_000));
        // Second edit lands inside the quiet window; the first never
        // publishes.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.latest().is_none());
        service.update(input(2_000));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(service.latest().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let quote = service.latest().expect("quote after quiet window");
        assert_eq!(quote.principal, 2_000);
        assert_eq!(quote.gas_estimate, None);
        assert_eq!(
            quote.breakdown,
            fees::required_spend(2_000, &quote.policy).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_clears_the_quote() {
        let service = QuoteService::spawn(Duration::from_millis(50));
        service.update(input(1_000));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(service.latest().is_some());

        service.update(QuoteInput {
            kind: ActionKind::Purchase,
            principal: 1_000,
            policy: SpendPolicy::flat(20_000),
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(service.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_reflects_newest_settled_edit() {
        let service = QuoteService::spawn(Duration::from_millis(50));
        for principal in [10u128, 20, 30] {
            service.update(input(principal));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        assert_eq!(service.latest().unwrap().principal, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gas_preview_comes_from_the_ledger() {
        let sim = Arc::new(SimulatedLedger::new());
        let service =
            QuoteService::spawn_with_gas(Duration::from_millis(50), sim_quoter(&sim));

        service.update(input(1_000));
        tokio::time::sleep(Duration::from_millis(120)).await;

        let quote = service.latest().expect("settled quote");
        let gas = quote.gas_estimate.expect("gas preview");
        assert!(gas > 21_000, "payload bytes cost gas past the base: {gas}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_publishes_fees_without_gas() {
        let sim = Arc::new(SimulatedLedger::new());
        sim.queue_estimate_failure(LedgerError::Rpc {
            code: -32000,
            message: "execution aborted".to_string(),
        });
        let service =
            QuoteService::spawn_with_gas(Duration::from_millis(50), sim_quoter(&sim));

        service.update(input(1_000));
        tokio::time::sleep(Duration::from_millis(120)).await;

        let quote = service.latest().expect("settled quote");
        assert_eq!(quote.gas_estimate, None);
        assert_eq!(
            quote.breakdown,
            fees::required_spend(1_000, &quote.policy).unwrap()
        );
    }
}
