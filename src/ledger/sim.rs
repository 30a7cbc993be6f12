//! In-process ledger simulator.
//!
//! Backs the scenario runner and the integration tests. The simulator
//! models one settlement token and one marketplace contract; domain rules
//! run when a transaction is confirmed, not when it is submitted, so
//! failures surface exactly where the confirmation poll would see them on
//! a real ledger. Gas estimation prices payloads mechanically; estimation
//! failures are driven by fault injection.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::abi;
use super::{LedgerConnector, LedgerError, SignedTx, TxHash, TxReceipt, TxStatus};
use crate::fees;
use crate::orchestrator::codec::ActionEnvelope;
use crate::types::{Address, Amount, SpendPolicy};

const BASE_GAS: u64 = 21_000;
const GAS_PER_BYTE: u64 = 16;

/// Accepted submission, as recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub call: JournalCall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalCall {
    Approve { spender: Address, amount: Amount },
    Action { method: String, external_id: String },
}

enum SimPayload {
    Approve { spender: Address, amount: Amount },
    Act(ActionEnvelope),
}

struct QueuedTx {
    tx: SignedTx,
    payload: SimPayload,
    polls_remaining: u32,
    force_duplicate: bool,
}

#[derive(Default)]
struct SimState {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    confirmed_nonces: HashMap<Address, u64>,
    used_identifiers: HashSet<String>,
    paused: bool,
    queue: Vec<QueuedTx>,
    finals: HashMap<TxHash, TxStatus>,
    journal: Vec<JournalEntry>,
    block_number: u64,
    confirmation_delay_polls: u32,
    estimate_faults: VecDeque<LedgerError>,
    submit_faults: VecDeque<LedgerError>,
    read_faults: VecDeque<LedgerError>,
    status_faults: VecDeque<LedgerError>,
    forced_duplicates: u32,
}

pub struct SimulatedLedger {
    token: Address,
    marketplace: Address,
    state: Mutex<SimState>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        let state = SimState {
            confirmation_delay_polls: 1,
            ..SimState::default()
        };
        Self {
            token: Address::new(format!("0x{}", "ee".repeat(20))),
            marketplace: Address::new(format!("0x{}", "fa".repeat(20))),
            state: Mutex::new(state),
        }
    }

    pub fn token_address(&self) -> Address {
        self.token.clone()
    }

    pub fn marketplace_address(&self) -> Address {
        self.marketplace.clone()
    }

    /// Credit `amount` to `owner`'s token balance.
    pub fn fund(&self, owner: &Address, amount: Amount) {
        let mut state = self.state.lock();
        let entry = state.balances.entry(owner.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn balance(&self, owner: &Address) -> Amount {
        self.state.lock().balances.get(owner).copied().unwrap_or(0)
    }

    pub fn current_allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.state
            .lock()
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite an allowance out-of-band, as a competing writer would.
    pub fn set_allowance(&self, owner: &Address, spender: &Address, amount: Amount) {
        self.state
            .lock()
            .allowances
            .insert((owner.clone(), spender.clone()), amount);
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn mark_identifier_used(&self, id: &str) {
        self.state.lock().used_identifiers.insert(id.to_string());
    }

    pub fn identifier_used(&self, id: &str) -> bool {
        self.state.lock().used_identifiers.contains(id)
    }

    /// Status polls a queued transaction stays Pending before executing.
    pub fn set_confirmation_delay(&self, polls: u32) {
        self.state.lock().confirmation_delay_polls = polls;
    }

    /// Make every queued transaction executable on its next status poll.
    pub fn release_pending(&self) {
        for queued in &mut self.state.lock().queue {
            queued.polls_remaining = 0;
        }
    }

    pub fn queue_estimate_failure(&self, err: LedgerError) {
        self.state.lock().estimate_faults.push_back(err);
    }

    pub fn queue_submit_failure(&self, err: LedgerError) {
        self.state.lock().submit_faults.push_back(err);
    }

    /// Fault applied to the next balance/allowance/nonce read.
    pub fn queue_read_failure(&self, err: LedgerError) {
        self.state.lock().read_faults.push_back(err);
    }

    /// Fault applied to the next status query.
    pub fn queue_status_failure(&self, err: LedgerError) {
        self.state.lock().status_faults.push_back(err);
    }

    /// Revert the next `n` action confirmations as identifier collisions,
    /// regardless of the identifier actually carried.
    pub fn force_duplicate_rejections(&self, n: u32) {
        self.state.lock().forced_duplicates = n;
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().journal.len()
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    fn decode_payload(&self, tx: &SignedTx) -> Result<SimPayload, LedgerError> {
        if tx.request.to == self.token {
            let (spender, amount) = abi::decode_approve_calldata(&tx.request.payload)
                .map_err(|e| LedgerError::Rpc {
                    code: -32000,
                    message: format!("unsupported token call: {e}"),
                })?;
            Ok(SimPayload::Approve { spender, amount })
        } else if tx.request.to == self.marketplace {
            let envelope = ActionEnvelope::decode(&tx.request.payload).map_err(|e| {
                LedgerError::Rpc {
                    code: -32000,
                    message: format!("undecodable action payload: {e}"),
                }
            })?;
            Ok(SimPayload::Act(envelope))
        } else {
            Err(LedgerError::Rpc {
                code: -32000,
                message: format!("unknown contract {}", tx.request.to),
            })
        }
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn expected_nonce(&self, from: &Address) -> u64 {
        let confirmed = self.confirmed_nonces.get(from).copied().unwrap_or(0);
        let queued = self
            .queue
            .iter()
            .filter(|q| &q.tx.request.from == from)
            .count() as u64;
        confirmed + queued
    }

    /// Execute the queued transaction carrying `hash`, after any queued
    /// lower-nonce transactions from the same sender.
    fn execute_with_prereqs(
        &mut self,
        hash: &TxHash,
        marketplace: &Address,
    ) -> TxStatus {
        let (from, target_nonce) = match self.queue.iter().find(|q| &q.tx.hash == hash) {
            Some(q) => (q.tx.request.from.clone(), q.tx.request.nonce),
            None => return TxStatus::NotFound,
        };
        loop {
            let next = self
                .queue
                .iter()
                .enumerate()
                .filter(|(_, q)| q.tx.request.from == from && q.tx.request.nonce <= target_nonce)
                .min_by_key(|(_, q)| q.tx.request.nonce)
                .map(|(i, _)| i);
            let Some(idx) = next else {
                return TxStatus::NotFound;
            };
            let executed_hash = self.queue[idx].tx.hash;
            let status = self.execute_at(idx, marketplace);
            if &executed_hash == hash {
                return status;
            }
        }
    }

    fn execute_at(&mut self, idx: usize, marketplace: &Address) -> TxStatus {
        let queued = self.queue.remove(idx);
        let from = queued.tx.request.from.clone();
        self.confirmed_nonces
            .insert(from.clone(), queued.tx.request.nonce + 1);
        self.block_number += 1;

        let outcome = match &queued.payload {
            SimPayload::Approve { spender, amount } => {
                self.allowances
                    .insert((from.clone(), spender.clone()), *amount);
                Ok(())
            }
            SimPayload::Act(envelope) => {
                self.apply_action(&from, marketplace, envelope, queued.force_duplicate)
            }
        };

        let gas_limit = queued.tx.request.gas_limit.unwrap_or(0);
        let gas_used = gas_limit.min(BASE_GAS + GAS_PER_BYTE * queued.tx.request.payload.len() as u64);
        let status = match outcome {
            Ok(()) => TxStatus::Confirmed(TxReceipt {
                tx_hash: queued.tx.hash,
                block_number: self.block_number,
                gas_used,
            }),
            Err(reason) => TxStatus::Reverted {
                reason: Some(reason),
            },
        };
        debug!(hash = %queued.tx.hash, block = self.block_number, final_status = ?status.is_final(), "sim executed");
        self.finals.insert(queued.tx.hash, status.clone());
        status
    }

    /// Marketplace rules, in the order the contract checks them.
    fn apply_action(
        &mut self,
        from: &Address,
        marketplace: &Address,
        envelope: &ActionEnvelope,
        force_duplicate: bool,
    ) -> Result<(), String> {
        if force_duplicate {
            return Err("identifier already in use".to_string());
        }
        if self.paused {
            return Err("Pausable: paused".to_string());
        }
        if self.used_identifiers.contains(&envelope.id) {
            return Err("identifier already in use".to_string());
        }
        let policy = SpendPolicy {
            fee_bps: envelope.fee_bps,
            collateral_bps: envelope.collateral_bps,
        };
        let breakdown = fees::required_spend(envelope.principal, &policy)
            .map_err(|_| "invalid action parameters".to_string())?;

        let allowance_key = (from.clone(), marketplace.clone());
        let allowance = self.allowances.get(&allowance_key).copied().unwrap_or(0);
        if allowance < breakdown.total {
            return Err("ERC20: insufficient allowance".to_string());
        }
        let balance = self.balances.get(from).copied().unwrap_or(0);
        if balance < breakdown.total {
            return Err("ERC20: transfer amount exceeds balance".to_string());
        }

        self.balances.insert(from.clone(), balance - breakdown.total);
        let market_balance = self.balances.entry(marketplace.clone()).or_insert(0);
        *market_balance = market_balance.saturating_add(breakdown.total);
        self.allowances
            .insert(allowance_key, allowance - breakdown.total);
        self.used_identifiers.insert(envelope.id.clone());
        Ok(())
    }
}

#[async_trait]
impl LedgerConnector for SimulatedLedger {
    async fn balance_of(&self, token: &Address, owner: &Address) -> Result<Amount, LedgerError> {
        let mut state = self.state.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        if token != &self.token {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("unknown token contract {token}"),
            });
        }
        Ok(state.balances.get(owner).copied().unwrap_or(0))
    }

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, LedgerError> {
        let mut state = self.state.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        if token != &self.token {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("unknown token contract {token}"),
            });
        }
        Ok(state
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn pending_nonce(&self, owner: &Address) -> Result<u64, LedgerError> {
        let mut state = self.state.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        Ok(state.expected_nonce(owner))
    }

    async fn estimate_gas(&self, request: &super::TxRequest) -> Result<u64, LedgerError> {
        let mut state = self.state.lock();
        if let Some(err) = state.estimate_faults.pop_front() {
            return Err(err);
        }
        Ok(BASE_GAS + GAS_PER_BYTE * request.payload.len() as u64)
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError> {
        let payload = self.decode_payload(tx)?;
        let mut state = self.state.lock();
        if let Some(err) = state.submit_faults.pop_front() {
            return Err(err);
        }
        let Some(gas_limit) = tx.request.gas_limit else {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "transaction carries no gas limit".to_string(),
            });
        };
        if state.finals.contains_key(&tx.hash)
            || state.queue.iter().any(|q| q.tx.hash == tx.hash)
        {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "already known".to_string(),
            });
        }
        let expected = state.expected_nonce(&tx.request.from);
        if tx.request.nonce != expected {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!(
                    "invalid nonce: expected {expected}, got {}",
                    tx.request.nonce
                ),
            });
        }

        let force_duplicate = match &payload {
            SimPayload::Act(_) if state.forced_duplicates > 0 => {
                state.forced_duplicates -= 1;
                true
            }
            _ => false,
        };
        let call = match &payload {
            SimPayload::Approve { spender, amount } => JournalCall::Approve {
                spender: spender.clone(),
                amount: *amount,
            },
            SimPayload::Act(envelope) => JournalCall::Action {
                method: envelope.method.clone(),
                external_id: envelope.id.clone(),
            },
        };
        state.journal.push(JournalEntry {
            hash: tx.hash,
            from: tx.request.from.clone(),
            nonce: tx.request.nonce,
            gas_limit,
            call,
        });
        let delay = state.confirmation_delay_polls;
        state.queue.push(QueuedTx {
            tx: tx.clone(),
            payload,
            polls_remaining: delay,
            force_duplicate,
        });
        debug!(hash = %tx.hash, nonce = tx.request.nonce, "sim accepted submission");
        Ok(tx.hash)
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<TxStatus, LedgerError> {
        let mut state = self.state.lock();
        if let Some(err) = state.status_faults.pop_front() {
            return Err(err);
        }
        if let Some(status) = state.finals.get(hash) {
            return Ok(status.clone());
        }
        let Some(idx) = state.queue.iter().position(|q| &q.tx.hash == hash) else {
            return Ok(TxStatus::NotFound);
        };
        if state.queue[idx].polls_remaining > 0 {
            state.queue[idx].polls_remaining -= 1;
            return Ok(TxStatus::Pending);
        }
        let marketplace = self.marketplace.clone();
        Ok(state.execute_with_prereqs(hash, &marketplace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TxRequest;
    use crate::orchestrator::codec::{ActionCodec, JsonActionCodec};
    use crate::types::{ActionKind, ExternalId, TransactionIntent};
    use crate::wallet::{LocalWallet, TransactionSigner};
    use serde_json::json;

    fn wallet() -> LocalWallet {
        LocalWallet::from_secret_bytes(&[3u8; 32])
    }

    fn intent(sim: &SimulatedLedger, principal: Amount, fee_bps: u32) -> TransactionIntent {
        TransactionIntent::new(
            ActionKind::Purchase,
            principal,
            SpendPolicy::flat(fee_bps),
            sim.marketplace_address(),
            json!({}),
        )
        .unwrap()
    }

    async fn sign_and_submit(
        sim: &SimulatedLedger,
        wallet: &LocalWallet,
        to: Address,
        payload: bytes::Bytes,
    ) -> Result<TxHash, LedgerError> {
        let nonce = sim.pending_nonce(wallet.address()).await.unwrap();
        let mut request = TxRequest::new(wallet.address().clone(), to, nonce, payload);
        request.gas_limit = Some(sim.estimate_gas(&request).await.unwrap() * 2);
        let signed = wallet.sign(&request).await.unwrap();
        sim.submit(&signed).await
    }

    async fn confirm(sim: &SimulatedLedger, hash: &TxHash) -> TxStatus {
        sim.release_pending();
        sim.transaction_status(hash).await.unwrap()
    }

    #[tokio::test]
    async fn test_approve_then_action_moves_funds() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        let codec = JsonActionCodec;
        sim.fund(wallet.address(), 2_000_000);

        let intent = intent(&sim, 1_000_000, 420);
        let total = fees::required_spend(intent.principal, &intent.policy)
            .unwrap()
            .total;

        let approve = codec
            .encode_authorization(&sim.marketplace_address(), total)
            .unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.token_address(), approve)
            .await
            .unwrap();
        assert!(matches!(confirm(&sim, &hash).await, TxStatus::Confirmed(_)));
        assert_eq!(
            sim.current_allowance(wallet.address(), &sim.marketplace_address()),
            total
        );

        let id = ExternalId::new("buy_test1").unwrap();
        let action = codec.encode_action(&intent, &id).unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), action)
            .await
            .unwrap();
        assert!(matches!(confirm(&sim, &hash).await, TxStatus::Confirmed(_)));

        assert_eq!(sim.balance(wallet.address()), 2_000_000 - total);
        assert_eq!(sim.balance(&sim.marketplace_address()), total);
        assert_eq!(
            sim.current_allowance(wallet.address(), &sim.marketplace_address()),
            0
        );
        assert!(sim.identifier_used("buy_test1"));
    }

    #[tokio::test]
    async fn test_action_without_allowance_reverts() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.fund(wallet.address(), 2_000_000);

        let intent = intent(&sim, 1_000_000, 420);
        let id = ExternalId::new("buy_noallow").unwrap();
        let action = JsonActionCodec.encode_action(&intent, &id).unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), action)
            .await
            .unwrap();
        let status = confirm(&sim, &hash).await;
        assert_eq!(
            status,
            TxStatus::Reverted {
                reason: Some("ERC20: insufficient allowance".to_string())
            }
        );
        // Reverts burn the nonce but leave balances untouched.
        assert_eq!(sim.balance(wallet.address()), 2_000_000);
        assert_eq!(sim.pending_nonce(wallet.address()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_paused_marketplace_reverts_actions() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.fund(wallet.address(), 2_000_000);
        sim.set_paused(true);

        let intent = intent(&sim, 1_000, 42);
        let id = ExternalId::new("buy_paused").unwrap();
        let action = JsonActionCodec.encode_action(&intent, &id).unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), action)
            .await
            .unwrap();
        assert_eq!(
            confirm(&sim, &hash).await,
            TxStatus::Reverted {
                reason: Some("Pausable: paused".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_identifier_reverts() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.fund(wallet.address(), 2_000_000);
        sim.mark_identifier_used("buy_taken");

        let intent = intent(&sim, 1_000, 42);
        let id = ExternalId::new("buy_taken").unwrap();
        let action = JsonActionCodec.encode_action(&intent, &id).unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), action)
            .await
            .unwrap();
        assert_eq!(
            confirm(&sim, &hash).await,
            TxStatus::Reverted {
                reason: Some("identifier already in use".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_nonce_gap_rejected_at_submit() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        let request = TxRequest {
            from: wallet.address().clone(),
            to: sim.token_address(),
            nonce: 5,
            gas_limit: Some(60_000),
            payload: abi::approve_calldata(&sim.marketplace_address(), 1).unwrap(),
        };
        let signed = wallet.sign(&request).await.unwrap();
        let err = sim.submit(&signed).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { .. }));
        assert!(err.raw_text().contains("invalid nonce"));
    }

    #[tokio::test]
    async fn test_unpriced_submission_rejected() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        let request = TxRequest::new(
            wallet.address().clone(),
            sim.token_address(),
            0,
            abi::approve_calldata(&sim.marketplace_address(), 1).unwrap(),
        );
        let signed = wallet.sign(&request).await.unwrap();
        let err = sim.submit(&signed).await.unwrap_err();
        assert!(err.raw_text().contains("no gas limit"));
    }

    #[tokio::test]
    async fn test_status_lifecycle_with_delay() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.set_confirmation_delay(2);

        let unknown = TxHash::new([9u8; 32]);
        assert_eq!(
            sim.transaction_status(&unknown).await.unwrap(),
            TxStatus::NotFound
        );

        let payload = abi::approve_calldata(&sim.marketplace_address(), 10).unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.token_address(), payload)
            .await
            .unwrap();
        assert_eq!(sim.transaction_status(&hash).await.unwrap(), TxStatus::Pending);
        assert_eq!(sim.transaction_status(&hash).await.unwrap(), TxStatus::Pending);
        assert!(sim.transaction_status(&hash).await.unwrap().is_final());
    }

    #[tokio::test]
    async fn test_forced_duplicate_consumes_one_submission() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.fund(wallet.address(), 10_000_000);
        sim.force_duplicate_rejections(1);

        let intent = intent(&sim, 1_000, 42);
        let first = JsonActionCodec
            .encode_action(&intent, &ExternalId::new("buy_a1").unwrap())
            .unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), first)
            .await
            .unwrap();
        assert_eq!(
            confirm(&sim, &hash).await,
            TxStatus::Reverted {
                reason: Some("identifier already in use".to_string())
            }
        );
        // The forced rejection is spent; an identical fresh submission lands.
        let second = JsonActionCodec
            .encode_action(&intent, &ExternalId::new("buy_a2").unwrap())
            .unwrap();
        let hash = sign_and_submit(&sim, &wallet, sim.marketplace_address(), second)
            .await
            .unwrap();
        // No allowance yet, so it still reverts, but not as a duplicate.
        assert_eq!(
            confirm(&sim, &hash).await,
            TxStatus::Reverted {
                reason: Some("ERC20: insufficient allowance".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_read_and_status_faults_pop_once() {
        let sim = SimulatedLedger::new();
        let wallet = wallet();
        sim.queue_read_failure(LedgerError::Transport("connection reset".into()));
        assert!(sim
            .balance_of(&sim.token_address(), wallet.address())
            .await
            .is_err());
        assert_eq!(
            sim.balance_of(&sim.token_address(), wallet.address())
                .await
                .unwrap(),
            0
        );

        sim.queue_status_failure(LedgerError::Transport("connection reset".into()));
        let hash = TxHash::new([1u8; 32]);
        assert!(sim.transaction_status(&hash).await.is_err());
        assert_eq!(
            sim.transaction_status(&hash).await.unwrap(),
            TxStatus::NotFound
        );
    }
}
