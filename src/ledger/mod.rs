//! Ledger access layer.
//!
//! Everything above this module speaks in terms of [`LedgerConnector`]; the
//! concrete backends (JSON-RPC over HTTP, the in-process simulator) live in
//! submodules. Reads used for spend decisions must go through the connector
//! on every decision, results are never cached by this layer.

pub mod abi;
pub mod confirm;
pub mod http;
pub mod session;
pub mod sim;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Amount, TxHash};

/// An unsigned transaction as assembled by the session layer.
///
/// `gas_limit` is `None` until estimation has run; connectors refuse to
/// submit unpriced transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas_limit: Option<u64>,
    pub payload: Bytes,
}

impl TxRequest {
    pub fn new(from: Address, to: Address, nonce: u64, payload: Bytes) -> Self {
        Self {
            from,
            to,
            nonce,
            gas_limit: None,
            payload,
        }
    }

    /// Stable byte encoding used for signing and client-side hashing.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        bincode::serialize(self).map_err(|e| LedgerError::Codec(e.to_string()))
    }
}

/// A signed transaction ready for broadcast.
///
/// The hash is computed client-side from the signed envelope, so callers
/// can start watching for inclusion before the submit call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub request: TxRequest,
    pub signature: Vec<u8>,
    pub hash: TxHash,
}

/// Where a submitted transaction currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Known to the ledger, not yet included.
    Pending,
    /// Not known to the ledger. Normal immediately after submission.
    NotFound,
    Confirmed(TxReceipt),
    Reverted { reason: Option<String> },
}

impl TxStatus {
    /// Final states stop the confirmation poll.
    pub fn is_final(&self) -> bool {
        matches!(self, TxStatus::Confirmed(_) | TxStatus::Reverted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Handle to a broadcast transaction awaiting confirmation.
///
/// Survives a timed-out wait so the caller can resume polling without
/// resubmitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub nonce: u64,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(hash: TxHash, nonce: u64) -> Self {
        Self {
            hash,
            nonce,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Network-level failure before the ledger saw the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node accepted the request and returned an error object.
    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Execution reverted, either during gas estimation or on-ledger.
    #[error("execution reverted{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Reverted { reason: Option<String> },

    /// The node answered with something we could not interpret.
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),

    /// Local encoding failure while preparing a request.
    #[error("codec error: {0}")]
    Codec(String),
}

impl LedgerError {
    /// Transport and malformed-response failures may succeed on a retry
    /// against the same node; everything else is a real answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport(_) | LedgerError::InvalidResponse(_))
    }

    /// The text handed to failure classification.
    ///
    /// For reverts this is the revert reason alone, so contract strings
    /// like "Pausable: paused" hit the classification table directly.
    pub fn raw_text(&self) -> String {
        match self {
            LedgerError::Reverted { reason: Some(reason) } => reason.clone(),
            LedgerError::Reverted { reason: None } => "execution reverted".to_string(),
            LedgerError::Rpc { message, .. } => message.clone(),
            LedgerError::Transport(msg)
            | LedgerError::InvalidResponse(msg)
            | LedgerError::Codec(msg) => msg.clone(),
        }
    }
}

/// Uniform interface to the ledger.
///
/// Implementations must not cache balance, allowance, or nonce reads;
/// spend decisions depend on observing the ledger as it is now.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Spendable balance of `owner` in the settlement token.
    async fn balance_of(&self, token: &Address, owner: &Address) -> Result<Amount, LedgerError>;

    /// Amount `spender` may currently move on behalf of `owner`.
    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, LedgerError>;

    /// Next usable nonce for `owner`, counting queued transactions.
    async fn pending_nonce(&self, owner: &Address) -> Result<u64, LedgerError>;

    /// Simulate `request` and return a gas amount it would need.
    async fn estimate_gas(&self, request: &TxRequest) -> Result<u64, LedgerError>;

    /// Broadcast. Returns the transaction hash the ledger will index.
    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError>;

    /// Current standing of a broadcast transaction.
    async fn transaction_status(&self, hash: &TxHash) -> Result<TxStatus, LedgerError>;
}
