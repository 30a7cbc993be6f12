//! JSON-RPC connector.
//!
//! Talks to a ledger node over HTTP. Read calls retry on transient
//! transport failures with jittered backoff; `submit` never retries here,
//! resubmission policy belongs to the orchestrator. All traffic shares one
//! local rate cap so a polling loop cannot starve the node.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;

use super::abi;
use super::{LedgerConnector, LedgerError, SignedTx, TxHash, TxReceipt, TxRequest, TxStatus};
use crate::types::{Address, Amount};

#[derive(Debug, Clone)]
pub struct HttpConnectorConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    /// Extra attempts for transient read failures, on top of the first try.
    pub read_retry_attempts: usize,
    pub read_retry_base_ms: u64,
    pub max_requests_per_second: u32,
}

impl Default for HttpConnectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            request_timeout_ms: 10_000,
            read_retry_attempts: 2,
            read_retry_base_ms: 200,
            max_requests_per_second: 20,
        }
    }
}

pub struct HttpConnector {
    client: reqwest::Client,
    endpoint: String,
    limiter: DefaultDirectRateLimiter,
    read_retry_attempts: usize,
    read_retry_base_ms: u64,
    request_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptJson {
    status: String,
    block_number: String,
    gas_used: String,
    /// Hex `Error(string)` data on failed receipts, when the node has it.
    #[serde(default)]
    revert_data: Option<String>,
}

impl HttpConnector {
    pub fn new(config: HttpConnectorConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let rps = NonZeroU32::new(config.max_requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client,
            endpoint: config.endpoint,
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            read_retry_attempts: config.read_retry_attempts,
            read_retry_base_ms: config.read_retry_base_ms,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        self.limiter.until_ready().await;
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!(method = %method, id, "ledger rpc call");
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Transport(format!("http status {status}")));
        }
        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(map_rpc_error(error));
        }
        // A null result is a real answer (a receipt that does not exist
        // yet); only the error object is exceptional.
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Read path: retries transient failures, passes real answers through.
    async fn call_with_retry(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let strategy = ExponentialBackoff::from_millis(self.read_retry_base_ms.max(1))
            .map(jitter)
            .take(self.read_retry_attempts);
        RetryIf::spawn(
            strategy,
            || self.call(method, params.clone()),
            |e: &LedgerError| e.is_transient(),
        )
        .await
    }

    async fn eth_call_amount(&self, to: &Address, data: bytes::Bytes) -> Result<Amount, LedgerError> {
        let params = json!([{ "to": to.as_str(), "data": to_hex(&data) }, "latest"]);
        let result = self.call_with_retry("eth_call", params).await?;
        let word = parse_hex_bytes(result_str(&result)?)?;
        abi::decode_amount_word(&word).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LedgerConnector for HttpConnector {
    async fn balance_of(&self, token: &Address, owner: &Address) -> Result<Amount, LedgerError> {
        let data = abi::balance_of_calldata(owner).map_err(|e| LedgerError::Codec(e.to_string()))?;
        self.eth_call_amount(token, data).await
    }

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, LedgerError> {
        let data =
            abi::allowance_calldata(owner, spender).map_err(|e| LedgerError::Codec(e.to_string()))?;
        self.eth_call_amount(token, data).await
    }

    async fn pending_nonce(&self, owner: &Address) -> Result<u64, LedgerError> {
        let params = json!([owner.as_str(), "pending"]);
        let result = self.call_with_retry("eth_getTransactionCount", params).await?;
        parse_hex_u64(result_str(&result)?)
    }

    async fn estimate_gas(&self, request: &TxRequest) -> Result<u64, LedgerError> {
        let params = json!([{
            "from": request.from.as_str(),
            "to": request.to.as_str(),
            "nonce": format!("0x{:x}", request.nonce),
            "data": to_hex(&request.payload),
        }]);
        let result = self.call_with_retry("eth_estimateGas", params).await?;
        parse_hex_u64(result_str(&result)?)
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError> {
        let raw = bincode::serialize(tx).map_err(|e| LedgerError::Codec(e.to_string()))?;
        // Single shot: a transport error here leaves the outcome unknown
        // and the caller decides what to do with the pending hash.
        let result = self
            .call("eth_sendRawTransaction", json!([to_hex(&raw)]))
            .await?;
        TxHash::from_hex(result_str(&result)?)
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<TxStatus, LedgerError> {
        let hash_hex = hash.to_string();
        let receipt = self
            .call_with_retry("eth_getTransactionReceipt", json!([hash_hex]))
            .await?;
        if !receipt.is_null() {
            let receipt: ReceiptJson = serde_json::from_value(receipt)
                .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;
            return receipt_to_status(hash, receipt);
        }
        let tx = self
            .call_with_retry("eth_getTransactionByHash", json!([hash_hex]))
            .await?;
        if tx.is_null() {
            Ok(TxStatus::NotFound)
        } else {
            Ok(TxStatus::Pending)
        }
    }
}

fn receipt_to_status(hash: &TxHash, receipt: ReceiptJson) -> Result<TxStatus, LedgerError> {
    match receipt.status.as_str() {
        "0x1" => Ok(TxStatus::Confirmed(TxReceipt {
            tx_hash: *hash,
            block_number: parse_hex_u64(&receipt.block_number)?,
            gas_used: parse_hex_u64(&receipt.gas_used)?,
        })),
        "0x0" => {
            let reason = receipt
                .revert_data
                .as_deref()
                .and_then(|d| parse_hex_bytes(d).ok())
                .and_then(|raw| abi::decode_revert_reason(&raw));
            Ok(TxStatus::Reverted { reason })
        }
        other => Err(LedgerError::InvalidResponse(format!(
            "unknown receipt status {other:?}"
        ))),
    }
}

fn map_rpc_error(error: RpcErrorObject) -> LedgerError {
    // Reverts during eth_call / eth_estimateGas ride inside the error
    // object; surface them as Reverted so classification sees the reason.
    if let Some(data) = error.data.as_ref().and_then(extract_hex_data) {
        if let Ok(raw) = parse_hex_bytes(&data) {
            if !raw.is_empty() {
                return LedgerError::Reverted {
                    reason: abi::decode_revert_reason(&raw),
                };
            }
        }
    }
    let lowered = error.message.to_lowercase();
    if lowered.contains("execution reverted") {
        return LedgerError::Reverted {
            reason: reason_from_message(&error.message),
        };
    }
    LedgerError::Rpc {
        code: error.code,
        message: error.message,
    }
}

fn extract_hex_data(data: &Value) -> Option<String> {
    match data {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("data").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// "execution reverted: Pausable: paused" -> Some("Pausable: paused")
fn reason_from_message(message: &str) -> Option<String> {
    let idx = message.to_lowercase().find("execution reverted")?;
    let tail = &message[idx + "execution reverted".len()..];
    let reason = tail.trim_start_matches(':').trim();
    if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    }
}

fn result_str(value: &Value) -> Result<&str, LedgerError> {
    value
        .as_str()
        .ok_or_else(|| LedgerError::InvalidResponse(format!("expected hex string, got {value}")))
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, LedgerError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|e| LedgerError::InvalidResponse(format!("bad hex {s:?}: {e}")))
}

fn parse_hex_u64(s: &str) -> Result<u64, LedgerError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| LedgerError::InvalidResponse(format!("bad hex quantity {s:?}: {e}")))
}
