//! Contract payload encoding.
//!
//! Two payload shapes leave the orchestrator: settlement-token approvals
//! in fixed-word calldata, and domain actions as a canonical JSON envelope
//! the marketplace contracts parse. The codec is a trait so deployments
//! with a different contract surface can swap the encoding without
//! touching the state machine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::abi::{self, AbiError};
use crate::types::{Address, Amount, ExternalId, TransactionIntent};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error("envelope encoding failed: {0}")]
    Json(String),
}

pub trait ActionCodec: Send + Sync {
    /// Payload authorizing `spender` to move `amount`, addressed to the
    /// settlement token.
    fn encode_authorization(&self, spender: &Address, amount: Amount) -> Result<Bytes, CodecError>;

    /// Payload performing the domain action, addressed to the marketplace.
    fn encode_action(
        &self,
        intent: &TransactionIntent,
        external_id: &ExternalId,
    ) -> Result<Bytes, CodecError>;
}

/// Canonical JSON envelope for marketplace actions.
///
/// Amounts travel as decimal strings. The contract recomputes the fee
/// breakdown from `principal` and the basis-point fields and pulls the
/// total through its allowance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub method: String,
    pub id: String,
    #[serde(with = "crate::types::amount_string")]
    pub principal: Amount,
    pub fee_bps: u32,
    #[serde(default)]
    pub collateral_bps: Option<u32>,
    #[serde(default)]
    pub fields: serde_json::Value,
}

impl ActionEnvelope {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Json(e.to_string()))
    }
}

/// Default codec for the current contract deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonActionCodec;

impl ActionCodec for JsonActionCodec {
    fn encode_authorization(&self, spender: &Address, amount: Amount) -> Result<Bytes, CodecError> {
        Ok(abi::approve_calldata(spender, amount)?)
    }

    fn encode_action(
        &self,
        intent: &TransactionIntent,
        external_id: &ExternalId,
    ) -> Result<Bytes, CodecError> {
        let envelope = ActionEnvelope {
            method: intent.kind.method_name().to_string(),
            id: external_id.as_str().to_string(),
            principal: intent.principal,
            fee_bps: intent.policy.fee_bps,
            collateral_bps: intent.policy.collateral_bps,
            fields: intent.extra_fields.clone(),
        };
        let raw = serde_json::to_vec(&envelope).map_err(|e| CodecError::Json(e.to_string()))?;
        Ok(Bytes::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionKind, SpendPolicy};
    use serde_json::json;

    fn intent() -> TransactionIntent {
        TransactionIntent::new(
            ActionKind::CreateLoan,
            100_000_000_000_000_000_000,
            SpendPolicy::with_collateral(42, 500),
            Address::new(format!("0x{}", "ab".repeat(20))),
            json!({ "listing": "lst_4Vx" }),
        )
        .unwrap()
    }

    #[test]
    fn test_action_envelope_round_trip_above_u64() {
        let codec = JsonActionCodec;
        let id = ExternalId::new("loan_9xQ2mP").unwrap();
        let payload = codec.encode_action(&intent(), &id).unwrap();

        let envelope = ActionEnvelope::decode(&payload).unwrap();
        assert_eq!(envelope.method, "createLoan");
        assert_eq!(envelope.id, "loan_9xQ2mP");
        assert_eq!(envelope.principal, 100_000_000_000_000_000_000);
        assert_eq!(envelope.fee_bps, 42);
        assert_eq!(envelope.collateral_bps, Some(500));
        assert_eq!(envelope.fields, json!({ "listing": "lst_4Vx" }));
    }

    #[test]
    fn test_principal_travels_as_string() {
        let codec = JsonActionCodec;
        let id = ExternalId::new("loan_1").unwrap();
        let payload = codec.encode_action(&intent(), &id).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["principal"], json!("100000000000000000000"));
    }

    #[test]
    fn test_authorization_is_token_calldata() {
        let codec = JsonActionCodec;
        let spender = Address::new(format!("0x{}", "cd".repeat(20)));
        let payload = codec.encode_authorization(&spender, 12_345).unwrap();
        assert_eq!(payload, abi::approve_calldata(&spender, 12_345).unwrap());
    }

    #[test]
    fn test_decode_rejects_non_envelope_payloads() {
        assert!(ActionEnvelope::decode(b"\x00\x01\x02").is_err());
        assert!(ActionEnvelope::decode(b"{\"method\":\"list\"}").is_err());
    }
}
