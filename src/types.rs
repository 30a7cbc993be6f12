//! Common types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token amount in the ledger's smallest fixed-point unit.
///
/// The reference deployment uses 10^18 units per whole token, so a u128
/// comfortably holds any balance the ledger can represent. All arithmetic
/// on amounts is checked; see [`crate::fees`].
pub type Amount = u128;

/// Basis points denominator: 10_000 bps == 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Serde adapter carrying amounts as decimal strings.
///
/// JSON numbers top out at 64 bits on the wire; amounts routinely exceed
/// that, so envelopes carry them as strings.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Amount>().map_err(serde::de::Error::custom)
    }
}

/// Upper bound on address length accepted from callers.
const MAX_ADDRESS_LEN: usize = 128;

/// Ledger-side bound on external identifier length.
pub const MAX_EXTERNAL_ID_LEN: usize = 32;

/// Opaque ledger address.
///
/// The ledger is a trust boundary; addresses are carried verbatim and never
/// interpreted beyond equality and display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 32-byte transaction hash, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, IntentError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|_| IntentError::InvalidTxHash(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IntentError::InvalidTxHash(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for TxHash {
    type Error = IntentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<TxHash> for String {
    fn from(h: TxHash) -> Self {
        h.to_string()
    }
}

/// Marketplace action kinds, one per user-facing form.
///
/// All kinds run through the same orchestration state machine; the only
/// per-kind differences are the spend policy and the encoded action call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    List,
    Purchase,
    CreateLoan,
    CreateBorrowing,
    Stake,
    Repay,
    Lend,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::List,
        ActionKind::Purchase,
        ActionKind::CreateLoan,
        ActionKind::CreateBorrowing,
        ActionKind::Stake,
        ActionKind::Repay,
        ActionKind::Lend,
    ];

    /// Wire-level entry point name used by the action codec.
    pub fn method_name(&self) -> &'static str {
        match self {
            ActionKind::List => "list",
            ActionKind::Purchase => "purchase",
            ActionKind::CreateLoan => "createLoan",
            ActionKind::CreateBorrowing => "createBorrowing",
            ActionKind::Stake => "stake",
            ActionKind::Repay => "repay",
            ActionKind::Lend => "lend",
        }
    }

    /// Short identifier prefix for ledger records created by this action.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ActionKind::List => "lst",
            ActionKind::Purchase => "buy",
            ActionKind::CreateLoan => "loan",
            ActionKind::CreateBorrowing => "brw",
            ActionKind::Stake => "stk",
            ActionKind::Repay => "rpy",
            ActionKind::Lend => "lnd",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method_name())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = IntentError;

    /// Accepts the method name in either camelCase or snake_case form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(ActionKind::List),
            "purchase" => Ok(ActionKind::Purchase),
            "createLoan" | "create_loan" => Ok(ActionKind::CreateLoan),
            "createBorrowing" | "create_borrowing" => Ok(ActionKind::CreateBorrowing),
            "stake" => Ok(ActionKind::Stake),
            "repay" => Ok(ActionKind::Repay),
            "lend" => Ok(ActionKind::Lend),
            other => Err(IntentError::UnknownActionKind(other.to_string())),
        }
    }
}

/// Fee/collateral policy for one action kind, in basis points.
///
/// Policies are supplied externally (configuration); the engine never
/// hardcodes a rate. 42 bps = 0.42%, 420 bps = 4.20%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendPolicy {
    /// Marketplace fee in basis points of the principal.
    pub fee_bps: u32,

    /// Optional collateral requirement in basis points of the principal.
    #[serde(default)]
    pub collateral_bps: Option<u32>,
}

impl SpendPolicy {
    pub fn flat(fee_bps: u32) -> Self {
        Self {
            fee_bps,
            collateral_bps: None,
        }
    }

    pub fn with_collateral(fee_bps: u32, collateral_bps: u32) -> Self {
        Self {
            fee_bps,
            collateral_bps: Some(collateral_bps),
        }
    }

    /// Basis points are fractions of 100%; anything above the denominator
    /// is a configuration mistake, not a valid rate.
    pub fn validate(&self) -> Result<(), IntentError> {
        if self.fee_bps as u128 > BPS_DENOMINATOR {
            return Err(IntentError::InvalidBasisPoints(self.fee_bps));
        }
        if let Some(cbps) = self.collateral_bps {
            if cbps as u128 > BPS_DENOMINATOR {
                return Err(IntentError::InvalidBasisPoints(cbps));
            }
        }
        Ok(())
    }
}

/// One user intent, captured at form submission time.
///
/// Immutable once created and consumed by exactly one orchestration
/// session. `extra_fields` is an opaque payload interpreted only by the
/// action codec for the target deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionIntent {
    /// Which marketplace action this intent performs.
    pub kind: ActionKind,

    /// Principal amount in smallest token units.
    pub principal: Amount,

    /// Fee/collateral policy applied to the principal.
    pub policy: SpendPolicy,

    /// Contract that will pull the authorized spend.
    pub spender: Address,

    /// Domain fields for the action call, opaque to the engine.
    pub extra_fields: serde_json::Value,
}

impl TransactionIntent {
    pub fn new(
        kind: ActionKind,
        principal: Amount,
        policy: SpendPolicy,
        spender: Address,
        extra_fields: serde_json::Value,
    ) -> Result<Self, IntentError> {
        policy.validate()?;
        if spender.is_empty() {
            return Err(IntentError::EmptyAddress);
        }
        if spender.as_str().len() > MAX_ADDRESS_LEN {
            return Err(IntentError::AddressTooLong(spender.as_str().len()));
        }
        Ok(Self {
            kind,
            principal,
            policy,
            spender,
            extra_fields,
        })
    }
}

/// Client-chosen identifier naming a new ledger record.
///
/// Uniqueness is enforced by the ledger, not the client; see
/// [`crate::ident::IdentifierAllocator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    pub fn new(s: impl Into<String>) -> Result<Self, IntentError> {
        let s = s.into();
        if s.is_empty() || s.len() > MAX_EXTERNAL_ID_LEN {
            return Err(IntentError::InvalidExternalId(s));
        }
        Ok(Self(s))
    }

    /// Caller guarantees the length bound already holds.
    pub(crate) fn from_validated(s: String) -> Self {
        debug_assert!(!s.is_empty() && s.len() <= MAX_EXTERNAL_ID_LEN);
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validation errors for intent construction and shared newtypes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("spender address must not be empty")]
    EmptyAddress,

    #[error("address length {0} exceeds {MAX_ADDRESS_LEN} bytes")]
    AddressTooLong(usize),

    #[error("basis points {0} exceed the 10000 denominator")]
    InvalidBasisPoints(u32),

    #[error("invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("external identifier empty or longer than {MAX_EXTERNAL_ID_LEN} bytes: {0:?}")]
    InvalidExternalId(String),

    #[error("unknown action kind: {0:?}")]
    UnknownActionKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_hex_round_trip() {
        let hash = TxHash::new([0xab; 32]);
        let displayed = hash.to_string();
        assert!(displayed.starts_with("0x"));
        assert_eq!(TxHash::from_hex(&displayed).unwrap(), hash);
        // Prefix-less input is accepted too
        assert_eq!(TxHash::from_hex(&displayed[2..]).unwrap(), hash);
    }

    #[test]
    fn test_tx_hash_rejects_bad_input() {
        assert!(TxHash::from_hex("0x1234").is_err());
        assert!(TxHash::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_spend_policy_validation() {
        assert!(SpendPolicy::flat(42).validate().is_ok());
        assert!(SpendPolicy::flat(10_000).validate().is_ok());
        assert!(SpendPolicy::flat(10_001).validate().is_err());
        assert!(SpendPolicy::with_collateral(42, 20_000).validate().is_err());
    }

    #[test]
    fn test_intent_rejects_empty_spender() {
        let err = TransactionIntent::new(
            ActionKind::List,
            1,
            SpendPolicy::flat(42),
            Address::new(""),
            serde_json::json!({}),
        )
        .unwrap_err();
        assert_eq!(err, IntentError::EmptyAddress);
    }

    #[test]
    fn test_external_id_length_bound() {
        assert!(ExternalId::new("lst-abc123").is_ok());
        assert!(ExternalId::new("").is_err());
        assert!(ExternalId::new("x".repeat(MAX_EXTERNAL_ID_LEN)).is_ok());
        assert!(ExternalId::new("x".repeat(MAX_EXTERNAL_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_action_kind_wire_names_distinct() {
        let mut names: Vec<&str> = ActionKind::ALL.iter().map(|k| k.method_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ActionKind::ALL.len());

        let mut prefixes: Vec<&str> = ActionKind::ALL.iter().map(|k| k.id_prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), ActionKind::ALL.len());
    }

    #[test]
    fn test_action_kind_parses_both_spellings() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.method_name().parse::<ActionKind>().unwrap(), kind);
        }
        assert_eq!(
            "create_loan".parse::<ActionKind>().unwrap(),
            ActionKind::CreateLoan
        );
        assert!("transfer".parse::<ActionKind>().is_err());
    }
}
