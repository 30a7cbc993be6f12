//! Failure classification at the ledger boundary.
//!
//! The ledger exposes no structured error codes to clients; the only
//! machine-readable signal is the raw revert/provider text. Classification
//! is therefore a deterministic substring table over the lowercased raw
//! message, first match wins. This is a fallback layer: if the ledger ever
//! grows typed errors, replace the table wholesale instead of extending it.

use serde::{Deserialize, Serialize};

/// Failure taxonomy for one orchestration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Signer declined the signature prompt.
    UserRejected,
    /// Spendable balance below the required total.
    InsufficientBalance,
    /// Authorized spend below the required total at action time.
    InsufficientAllowance,
    /// Ledger rejected the external identifier as already used.
    DuplicateIdentifier,
    /// Domain contract is administratively paused.
    ContractPaused,
    /// The transaction could not be priced; no limit can be safely guessed.
    GasEstimationFailed,
    /// Confirmation not observed within the deadline.
    Timeout,
    /// Unrecognized raw failure text.
    Unknown,
}

impl FailureKind {
    /// Default propagation policy for this kind.
    ///
    /// "Retryable" means the orchestrator has a local recovery path
    /// (re-authorization, fresh identifier, re-poll), not that arbitrary
    /// resubmission is safe.
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::InsufficientAllowance
                | FailureKind::DuplicateIdentifier
                | FailureKind::Timeout
        )
    }

    /// Metrics label for this kind.
    pub fn category(&self) -> &'static str {
        match self {
            FailureKind::UserRejected => "user_rejected",
            FailureKind::InsufficientBalance => "insufficient_balance",
            FailureKind::InsufficientAllowance => "insufficient_allowance",
            FailureKind::DuplicateIdentifier => "duplicate_identifier",
            FailureKind::ContractPaused => "contract_paused",
            FailureKind::GasEstimationFailed => "gas_estimation_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.category())
    }
}

/// A classified failure: taxonomy kind plus the untouched raw message.
///
/// The raw text is preserved byte-for-byte for every kind, so nothing the
/// ledger said is ever swallowed by classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: FailureKind,
    pub raw_message: String,
    pub retryable: bool,
}

impl ClassifiedError {
    pub fn new(kind: FailureKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
            retryable: kind.default_retryable(),
        }
    }

    /// Same kind, but with local recovery exhausted: no longer retryable.
    pub fn exhausted(kind: FailureKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
            retryable: false,
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(FailureKind::UserRejected, "user rejected the signature request")
    }

    pub fn timeout(raw_message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, raw_message)
    }

    pub fn gas_estimation(raw_message: impl Into<String>) -> Self {
        Self::new(FailureKind::GasEstimationFailed, raw_message)
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.raw_message)
    }
}

/// Substring table, matched in order against the lowercased raw message.
///
/// Gas-estimation patterns come before the allowance/balance patterns so
/// provider texts like "gas required exceeds allowance" never misclassify
/// as an allowance problem.
static CLASSIFICATION_TABLE: &[(&str, FailureKind)] = &[
    ("user rejected", FailureKind::UserRejected),
    ("user denied", FailureKind::UserRejected),
    ("rejected by user", FailureKind::UserRejected),
    ("cannot estimate gas", FailureKind::GasEstimationFailed),
    ("gas estimation failed", FailureKind::GasEstimationFailed),
    ("gas required exceeds", FailureKind::GasEstimationFailed),
    ("insufficient allowance", FailureKind::InsufficientAllowance),
    (
        "transfer amount exceeds allowance",
        FailureKind::InsufficientAllowance,
    ),
    ("insufficient balance", FailureKind::InsufficientBalance),
    (
        "transfer amount exceeds balance",
        FailureKind::InsufficientBalance,
    ),
    ("insufficient funds", FailureKind::InsufficientBalance),
    ("already in use", FailureKind::DuplicateIdentifier),
    ("already exists", FailureKind::DuplicateIdentifier),
    ("pausable: paused", FailureKind::ContractPaused),
    ("contract is paused", FailureKind::ContractPaused),
    ("timed out", FailureKind::Timeout),
    ("timeout", FailureKind::Timeout),
];

/// Classify a raw failure text.
///
/// Total over all inputs: anything the table does not recognize maps to
/// [`FailureKind::Unknown`] with the raw message unchanged.
pub fn classify(raw: &str) -> ClassifiedError {
    let lowered = raw.to_lowercase();
    for (pattern, kind) in CLASSIFICATION_TABLE {
        if lowered.contains(pattern) {
            return ClassifiedError::new(*kind, raw);
        }
    }
    ClassifiedError::new(FailureKind::Unknown, raw)
}
