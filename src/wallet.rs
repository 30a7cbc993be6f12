//! Transaction signing.
//!
//! [`TransactionSigner`] is the seam between orchestration and key custody.
//! A declined signature is a normal outcome here, not an internal error;
//! callers map [`SignerError::Rejected`] to the user-rejected failure kind.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

use crate::ledger::{LedgerError, SignedTx, TxRequest};
use crate::types::{Address, TxHash};

#[derive(Debug, Error)]
pub enum SignerError {
    /// The holder of the key declined to sign.
    #[error("user rejected the signature request")]
    Rejected,

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("codec error while preparing signing payload: {0}")]
    Codec(String),
}

impl From<LedgerError> for SignerError {
    fn from(err: LedgerError) -> Self {
        SignerError::Codec(err.to_string())
    }
}

/// Signs assembled transactions on behalf of one ledger account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account this signer controls. Used as the `from` address and for
    /// nonce and allowance reads.
    fn address(&self) -> &Address;

    /// Sign `request`, producing the broadcast envelope and its hash.
    async fn sign(&self, request: &TxRequest) -> Result<SignedTx, SignerError>;
}

/// In-process Ed25519 signer.
///
/// The account address is derived from the verifying key: trailing 20
/// bytes of its SHA-256 digest, lowercase hex with a `0x` prefix.
pub struct LocalWallet {
    signing_key: SigningKey,
    address: Address,
}

impl LocalWallet {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Load a wallet from a base58-encoded 32-byte secret.
    ///
    /// The intermediate buffer is wiped before returning.
    pub fn from_base58(encoded: &str) -> Result<Self, SignerError> {
        let mut decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| SignerError::KeyUnavailable(format!("invalid base58 secret: {e}")))?;
        if decoded.len() != 32 {
            decoded.zeroize();
            return Err(SignerError::KeyUnavailable(format!(
                "secret must be 32 bytes, got {}",
                decoded.len()
            )));
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&decoded);
        decoded.zeroize();
        let wallet = Self::from_secret_bytes(&secret);
        secret.zeroize();
        Ok(wallet)
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

// Key material stays out of Debug output.
impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for LocalWallet {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn sign(&self, request: &TxRequest) -> Result<SignedTx, SignerError> {
        let canonical = request
            .canonical_bytes()
            .map_err(|e| SignerError::Codec(e.to_string()))?;
        let signature = self.signing_key.sign(&canonical);
        let hash = envelope_hash(&canonical, &signature.to_bytes());
        Ok(SignedTx {
            request: request.clone(),
            signature: signature.to_bytes().to_vec(),
            hash,
        })
    }
}

fn derive_address(key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(key.as_bytes());
    Address::new(format!("0x{}", hex::encode(&digest[12..])))
}

/// Client-side transaction hash: SHA-256 over canonical bytes plus the
/// signature, matching what the ledger indexes.
fn envelope_hash(canonical: &[u8], signature: &[u8]) -> TxHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(signature);
    TxHash::new(hasher.finalize().into())
}

/// Signer wrapper that answers signature requests from a script.
///
/// Drives rejection paths in the scenario runner and tests; an exhausted
/// script approves everything.
pub struct ScriptedSigner {
    inner: LocalWallet,
    script: parking_lot::Mutex<std::collections::VecDeque<SignDirective>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignDirective {
    Approve,
    Reject,
}

impl ScriptedSigner {
    pub fn new(inner: LocalWallet) -> Self {
        Self {
            inner,
            script: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push(&self, directive: SignDirective) {
        self.script.lock().push_back(directive);
    }

    /// Queue a single rejection for the next signature request.
    pub fn reject_next(&self) {
        self.push(SignDirective::Reject);
    }
}

#[async_trait]
impl TransactionSigner for ScriptedSigner {
    fn address(&self) -> &Address {
        self.inner.address()
    }

    async fn sign(&self, request: &TxRequest) -> Result<SignedTx, SignerError> {
        let directive = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(SignDirective::Approve);
        match directive {
            SignDirective::Approve => self.inner.sign(request).await,
            SignDirective::Reject => Err(SignerError::Rejected),
        }
    }
}
