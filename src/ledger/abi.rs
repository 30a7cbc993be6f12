//! Calldata encoding for settlement-token calls.
//!
//! The token contract exposes the usual approve/allowance/balance surface
//! with 32-byte word arguments. Selectors are the leading 4 bytes of the
//! SHA-256 of the method signature, the hashing rule the rest of the chain
//! uses. Domain actions do not go through here; they carry the JSON
//! envelope produced by the action codec.

use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Address, Amount};

pub const WORD_LEN: usize = 32;

static SELECTOR_APPROVE: Lazy<[u8; 4]> = Lazy::new(|| selector("approve(address,uint256)"));
static SELECTOR_BALANCE_OF: Lazy<[u8; 4]> = Lazy::new(|| selector("balanceOf(address)"));
static SELECTOR_ALLOWANCE: Lazy<[u8; 4]> =
    Lazy::new(|| selector("allowance(address,address)"));
static SELECTOR_ERROR: Lazy<[u8; 4]> = Lazy::new(|| selector("Error(string)"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("address is not 0x-prefixed 20-byte hex: {0:?}")]
    InvalidAddress(String),
    #[error("word of {0} bytes where {WORD_LEN} expected")]
    BadWordLength(usize),
    #[error("value does not fit the amount range")]
    ValueOutOfRange,
}

/// Leading 4 bytes of SHA-256 over the signature string.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Sha256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// `approve(spender, amount)` calldata.
pub fn approve_calldata(spender: &Address, amount: Amount) -> Result<Bytes, AbiError> {
    let mut out = BytesMut::with_capacity(4 + 2 * WORD_LEN);
    out.put_slice(&*SELECTOR_APPROVE);
    out.put_slice(&address_word(spender)?);
    out.put_slice(&amount_word(amount));
    Ok(out.freeze())
}

/// `balanceOf(owner)` calldata.
pub fn balance_of_calldata(owner: &Address) -> Result<Bytes, AbiError> {
    let mut out = BytesMut::with_capacity(4 + WORD_LEN);
    out.put_slice(&*SELECTOR_BALANCE_OF);
    out.put_slice(&address_word(owner)?);
    Ok(out.freeze())
}

/// `allowance(owner, spender)` calldata.
pub fn allowance_calldata(owner: &Address, spender: &Address) -> Result<Bytes, AbiError> {
    let mut out = BytesMut::with_capacity(4 + 2 * WORD_LEN);
    out.put_slice(&*SELECTOR_ALLOWANCE);
    out.put_slice(&address_word(owner)?);
    out.put_slice(&address_word(spender)?);
    Ok(out.freeze())
}

/// Amount as a big-endian 32-byte word.
pub fn amount_word(amount: Amount) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 16..].copy_from_slice(&amount.to_be_bytes());
    word
}

/// Decode one 32-byte word into an amount.
///
/// Words above the 128-bit range are rejected rather than truncated.
pub fn decode_amount_word(word: &[u8]) -> Result<Amount, AbiError> {
    if word.len() != WORD_LEN {
        return Err(AbiError::BadWordLength(word.len()));
    }
    if word[..WORD_LEN - 16].iter().any(|b| *b != 0) {
        return Err(AbiError::ValueOutOfRange);
    }
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&word[WORD_LEN - 16..]);
    Ok(Amount::from_be_bytes(raw))
}

/// Decode `approve(spender, amount)` calldata back into its arguments.
pub fn decode_approve_calldata(data: &[u8]) -> Result<(Address, Amount), AbiError> {
    let body = data
        .strip_prefix(&SELECTOR_APPROVE[..])
        .ok_or(AbiError::BadWordLength(data.len()))?;
    if body.len() != 2 * WORD_LEN {
        return Err(AbiError::BadWordLength(body.len()));
    }
    let spender = word_address(&body[..WORD_LEN])?;
    let amount = decode_amount_word(&body[WORD_LEN..])?;
    Ok((spender, amount))
}

fn word_address(word: &[u8]) -> Result<Address, AbiError> {
    if word.len() != WORD_LEN {
        return Err(AbiError::BadWordLength(word.len()));
    }
    if word[..WORD_LEN - 20].iter().any(|b| *b != 0) {
        return Err(AbiError::ValueOutOfRange);
    }
    Ok(Address::new(format!("0x{}", hex::encode(&word[WORD_LEN - 20..]))))
}

/// Address as a left-padded 32-byte word.
fn address_word(addr: &Address) -> Result<[u8; WORD_LEN], AbiError> {
    let hex_part = addr
        .as_str()
        .strip_prefix("0x")
        .ok_or_else(|| AbiError::InvalidAddress(addr.as_str().to_string()))?;
    let raw = hex::decode(hex_part).map_err(|_| AbiError::InvalidAddress(addr.as_str().to_string()))?;
    if raw.len() != 20 {
        return Err(AbiError::InvalidAddress(addr.as_str().to_string()));
    }
    let mut word = [0u8; WORD_LEN];
    word[WORD_LEN - 20..].copy_from_slice(&raw);
    Ok(word)
}

/// Extract the human-readable reason from `Error(string)` revert data.
///
/// Anything that does not parse cleanly yields `None`; the caller then
/// reports a reasonless revert instead of inventing text.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&SELECTOR_ERROR[..])?;
    if body.len() < 2 * WORD_LEN {
        return None;
    }
    // Offset and length words come from the remote node and may not be
    // sane; any value past the body fails the parse.
    let offset = usize::try_from(decode_amount_word(&body[..WORD_LEN]).ok()?).ok()?;
    let text_start = offset.checked_add(WORD_LEN)?;
    let len_word = body.get(offset..text_start)?;
    let len = usize::try_from(decode_amount_word(len_word).ok()?).ok()?;
    let text = body.get(text_start..text_start.checked_add(len)?)?;
    String::from_utf8(text.to_vec()).ok()
}

/// Encode a reason string as `Error(string)` revert data.
///
/// The simulator uses this so both connectors exercise the same decode
/// path.
pub fn encode_revert_reason(reason: &str) -> Bytes {
    let text = reason.as_bytes();
    let mut padded_len = text.len();
    if padded_len % WORD_LEN != 0 {
        padded_len += WORD_LEN - padded_len % WORD_LEN;
    }
    let mut out = BytesMut::with_capacity(4 + 2 * WORD_LEN + padded_len);
    out.put_slice(&*SELECTOR_ERROR);
    out.put_slice(&amount_word(WORD_LEN as Amount));
    out.put_slice(&amount_word(text.len() as Amount));
    out.put_slice(text);
    out.put_bytes(0, padded_len - text.len());
    out.freeze()
}
