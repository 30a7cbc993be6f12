//! Fee and collateral computation.
//!
//! The ledger enforces totals in its own fixed-point unit; the client must
//! arrive at the same numbers or authorizations come up short. Everything
//! here is checked integer arithmetic on `u128`, never floating point, so
//! the client-side estimate and the ledger-enforced total cannot drift.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Amount, SpendPolicy, BPS_DENOMINATOR};

/// Breakdown of the spend required for one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Principal in smallest token units.
    pub principal: Amount,

    /// Marketplace fee: `floor(principal * fee_bps / 10000)`.
    pub fee: Amount,

    /// Collateral: `floor(principal * collateral_bps / 10000)`, zero when
    /// the policy defines no ratio.
    pub collateral: Amount,

    /// The amount the spender must be authorized to pull:
    /// `principal + fee + collateral`.
    pub total: Amount,
}

/// Errors from fee computation.
///
/// Amounts are unsigned by construction, so the negative/non-finite inputs
/// the ledger would reject cannot be represented here; what remains is
/// malformed policy and arithmetic overflow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("amount overflow computing spend for principal {principal} at {bps} bps")]
    Overflow { principal: Amount, bps: u32 },
}

/// Compute the required spend for `principal` under `policy`.
///
/// Pure and deterministic: two calls with identical inputs always yield
/// identical breakdowns.
pub fn required_spend(principal: Amount, policy: &SpendPolicy) -> Result<FeeBreakdown, FeeError> {
    policy
        .validate()
        .map_err(|e| FeeError::InvalidInput(e.to_string()))?;

    let fee = bps_share(principal, policy.fee_bps)?;
    let collateral = match policy.collateral_bps {
        Some(bps) => bps_share(principal, bps)?,
        None => 0,
    };

    let total = principal
        .checked_add(fee)
        .and_then(|t| t.checked_add(collateral))
        .ok_or(FeeError::Overflow {
            principal,
            bps: policy.fee_bps,
        })?;

    Ok(FeeBreakdown {
        principal,
        fee,
        collateral,
        total,
    })
}

/// `floor(amount * bps / 10000)` with overflow detection.
fn bps_share(amount: Amount, bps: u32) -> Result<Amount, FeeError> {
    amount
        .checked_mul(bps as u128)
        .map(|scaled| scaled / BPS_DENOMINATOR)
        .ok_or(FeeError::Overflow {
            principal: amount,
            bps,
        })
}
