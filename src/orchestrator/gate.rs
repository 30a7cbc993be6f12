//! Allowance gating.
//!
//! Decides whether an authorization round is needed before an action can
//! pull funds. Both reads go to the ledger on every check; allowance and
//! balance move underneath us whenever any other transaction for the same
//! owner lands, so a cached value is worthless the moment it is returned.

use std::sync::Arc;

use tracing::debug;

use crate::ledger::{LedgerConnector, LedgerError};
use crate::types::{Address, Amount};

/// Snapshot of spendability at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowanceReport {
    pub balance: Amount,
    pub allowance: Amount,
    pub required: Amount,
}

impl AllowanceReport {
    /// Authorized spend does not cover the required total.
    pub fn needs_authorization(&self) -> bool {
        self.allowance < self.required
    }

    /// Owner cannot fund the required total even if authorized.
    pub fn sufficient_balance(&self) -> bool {
        self.balance >= self.required
    }
}

pub struct AllowanceGate {
    connector: Arc<dyn LedgerConnector>,
    token: Address,
}

impl AllowanceGate {
    pub fn new(connector: Arc<dyn LedgerConnector>, token: Address) -> Self {
        Self { connector, token }
    }

    /// Read balance and allowance fresh and relate them to `required`.
    pub async fn check(
        &self,
        owner: &Address,
        spender: &Address,
        required: Amount,
    ) -> Result<AllowanceReport, LedgerError> {
        let balance = self.connector.balance_of(&self.token, owner).await?;
        let allowance = self.connector.allowance(&self.token, owner, spender).await?;
        let report = AllowanceReport {
            balance,
            allowance,
            required,
        };
        debug!(
            balance,
            allowance,
            required,
            needs_authorization = report.needs_authorization(),
            "allowance gate checked"
        );
        Ok(report)
    }
}
