//! Configuration for the orchestration service.
//!
//! This module handles all configuration loading from TOML files,
//! environment variables, and provides structured configuration types.
//! Fee and collateral rates are externally supplied policy, never derived
//! in code; the `[marketplace.policies]` table is their single source.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ident::{IdentifierAllocator, DEFAULT_SUFFIX_LEN};
use crate::ledger::http::HttpConnectorConfig;
use crate::orchestrator::engine::OrchestratorConfig;
use crate::types::{ActionKind, Address, SpendPolicy};
use crate::wallet::LocalWallet;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ledger RPC connection
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Wallet configuration
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Token and marketplace contracts plus the per-kind spend policies
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Orchestration limits and confirmation timing
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// External identifier allocation
    #[serde(default)]
    pub identifier: IdentifierConfig,

    /// Live quote recomputation
    #[serde(default)]
    pub quotes: QuoteConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra attempts for transient read failures
    #[serde(default = "default_read_retry_attempts")]
    pub read_retry_attempts: usize,

    /// Base backoff between read retries in milliseconds
    #[serde(default = "default_read_retry_base_ms")]
    pub read_retry_base_ms: u64,

    /// Rate limit (requests per second)
    #[serde(default = "default_rate_limit")]
    pub max_requests_per_second: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to a file holding the base58 signing key.
    ///
    /// `AGORA_KEYPAIR` overrides the file; with neither set an ephemeral
    /// key is generated, which only makes sense against the simulator.
    #[serde(default)]
    pub keypair_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Fungible token contract the spend flows through
    #[serde(default = "default_token")]
    pub token: String,

    /// Marketplace contract receiving actions, and the approve spender
    #[serde(default = "default_marketplace")]
    pub marketplace: String,

    /// Spend policy per action kind; kinds absent here fall back to
    /// [`MarketplaceConfig::default_policy_for`]
    #[serde(default = "default_policies")]
    pub policies: HashMap<ActionKind, SpendPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Action submissions per session, identifier retries included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Authorization rounds per session, the initial one included
    #[serde(default = "default_max_auth_rounds")]
    pub max_auth_rounds: u32,

    /// Headroom over gas estimates, in basis points
    #[serde(default = "default_gas_margin_bps")]
    pub gas_margin_bps: u32,

    /// Confirmation poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Confirmation deadline per submission in milliseconds
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    /// Wait cycles one resume call performs before reporting timeout again
    #[serde(default = "default_resume_repoll_rounds")]
    pub resume_repoll_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierConfig {
    /// Random suffix length for external identifiers
    #[serde(default = "default_suffix_len")]
    pub suffix_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Quiet window before a quote recomputes, in milliseconds
    #[serde(default = "default_quote_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable the Prometheus endpoint
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,
}

// Default value functions
fn default_endpoint() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_read_retry_attempts() -> usize {
    2
}
fn default_read_retry_base_ms() -> u64 {
    200
}
fn default_rate_limit() -> u32 {
    20
}
fn default_token() -> String {
    format!("0x{}", "ee".repeat(20))
}
fn default_marketplace() -> String {
    format!("0x{}", "fa".repeat(20))
}
fn default_max_attempts() -> u32 {
    3
}
fn default_max_auth_rounds() -> u32 {
    3
}
fn default_gas_margin_bps() -> u32 {
    1_500
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_confirm_timeout_ms() -> u64 {
    30_000
}
fn default_resume_repoll_rounds() -> u32 {
    1
}
fn default_suffix_len() -> usize {
    DEFAULT_SUFFIX_LEN
}
fn default_quote_debounce_ms() -> u64 {
    250
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_true() -> bool {
    true
}

/// Reference policy table. Rates come from the deployed marketplace
/// contracts; listings and credit operations run at 42 bps, purchase and
/// stake at 420 bps, collateral only on the borrowing side.
fn default_policies() -> HashMap<ActionKind, SpendPolicy> {
    let mut policies = HashMap::new();
    for kind in ActionKind::ALL {
        policies.insert(kind, MarketplaceConfig::default_policy_for(kind));
    }
    policies
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            read_retry_attempts: default_read_retry_attempts(),
            read_retry_base_ms: default_read_retry_base_ms(),
            max_requests_per_second: default_rate_limit(),
        }
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            marketplace: default_marketplace(),
            policies: default_policies(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_auth_rounds: default_max_auth_rounds(),
            gas_margin_bps: default_gas_margin_bps(),
            poll_interval_ms: default_poll_interval_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            resume_repoll_rounds: default_resume_repoll_rounds(),
        }
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            suffix_len: default_suffix_len(),
        }
    }
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_quote_debounce_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
            log_json: false,
        }
    }
}

impl LedgerConfig {
    pub fn to_connector_config(&self) -> HttpConnectorConfig {
        HttpConnectorConfig {
            endpoint: self.endpoint.clone(),
            request_timeout_ms: self.request_timeout_ms,
            read_retry_attempts: self.read_retry_attempts,
            read_retry_base_ms: self.read_retry_base_ms,
            max_requests_per_second: self.max_requests_per_second,
        }
    }
}

impl WalletConfig {
    /// Resolve the signing wallet: `AGORA_KEYPAIR`, then the configured
    /// file, then a freshly generated ephemeral key.
    pub fn load_wallet(&self) -> anyhow::Result<LocalWallet> {
        if let Ok(secret) = std::env::var("AGORA_KEYPAIR") {
            return Ok(LocalWallet::from_base58(secret.trim())?);
        }
        if let Some(path) = &self.keypair_path {
            let raw = std::fs::read_to_string(path)?;
            return Ok(LocalWallet::from_base58(raw.trim())?);
        }
        tracing::warn!("No keypair configured, generating an ephemeral wallet");
        Ok(LocalWallet::generate())
    }
}

impl MarketplaceConfig {
    pub fn token_address(&self) -> Address {
        Address::new(self.token.clone())
    }

    pub fn marketplace_address(&self) -> Address {
        Address::new(self.marketplace.clone())
    }

    /// Policy for `kind`, falling back to the reference rates when the
    /// table omits it.
    pub fn policy_for(&self, kind: ActionKind) -> SpendPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Self::default_policy_for(kind))
    }

    pub fn default_policy_for(kind: ActionKind) -> SpendPolicy {
        match kind {
            ActionKind::Purchase | ActionKind::Stake => SpendPolicy::flat(420),
            ActionKind::CreateBorrowing => SpendPolicy::with_collateral(42, 1_000),
            ActionKind::List
            | ActionKind::CreateLoan
            | ActionKind::Repay
            | ActionKind::Lend => SpendPolicy::flat(42),
        }
    }
}

impl OrchestratorSettings {
    pub fn to_engine_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts: self.max_attempts,
            max_auth_rounds: self.max_auth_rounds,
            gas_margin_bps: self.gas_margin_bps,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirm_timeout: Duration::from_millis(self.confirm_timeout_ms),
            resume_repoll_rounds: self.resume_repoll_rounds,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override settings that commonly differ per deployment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("AGORA_LEDGER_ENDPOINT") {
            self.ledger.endpoint = endpoint;
        }
        if let Ok(port) = std::env::var("AGORA_METRICS_PORT") {
            if let Ok(port) = port.parse() {
                self.monitoring.metrics_port = port;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger.endpoint.is_empty() {
            anyhow::bail!("ledger.endpoint must not be empty");
        }
        if self.ledger.max_requests_per_second == 0 {
            anyhow::bail!("ledger.max_requests_per_second must be at least 1");
        }
        if self.marketplace.token.is_empty() || self.marketplace.marketplace.is_empty() {
            anyhow::bail!("marketplace.token and marketplace.marketplace must be set");
        }
        for (kind, policy) in &self.marketplace.policies {
            policy
                .validate()
                .map_err(|e| anyhow::anyhow!("policy for {kind}: {e}"))?;
        }
        self.orchestrator.to_engine_config().validate()?;
        IdentifierAllocator::new(self.identifier.suffix_len)?;
        Ok(())
    }
}
