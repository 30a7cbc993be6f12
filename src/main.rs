//! Agora - Tokenized Marketplace Orchestration Service
//!
//! Entry point for the orchestration service. Simulation mode drives demo
//! scenarios against the in-process simulated ledger, which is the fastest
//! way to watch the authorize-then-act sequencing end to end. Production
//! mode connects to the configured JSON-RPC endpoint and either executes a
//! single intent supplied on the command line or just serves metrics.

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora::classify::FailureKind;
use agora::config::Config;
use agora::endpoints;
use agora::ident::IdentifierAllocator;
use agora::ledger::http::HttpConnector;
use agora::ledger::sim::{JournalCall, SimulatedLedger};
use agora::ledger::LedgerConnector;
use agora::orchestrator::codec::JsonActionCodec;
use agora::orchestrator::engine::TransactionOrchestrator;
use agora::orchestrator::session::SessionOutcome;
use agora::quote::{ActionGasQuoter, QuoteInput, QuoteService};
use agora::store::{put_json, MemoryContentStore};
use agora::types::{ActionKind, TransactionIntent};
use agora::wallet::{LocalWallet, ScriptedSigner, TransactionSigner};

/// Smallest-unit value of one whole token in the reference deployment.
const WHOLE: u128 = 1_000_000_000_000_000_000;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Operating mode (simulation or production)
    #[arg(short, long, default_value = "simulation")]
    mode: String,

    /// Scenario for simulation mode: suite, purchase, listing, duplicate,
    /// rejected, paused, quote
    #[arg(short, long, default_value = "suite")]
    scenario: String,

    /// Action kind for a one-shot production intent
    #[arg(long)]
    kind: Option<ActionKind>,

    /// Principal for a one-shot production intent, in smallest token units
    #[arg(long)]
    principal: Option<u128>,

    /// Extra JSON fields for a one-shot production intent
    #[arg(long, default_value = "{}")]
    fields: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Metrics port override
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, loaded_from_file) = load_config(&args.config)?;
    init_logging(args.verbose, config.monitoring.log_json);

    info!("🚀 Starting Agora orchestration service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if loaded_from_file {
        info!(path = %args.config, "📋 Configuration loaded");
    } else {
        warn!(path = %args.config, "Config file not found, using defaults");
    }

    if config.monitoring.enable_metrics {
        let port = args.metrics_port.unwrap_or(config.monitoring.metrics_port);
        info!("📊 Starting metrics server on port {}", port);
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    match args.mode.as_str() {
        "production" => run_production(&args, &config).await,
        "simulation" => run_simulation(&args.scenario, &config).await,
        other => {
            warn!("Unknown mode '{}', defaulting to simulation", other);
            run_simulation(&args.scenario, &config).await
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "agora=debug,info"
    } else {
        "agora=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<(Config, bool)> {
    if std::path::Path::new(path).exists() {
        let config = Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))?;
        Ok((config, true))
    } else {
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok((config, false))
    }
}

async fn run_production(args: &Args, config: &Config) -> Result<()> {
    info!("🎯 Operating Mode: production");
    let wallet = config.wallet.load_wallet()?;
    info!("💼 Signer address: {}", wallet.address());

    let connector = Arc::new(HttpConnector::new(config.ledger.to_connector_config())?);
    let engine = Arc::new(TransactionOrchestrator::new(
        connector.clone(),
        Arc::new(wallet),
        Arc::new(JsonActionCodec),
        IdentifierAllocator::new(config.identifier.suffix_len)?,
        config.marketplace.token_address(),
        config.orchestrator.to_engine_config(),
    )?);

    let nonce = connector
        .pending_nonce(engine.signer_address())
        .await
        .context("ledger connectivity probe failed")?;
    info!(endpoint = %config.ledger.endpoint, pending_nonce = nonce, "🌐 Ledger reachable");

    let (Some(kind), Some(principal)) = (args.kind, args.principal) else {
        info!("No intent given (--kind/--principal), serving metrics until shutdown");
        tokio::signal::ctrl_c().await?;
        info!("👋 Shutting down gracefully...");
        return Ok(());
    };

    let fields: serde_json::Value =
        serde_json::from_str(&args.fields).context("--fields must be valid JSON")?;
    let intent = TransactionIntent::new(
        kind,
        principal,
        config.marketplace.policy_for(kind),
        config.marketplace.marketplace_address(),
        fields,
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    match report.outcome {
        SessionOutcome::Succeeded { .. } => Ok(()),
        other => bail!("session ended: {}", other.label()),
    }
}

async fn run_simulation(scenario: &str, config: &Config) -> Result<()> {
    info!("🎯 Operating Mode: simulation (in-process ledger)");
    match scenario {
        "suite" => {
            scenario_purchase(config).await?;
            scenario_listing(config).await?;
            scenario_duplicate_retry(config).await?;
            scenario_rejected(config).await?;
            scenario_paused(config).await?;
            scenario_quotes(config).await?;
            info!("✅ All scenarios completed");
            Ok(())
        }
        "purchase" => scenario_purchase(config).await,
        "listing" => scenario_listing(config).await,
        "duplicate" => scenario_duplicate_retry(config).await,
        "rejected" => scenario_rejected(config).await,
        "paused" => scenario_paused(config).await,
        "quote" => scenario_quotes(config).await,
        other => bail!("unknown scenario {:?}", other),
    }
}

fn sim_engine(
    config: &Config,
    sim: &Arc<SimulatedLedger>,
    signer: Arc<dyn TransactionSigner>,
) -> Result<Arc<TransactionOrchestrator>> {
    let engine = TransactionOrchestrator::new(
        sim.clone(),
        signer,
        Arc::new(JsonActionCodec),
        IdentifierAllocator::new(config.identifier.suffix_len)?,
        sim.token_address(),
        config.orchestrator.to_engine_config(),
    )?;
    Ok(Arc::new(engine))
}

fn report_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Succeeded {
            receipt,
            external_id,
        } => {
            info!(
                tx_hash = %receipt.tx_hash,
                block = receipt.block_number,
                external_id = %external_id,
                "✅ Session succeeded"
            );
        }
        SessionOutcome::Failed(err) => {
            warn!(
                kind = %err.kind,
                retryable = err.retryable,
                raw = %err.raw_message,
                "Session failed"
            );
        }
        SessionOutcome::TimedOut { phase } => {
            warn!(phase = phase.as_str(), "Session timed out awaiting confirmation");
        }
    }
}

/// Funded buyer, zero allowance: full authorize-then-act sequence.
async fn scenario_purchase(config: &Config) -> Result<()> {
    info!("── scenario: purchase, full authorize-then-act ──");
    let sim = Arc::new(SimulatedLedger::new());
    let engine = sim_engine(config, &sim, Arc::new(LocalWallet::generate()))?;
    sim.fund(engine.signer_address(), 1_000 * WHOLE);

    let intent = TransactionIntent::new(
        ActionKind::Purchase,
        100 * WHOLE,
        config.marketplace.policy_for(ActionKind::Purchase),
        sim.marketplace_address(),
        serde_json::json!({ "listing_id": "lst_demo" }),
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    if !matches!(report.outcome, SessionOutcome::Succeeded { .. }) {
        bail!("purchase scenario did not succeed");
    }
    info!(
        transactions = sim.journal().len(),
        remaining_balance = %sim.balance(engine.signer_address()),
        "Ledger journal after purchase"
    );
    Ok(())
}

/// Pre-existing allowance covers the spend: authorization is skipped.
async fn scenario_listing(config: &Config) -> Result<()> {
    info!("── scenario: listing with pre-existing allowance ──");
    let sim = Arc::new(SimulatedLedger::new());
    let engine = sim_engine(config, &sim, Arc::new(LocalWallet::generate()))?;
    let owner = engine.signer_address().clone();
    sim.fund(&owner, 1_000 * WHOLE);
    sim.set_allowance(&owner, &sim.marketplace_address(), 500 * WHOLE);

    let store = MemoryContentStore::new();
    let metadata = put_json(
        &store,
        &serde_json::json!({
            "title": "Vintage modular synth",
            "description": "Fully serviced, original patch cables included",
        }),
    )
    .await?;

    let intent = TransactionIntent::new(
        ActionKind::List,
        100 * WHOLE,
        config.marketplace.policy_for(ActionKind::List),
        sim.marketplace_address(),
        serde_json::json!({ "content": metadata.as_str() }),
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    if !matches!(report.outcome, SessionOutcome::Succeeded { .. }) {
        bail!("listing scenario did not succeed");
    }
    let approvals = sim
        .journal()
        .iter()
        .filter(|e| matches!(e.call, JournalCall::Approve { .. }))
        .count();
    if approvals != 0 {
        bail!("listing scenario expected the authorization to be skipped");
    }
    info!("Authorization skipped, existing allowance covered the spend");
    Ok(())
}

/// Two forced duplicate-identifier rejections, then success on the third
/// attempt with a third distinct identifier.
async fn scenario_duplicate_retry(config: &Config) -> Result<()> {
    info!("── scenario: duplicate identifiers, bounded retry ──");
    let sim = Arc::new(SimulatedLedger::new());
    let engine = sim_engine(config, &sim, Arc::new(LocalWallet::generate()))?;
    sim.fund(engine.signer_address(), 1_000 * WHOLE);
    sim.force_duplicate_rejections(2);

    let intent = TransactionIntent::new(
        ActionKind::CreateLoan,
        200 * WHOLE,
        config.marketplace.policy_for(ActionKind::CreateLoan),
        sim.marketplace_address(),
        serde_json::json!({ "term_days": 30 }),
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    if !matches!(report.outcome, SessionOutcome::Succeeded { .. }) {
        bail!("duplicate-retry scenario did not succeed");
    }

    let mut ids: Vec<String> = sim
        .journal()
        .iter()
        .filter_map(|e| match &e.call {
            JournalCall::Action { external_id, .. } => Some(external_id.clone()),
            _ => None,
        })
        .collect();
    info!(
        attempts = report.session.attempts(),
        identifiers = ?ids,
        "Retried with a fresh identifier each time"
    );
    ids.sort_unstable();
    ids.dedup();
    if report.session.attempts() != 3 || ids.len() != 3 {
        bail!("expected exactly three distinct identifiers across three attempts");
    }
    Ok(())
}

/// The signer declines: nothing is ever broadcast.
async fn scenario_rejected(config: &Config) -> Result<()> {
    info!("── scenario: user rejects the signing prompt ──");
    let sim = Arc::new(SimulatedLedger::new());
    let signer = Arc::new(ScriptedSigner::new(LocalWallet::generate()));
    signer.reject_next();
    let engine = sim_engine(config, &sim, signer)?;
    sim.fund(engine.signer_address(), 1_000 * WHOLE);

    let intent = TransactionIntent::new(
        ActionKind::Stake,
        50 * WHOLE,
        config.marketplace.policy_for(ActionKind::Stake),
        sim.marketplace_address(),
        serde_json::json!({}),
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    match &report.outcome {
        SessionOutcome::Failed(err) if err.kind == FailureKind::UserRejected => {}
        other => bail!("expected a user-rejected failure, got {}", other.label()),
    }
    if sim.submissions() != 0 {
        bail!("a rejected signing still broadcast a transaction");
    }
    info!("Rejection surfaced cleanly, no transaction was broadcast");
    Ok(())
}

/// Paused marketplace: the action reverts and the failure is terminal.
async fn scenario_paused(config: &Config) -> Result<()> {
    info!("── scenario: paused marketplace contract ──");
    let sim = Arc::new(SimulatedLedger::new());
    let engine = sim_engine(config, &sim, Arc::new(LocalWallet::generate()))?;
    sim.fund(engine.signer_address(), 1_000 * WHOLE);
    sim.set_paused(true);

    let intent = TransactionIntent::new(
        ActionKind::Repay,
        25 * WHOLE,
        config.marketplace.policy_for(ActionKind::Repay),
        sim.marketplace_address(),
        serde_json::json!({ "borrowing_id": "brw_demo" }),
    )?;

    let report = engine.execute(intent).await;
    report_outcome(&report.outcome);
    match &report.outcome {
        SessionOutcome::Failed(err) if err.kind == FailureKind::ContractPaused => {}
        other => bail!("expected a contract-paused failure, got {}", other.label()),
    }
    info!("Pause detected and surfaced without retries");
    Ok(())
}

/// Rapid form edits settle into one quote, with a ledger gas preview,
/// after the debounce window.
async fn scenario_quotes(config: &Config) -> Result<()> {
    info!("── scenario: debounced live quotes ──");
    let sim = Arc::new(SimulatedLedger::new());
    let buyer = LocalWallet::generate();
    let quoter = ActionGasQuoter::new(
        sim.clone(),
        Arc::new(JsonActionCodec),
        buyer.address().clone(),
        sim.marketplace_address(),
    );
    let quotes = QuoteService::spawn_with_gas(
        Duration::from_millis(config.quotes.debounce_ms),
        Arc::new(quoter),
    );
    for principal in [10u128, 250, 100] {
        quotes.update(QuoteInput {
            kind: ActionKind::Purchase,
            principal: principal * WHOLE,
            policy: config.marketplace.policy_for(ActionKind::Purchase),
        });
    }
    tokio::time::sleep(Duration::from_millis(config.quotes.debounce_ms * 3)).await;

    match quotes.latest() {
        Some(quote) => {
            info!(
                principal = %quote.principal,
                fee = %quote.breakdown.fee,
                total = %quote.breakdown.total,
                gas = ?quote.gas_estimate,
                "Quote settled on the last edit"
            );
            if quote.principal != 100 * WHOLE {
                bail!("quote should reflect the final edit");
            }
            if quote.gas_estimate.is_none() {
                bail!("gas preview missing from the settled quote");
            }
            Ok(())
        }
        None => bail!("quote never settled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_one_shot_intent() {
        let args = Args::try_parse_from([
            "agora",
            "--mode",
            "production",
            "--kind",
            "purchase",
            "--principal",
            "1000000000000000000",
        ])
        .unwrap();
        assert_eq!(args.kind, Some(ActionKind::Purchase));
        assert_eq!(args.principal, Some(WHOLE));
        assert_eq!(args.scenario, "suite");
    }

    #[test]
    fn test_default_config_is_runnable() {
        Config::default().validate().unwrap();
    }
}
