//! Agora - Tokenized Marketplace Transaction Orchestration
//!
//! Turns a user's marketplace intent (list, purchase, lend, borrow, stake,
//! repay) into the authorize-then-act transaction sequence the ledger
//! requires, and sees each transaction through signing, submission, and
//! confirmation.

pub mod classify;
pub mod config;
pub mod endpoints;
pub mod fees;
pub mod ident;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod quote;
pub mod store;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use classify::{classify, ClassifiedError, FailureKind};
pub use fees::{required_spend, FeeBreakdown};
pub use orchestrator::engine::{OrchestrationReport, OrchestratorConfig, TransactionOrchestrator};
pub use orchestrator::session::{SessionOutcome, SessionState};
pub use types::{ActionKind, Address, Amount, SpendPolicy, TransactionIntent, TxHash};
