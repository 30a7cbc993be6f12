//! Two-phase transaction orchestration.
//!
//! Marketplace actions spend a token the acting contract must first be
//! authorized to pull, so every intent runs as authorize-then-act: check
//! the live allowance, broadcast an approval when it falls short, wait for
//! it, then broadcast the action itself and wait again. The engine owns
//! that sequence end to end, including identifier retries, allowance
//! re-authorization, and resumption after a confirmation timeout.

pub mod codec;
pub mod engine;
pub mod gate;
pub mod session;

pub use codec::{ActionCodec, ActionEnvelope, CodecError, JsonActionCodec};
pub use engine::{
    OrchestrationReport, OrchestratorConfig, SessionHandle, TransactionOrchestrator,
};
pub use gate::{AllowanceGate, AllowanceReport};
pub use session::{
    OrchestrationSession, PendingPhase, Phase, SessionOutcome, SessionState,
};
