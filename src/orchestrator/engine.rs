//! The orchestration engine.
//!
//! Drives a session through authorize-then-act as a single loop over
//! explicit steps. Recovery re-enters earlier steps instead of recursing:
//! an identifier collision re-enters the action step with a fresh
//! identifier, an allowance shortfall re-enters authorization, and both
//! are bounded by budgets from [`OrchestratorConfig`].
//!
//! Submissions from one engine are serialized so two sessions sharing the
//! signing account cannot race the same nonce. Confirmation waits run
//! outside that lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::codec::ActionCodec;
use super::gate::AllowanceGate;
use super::session::{
    OrchestrationSession, Phase, SessionOutcome, SessionState, TransitionError,
};
use crate::classify::{classify, ClassifiedError, FailureKind};
use crate::fees;
use crate::ident::IdentifierAllocator;
use crate::ledger::confirm::{ConfirmationOutcome, ConfirmationWaiter};
use crate::ledger::session::{LedgerSession, DEFAULT_GAS_MARGIN_BPS};
use crate::ledger::{LedgerConnector, PendingTransaction};
use crate::logging::SessionLogger;
use crate::metrics::Metrics;
use crate::observability::TraceContext;
use crate::types::{Address, Amount, TransactionIntent};
use crate::wallet::TransactionSigner;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Action submissions per session, identifier retries included.
    pub max_attempts: u32,
    /// Authorization rounds per session, the initial one included.
    pub max_auth_rounds: u32,
    /// Headroom over gas estimates, in basis points.
    pub gas_margin_bps: u32,
    pub poll_interval: Duration,
    pub confirm_timeout: Duration,
    /// Wait cycles one resume call performs before reporting timeout again.
    pub resume_repoll_rounds: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_auth_rounds: 3,
            gas_margin_bps: DEFAULT_GAS_MARGIN_BPS,
            poll_interval: crate::ledger::confirm::DEFAULT_POLL_INTERVAL,
            confirm_timeout: crate::ledger::confirm::DEFAULT_CONFIRM_TIMEOUT,
            resume_repoll_rounds: 1,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.max_auth_rounds == 0 {
            bail!("max_auth_rounds must be at least 1");
        }
        if !(1_000..=2_000).contains(&self.gas_margin_bps) {
            bail!(
                "gas_margin_bps {} outside the 10%..20% band",
                self.gas_margin_bps
            );
        }
        if self.poll_interval.is_zero() || self.poll_interval >= self.confirm_timeout {
            bail!("poll_interval must be nonzero and below confirm_timeout");
        }
        Ok(())
    }
}

/// A finished driving pass: the session record plus how the pass ended.
#[derive(Debug)]
pub struct OrchestrationReport {
    pub session: OrchestrationSession,
    pub outcome: SessionOutcome,
}

/// Handle to a session driven on a background task.
pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    abandon: Arc<AtomicBool>,
    join: JoinHandle<OrchestrationReport>,
}

impl SessionHandle {
    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that wakes on every state transition.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop the session before its next submission. Anything already
    /// broadcast cannot be recalled and will still confirm or revert on
    /// the ledger.
    pub fn abandon(&self) {
        self.abandon.store(true, Ordering::SeqCst);
    }

    pub async fn join(self) -> Result<OrchestrationReport, tokio::task::JoinError> {
        self.join.await
    }
}

/// Per-pass context: optional state broadcast plus the abandon flag.
struct SessionCtx {
    watch: Option<watch::Sender<SessionState>>,
    abandon: Arc<AtomicBool>,
}

impl SessionCtx {
    fn detached() -> Self {
        Self {
            watch: None,
            abandon: Arc::new(AtomicBool::new(false)),
        }
    }

    fn notify(&self, state: SessionState) {
        if let Some(tx) = &self.watch {
            let _ = tx.send(state);
        }
    }

    fn abandoned(&self) -> bool {
        self.abandon.load(Ordering::SeqCst)
    }
}

/// Next move in the driving loop.
enum Step {
    GateCheck,
    BeginAuthorization,
    AwaitAuthorization(PendingTransaction),
    BeginAction,
    AwaitAction(PendingTransaction),
}

enum GateDecision {
    Proceed,
    Authorize,
    Fail(ClassifiedError),
}

enum ActionRecovery {
    Retry,
    Reauthorize,
    Terminal(SessionOutcome),
}

pub struct TransactionOrchestrator {
    ledger: LedgerSession,
    waiter: ConfirmationWaiter,
    gate: AllowanceGate,
    codec: Arc<dyn ActionCodec>,
    allocator: IdentifierAllocator,
    config: OrchestratorConfig,
    token: Address,
    registry: DashMap<Uuid, SessionState>,
    submit_lock: tokio::sync::Mutex<()>,
}

impl TransactionOrchestrator {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        signer: Arc<dyn TransactionSigner>,
        codec: Arc<dyn ActionCodec>,
        allocator: IdentifierAllocator,
        token: Address,
        config: OrchestratorConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let ledger = LedgerSession::new(connector.clone(), signer, config.gas_margin_bps);
        let waiter = ConfirmationWaiter::new(
            connector.clone(),
            config.poll_interval,
            config.confirm_timeout,
        );
        let gate = AllowanceGate::new(connector, token.clone());
        Ok(Self {
            ledger,
            waiter,
            gate,
            codec,
            allocator,
            config,
            token,
            registry: DashMap::new(),
            submit_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn signer_address(&self) -> &Address {
        self.ledger.signer_address()
    }

    /// Sessions currently being driven, with their latest state.
    pub fn active_sessions(&self) -> Vec<(Uuid, SessionState)> {
        self.registry
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Drive one intent to an outcome on the calling task.
    pub async fn execute(&self, intent: TransactionIntent) -> OrchestrationReport {
        let mut session = match self.open_session(intent) {
            Ok(session) => session,
            Err(report) => return report,
        };
        let outcome = self.drive(&mut session, &SessionCtx::detached()).await;
        OrchestrationReport { session, outcome }
    }

    /// Drive one intent on a background task.
    pub fn spawn(self: &Arc<Self>, intent: TransactionIntent) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let abandon = Arc::new(AtomicBool::new(false));
        let ctx = SessionCtx {
            watch: Some(state_tx),
            abandon: abandon.clone(),
        };
        let engine = Arc::clone(self);
        let join = tokio::spawn(async move {
            let mut session = match engine.open_session(intent) {
                Ok(session) => session,
                Err(report) => return report,
            };
            let outcome = engine.drive(&mut session, &ctx).await;
            OrchestrationReport { session, outcome }
        });
        SessionHandle {
            state: state_rx,
            abandon,
            join,
        }
    }

    /// Continue a session whose last pass timed out waiting for
    /// confirmation. Performs up to `resume_repoll_rounds` wait cycles.
    pub async fn resume(&self, session: &mut OrchestrationSession) -> SessionOutcome {
        if session.state().is_terminal() || session.pending().is_none() {
            SessionLogger::for_session(session.id).warn("resume with nothing pending");
            return SessionOutcome::Failed(ClassifiedError::new(
                FailureKind::Unknown,
                "session is not resumable",
            ));
        }
        let ctx = SessionCtx::detached();
        let rounds = self.config.resume_repoll_rounds.max(1);
        let mut outcome = SessionOutcome::TimedOut {
            phase: match session.pending() {
                Some(p) => p.phase,
                None => Phase::Action,
            },
        };
        for _ in 0..rounds {
            outcome = self.drive(session, &ctx).await;
            if outcome.is_terminal() {
                break;
            }
        }
        outcome
    }

    fn open_session(
        &self,
        intent: TransactionIntent,
    ) -> Result<OrchestrationSession, OrchestrationReport> {
        match fees::required_spend(intent.principal, &intent.policy) {
            Ok(breakdown) => {
                Metrics::global().sessions_started.inc();
                let session = OrchestrationSession::new(intent, breakdown);
                SessionLogger::for_session(session.id).log_session_opened(
                    session.intent.kind,
                    session.intent.principal,
                    session.breakdown.total,
                );
                Ok(session)
            }
            Err(e) => {
                let err = ClassifiedError::new(FailureKind::Unknown, e.to_string());
                let breakdown = crate::fees::FeeBreakdown {
                    principal: intent.principal,
                    fee: 0,
                    collateral: 0,
                    total: 0,
                };
                let mut session = OrchestrationSession::new(intent, breakdown);
                let _ = session.advance(SessionState::Failed);
                session.note_failure(err.clone());
                Err(OrchestrationReport {
                    session,
                    outcome: SessionOutcome::Failed(err),
                })
            }
        }
    }

    async fn drive(&self, session: &mut OrchestrationSession, ctx: &SessionCtx) -> SessionOutcome {
        let metrics = Metrics::global();
        metrics.active_sessions.inc();
        self.registry.insert(session.id, session.state());
        let session_id = session.id;
        let _cleanup = scopeguard::guard((), |_| {
            Metrics::global().active_sessions.dec();
            self.registry.remove(&session_id);
        });

        let outcome = match self.drive_inner(session, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                SessionLogger::for_session(session.id).error(&e.to_string());
                let err = ClassifiedError::new(FailureKind::Unknown, e.to_string());
                session.note_failure(err.clone());
                SessionOutcome::Failed(err)
            }
        };

        metrics
            .sessions_completed
            .with_label_values(&[outcome.label()])
            .inc();
        if let SessionOutcome::Failed(err) = &outcome {
            metrics
                .failures_by_kind
                .with_label_values(&[err.kind.category()])
                .inc();
        }
        outcome
    }

    async fn drive_inner(
        &self,
        session: &mut OrchestrationSession,
        ctx: &SessionCtx,
    ) -> Result<SessionOutcome, TransitionError> {
        let logger = SessionLogger::for_session(session.id);
        let trace = TraceContext::for_session(session.id);
        let mut step = match (session.pending().cloned(), session.state()) {
            (Some(pending), _) => match pending.phase {
                Phase::Authorization => Step::AwaitAuthorization(pending.tx),
                Phase::Action => Step::AwaitAction(pending.tx),
            },
            (None, SessionState::Idle) => Step::GateCheck,
            (None, _) => {
                return self.fail(
                    session,
                    ctx,
                    ClassifiedError::new(FailureKind::Unknown, "session is not resumable"),
                );
            }
        };

        loop {
            step = match step {
                Step::GateCheck => match self.gate_decision(session).await {
                    GateDecision::Fail(err) => return self.fail(session, ctx, err),
                    GateDecision::Authorize => Step::BeginAuthorization,
                    GateDecision::Proceed => Step::BeginAction,
                },

                Step::BeginAuthorization => {
                    if session.auth_rounds >= self.config.max_auth_rounds {
                        let err = ClassifiedError::exhausted(
                            FailureKind::InsufficientAllowance,
                            format!(
                                "allowance still below required total after {} authorization rounds",
                                session.auth_rounds
                            ),
                        );
                        return self.fail(session, ctx, err);
                    }
                    session.auth_rounds += 1;
                    if session.auth_rounds > 1 {
                        Metrics::global().reauthorization_rounds.inc();
                    }
                    let span = trace.phase_span(Phase::Authorization);
                    debug!(
                        trace_id = %span.trace_id(),
                        span_id = %span.span_id(),
                        round = session.auth_rounds,
                        "authorization phase opened"
                    );
                    self.step(session, ctx, SessionState::Authorizing)?;

                    if ctx.abandoned() {
                        return self.fail(session, ctx, abandoned_error());
                    }
                    let payload = match self
                        .codec
                        .encode_authorization(&session.intent.spender, session.breakdown.total)
                    {
                        Ok(payload) => payload,
                        Err(e) => {
                            let err = ClassifiedError::new(FailureKind::Unknown, e.to_string());
                            return self.fail(session, ctx, err);
                        }
                    };
                    let submitted = {
                        let _guard = self.submit_lock.lock().await;
                        self.ledger.submit(&self.token, payload).await
                    };
                    match submitted {
                        Ok(pending) => {
                            Metrics::global().authorizations_submitted.inc();
                            logger.log_authorization_submitted(
                                &pending.hash,
                                session.breakdown.total,
                            );
                            self.step(session, ctx, SessionState::AwaitingAuthorization)?;
                            session.set_pending(Phase::Authorization, pending.clone());
                            Step::AwaitAuthorization(pending)
                        }
                        Err(e) => return self.fail(session, ctx, e.classify()),
                    }
                }

                Step::AwaitAuthorization(pending) => {
                    let timer = Metrics::global().confirmation_timer();
                    let outcome = self.waiter.wait(&pending).await;
                    timer.observe();
                    match outcome {
                        ConfirmationOutcome::TimedOut { .. } => {
                            return Ok(SessionOutcome::TimedOut {
                                phase: Phase::Authorization,
                            });
                        }
                        ConfirmationOutcome::Reverted { reason } => {
                            let raw =
                                reason.unwrap_or_else(|| "execution reverted".to_string());
                            return self.fail(session, ctx, classify(&raw));
                        }
                        ConfirmationOutcome::Confirmed(receipt) => {
                            logger.log_authorization_confirmed(
                                &receipt.tx_hash,
                                receipt.block_number,
                            );
                            session.clear_pending();
                            // The allowance moved; decide again from what
                            // the ledger says now, not from what we asked
                            // for.
                            match self.gate_decision(session).await {
                                GateDecision::Fail(err) => return self.fail(session, ctx, err),
                                GateDecision::Authorize => Step::BeginAuthorization,
                                GateDecision::Proceed => Step::BeginAction,
                            }
                        }
                    }
                }

                Step::BeginAction => {
                    let external_id = self.allocator.allocate(session.intent.kind);
                    session.external_id = Some(external_id.clone());
                    let span = trace.phase_span(Phase::Action);
                    debug!(
                        trace_id = %span.trace_id(),
                        span_id = %span.span_id(),
                        attempt = session.attempts + 1,
                        "action phase opened"
                    );
                    self.step(session, ctx, SessionState::Acting)?;

                    if ctx.abandoned() {
                        return self.fail(session, ctx, abandoned_error());
                    }
                    let payload = match self.codec.encode_action(&session.intent, &external_id) {
                        Ok(payload) => payload,
                        Err(e) => {
                            let err = ClassifiedError::new(FailureKind::Unknown, e.to_string());
                            return self.fail(session, ctx, err);
                        }
                    };
                    session.attempts += 1;
                    let submitted = {
                        let _guard = self.submit_lock.lock().await;
                        self.ledger.submit(&session.intent.spender, payload).await
                    };
                    match submitted {
                        Ok(pending) => {
                            Metrics::global().actions_submitted.inc();
                            logger.log_action_submitted(
                                external_id.as_str(),
                                &pending.hash,
                                session.attempts,
                            );
                            self.step(session, ctx, SessionState::AwaitingAction)?;
                            session.set_pending(Phase::Action, pending.clone());
                            Step::AwaitAction(pending)
                        }
                        Err(e) => match self.action_failure_recovery(session, ctx, e.classify())? {
                            ActionRecovery::Retry => Step::BeginAction,
                            ActionRecovery::Reauthorize => Step::BeginAuthorization,
                            ActionRecovery::Terminal(outcome) => return Ok(outcome),
                        },
                    }
                }

                Step::AwaitAction(pending) => {
                    let timer = Metrics::global().confirmation_timer();
                    let outcome = self.waiter.wait(&pending).await;
                    timer.observe();
                    match outcome {
                        ConfirmationOutcome::TimedOut { .. } => {
                            return Ok(SessionOutcome::TimedOut {
                                phase: Phase::Action,
                            });
                        }
                        ConfirmationOutcome::Confirmed(receipt) => {
                            session.clear_pending();
                            // Resolve the identifier while the session can
                            // still step to Failed; Succeeded is terminal.
                            let external_id = match session.external_id.clone() {
                                Some(id) => id,
                                None => {
                                    let err = ClassifiedError::new(
                                        FailureKind::Unknown,
                                        "confirmed action carries no identifier",
                                    );
                                    return self.fail(session, ctx, err);
                                }
                            };
                            self.step(session, ctx, SessionState::Succeeded)?;
                            logger.log_action_confirmed(
                                external_id.as_str(),
                                &receipt.tx_hash,
                                receipt.block_number,
                                receipt.gas_used,
                            );
                            return Ok(SessionOutcome::Succeeded {
                                receipt,
                                external_id,
                            });
                        }
                        ConfirmationOutcome::Reverted { reason } => {
                            session.clear_pending();
                            let raw =
                                reason.unwrap_or_else(|| "execution reverted".to_string());
                            match self.action_failure_recovery(session, ctx, classify(&raw))? {
                                ActionRecovery::Retry => Step::BeginAction,
                                ActionRecovery::Reauthorize => Step::BeginAuthorization,
                                ActionRecovery::Terminal(outcome) => return Ok(outcome),
                            }
                        }
                    }
                }
            };
        }
    }

    /// Fresh balance/allowance reads related to the session's total.
    async fn gate_decision(&self, session: &OrchestrationSession) -> GateDecision {
        let owner = self.ledger.signer_address();
        let required: Amount = session.breakdown.total;
        match self.gate.check(owner, &session.intent.spender, required).await {
            Err(e) => GateDecision::Fail(classify(&e.raw_text())),
            Ok(report) if !report.sufficient_balance() => {
                GateDecision::Fail(ClassifiedError::new(
                    FailureKind::InsufficientBalance,
                    format!(
                        "insufficient balance: have {}, need {}",
                        report.balance, report.required
                    ),
                ))
            }
            Ok(report) if report.needs_authorization() => GateDecision::Authorize,
            Ok(_) => GateDecision::Proceed,
        }
    }

    /// Decide where an action failure sends the loop.
    fn action_failure_recovery(
        &self,
        session: &mut OrchestrationSession,
        ctx: &SessionCtx,
        classified: ClassifiedError,
    ) -> Result<ActionRecovery, TransitionError> {
        session.note_failure(classified.clone());
        match classified.kind {
            FailureKind::DuplicateIdentifier if classified.retryable => {
                if session.attempts >= self.config.max_attempts {
                    let err = ClassifiedError::exhausted(
                        FailureKind::DuplicateIdentifier,
                        format!(
                            "identifier retry budget exhausted after {} attempts",
                            session.attempts
                        ),
                    );
                    return Ok(ActionRecovery::Terminal(self.fail(session, ctx, err)?));
                }
                Metrics::global().identifier_retries.inc();
                if let Some(rejected) = session.external_id.as_ref() {
                    SessionLogger::for_session(session.id)
                        .log_identifier_retry(rejected.as_str(), session.attempts);
                }
                Ok(ActionRecovery::Retry)
            }
            FailureKind::InsufficientAllowance if classified.retryable => {
                SessionLogger::for_session(session.id).log_reauthorization(session.auth_rounds);
                Ok(ActionRecovery::Reauthorize)
            }
            _ => Ok(ActionRecovery::Terminal(self.fail(session, ctx, classified)?)),
        }
    }

    fn fail(
        &self,
        session: &mut OrchestrationSession,
        ctx: &SessionCtx,
        err: ClassifiedError,
    ) -> Result<SessionOutcome, TransitionError> {
        SessionLogger::for_session(session.id).log_failure(&err);
        self.step(session, ctx, SessionState::Failed)?;
        session.clear_pending();
        session.note_failure(err.clone());
        Ok(SessionOutcome::Failed(err))
    }

    /// Advance and broadcast; self-transitions are no-ops.
    fn step(
        &self,
        session: &mut OrchestrationSession,
        ctx: &SessionCtx,
        next: SessionState,
    ) -> Result<(), TransitionError> {
        if session.state() == next {
            return Ok(());
        }
        session.advance(next)?;
        self.registry.insert(session.id, next);
        ctx.notify(next);
        Ok(())
    }
}

fn abandoned_error() -> ClassifiedError {
    ClassifiedError::exhausted(FailureKind::UserRejected, "session abandoned before submission")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sim::{JournalCall, SimulatedLedger};
    use crate::orchestrator::codec::JsonActionCodec;
    use crate::types::{ActionKind, SpendPolicy};
    use crate::wallet::{LocalWallet, ScriptedSigner};
    use serde_json::json;

    fn engine_on(sim: &Arc<SimulatedLedger>) -> (Arc<TransactionOrchestrator>, Arc<ScriptedSigner>) {
        let signer = Arc::new(ScriptedSigner::new(LocalWallet::from_secret_bytes(&[8u8; 32])));
        let engine = TransactionOrchestrator::new(
            sim.clone(),
            signer.clone(),
            Arc::new(JsonActionCodec),
            IdentifierAllocator::default(),
            sim.token_address(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(50),
                confirm_timeout: Duration::from_secs(5),
                ..OrchestratorConfig::default()
            },
        )
        .unwrap();
        (Arc::new(engine), signer)
    }

    fn purchase_intent(sim: &SimulatedLedger, principal: Amount) -> TransactionIntent {
        TransactionIntent::new(
            ActionKind::Purchase,
            principal,
            SpendPolicy::flat(420),
            sim.marketplace_address(),
            json!({ "listing": "lst_demo" }),
        )
        .unwrap()
    }

    #[test]
    fn test_config_bounds() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        assert!(OrchestratorConfig {
            gas_margin_bps: 900,
            ..OrchestratorConfig::default()
        }
        .validate()
        .is_err());
        assert!(OrchestratorConfig {
            gas_margin_bps: 2_100,
            ..OrchestratorConfig::default()
        }
        .validate()
        .is_err());
        assert!(OrchestratorConfig {
            max_attempts: 0,
            ..OrchestratorConfig::default()
        }
        .validate()
        .is_err());
        assert!(OrchestratorConfig {
            poll_interval: Duration::from_secs(60),
            ..OrchestratorConfig::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_authorizes_then_acts() {
        let sim = Arc::new(SimulatedLedger::new());
        let (engine, _) = engine_on(&sim);
        sim.fund(engine.signer_address(), 10_000_000);

        let report = engine.execute(purchase_intent(&sim, 1_000_000)).await;
        assert!(
            matches!(report.outcome, SessionOutcome::Succeeded { .. }),
            "outcome: {:?}",
            report.outcome
        );
        assert_eq!(report.session.state(), SessionState::Succeeded);
        assert_eq!(report.session.attempts(), 1);
        assert_eq!(report.session.auth_rounds(), 1);

        let journal = sim.journal();
        assert_eq!(journal.len(), 2);
        assert!(matches!(journal[0].call, JournalCall::Approve { .. }));
        assert!(matches!(journal[1].call, JournalCall::Action { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_before_any_submission() {
        let sim = Arc::new(SimulatedLedger::new());
        let (engine, _) = engine_on(&sim);
        sim.fund(engine.signer_address(), 10_000_000);
        // Keep the first confirmation pending long enough to observe states.
        sim.set_confirmation_delay(u32::MAX);

        let handle = engine.spawn(purchase_intent(&sim, 1_000_000));
        handle.abandon();
        // Abandoning immediately can still lose the race with the first
        // authorization submit; what must hold is that no ACTION ever goes
        // out after the flag is up and the session ends non-success.
        let report = handle.join().await.unwrap();
        assert!(matches!(
            report.outcome,
            SessionOutcome::Failed(_) | SessionOutcome::TimedOut { .. }
        ));
        assert!(sim
            .journal()
            .iter()
            .all(|entry| matches!(entry.call, JournalCall::Approve { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rejects_terminal_sessions() {
        let sim = Arc::new(SimulatedLedger::new());
        let (engine, _) = engine_on(&sim);
        sim.fund(engine.signer_address(), 10_000_000);

        let mut report = engine.execute(purchase_intent(&sim, 1_000_000)).await;
        assert!(report.outcome.is_terminal());
        let outcome = engine.resume(&mut report.session).await;
        match outcome {
            SessionOutcome::Failed(err) => {
                assert!(err.raw_message.contains("not resumable"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_empties_after_completion() {
        let sim = Arc::new(SimulatedLedger::new());
        let (engine, _) = engine_on(&sim);
        sim.fund(engine.signer_address(), 10_000_000);

        let report = engine.execute(purchase_intent(&sim, 1_000)).await;
        assert!(report.outcome.is_terminal());
        assert!(engine.active_sessions().is_empty());
    }
}
