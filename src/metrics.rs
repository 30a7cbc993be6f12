//! Prometheus metrics.
//!
//! One typed registry for the whole process, reachable through
//! [`Metrics::global`]. The engine records session lifecycle and retry
//! counts; the monitoring endpoint renders the registry on demand.

use std::time::Instant;

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::error;

static GLOBAL: Lazy<Metrics> = Lazy::new(|| {
    Metrics::new().expect("metrics registry initialization")
});

pub struct Metrics {
    registry: Registry,

    pub sessions_started: IntCounter,
    /// Outcome label: succeeded, failed, timed_out.
    pub sessions_completed: IntCounterVec,
    /// Failure kind label, classifier categories.
    pub failures_by_kind: IntCounterVec,
    pub active_sessions: IntGauge,

    pub authorizations_submitted: IntCounter,
    pub actions_submitted: IntCounter,
    pub identifier_retries: IntCounter,
    pub reauthorization_rounds: IntCounter,

    pub confirmation_seconds: Histogram,
    pub gas_limits: Histogram,
}

impl Metrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sessions_started = IntCounter::with_opts(Opts::new(
            "agora_sessions_started_total",
            "Orchestration sessions created",
        ))?;
        let sessions_completed = IntCounterVec::new(
            Opts::new(
                "agora_sessions_completed_total",
                "Driving passes finished, by outcome",
            ),
            &["outcome"],
        )?;
        let failures_by_kind = IntCounterVec::new(
            Opts::new(
                "agora_session_failures_total",
                "Terminal session failures, by classified kind",
            ),
            &["kind"],
        )?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            "agora_active_sessions",
            "Sessions currently being driven",
        ))?;
        let authorizations_submitted = IntCounter::with_opts(Opts::new(
            "agora_authorizations_submitted_total",
            "Authorization transactions broadcast",
        ))?;
        let actions_submitted = IntCounter::with_opts(Opts::new(
            "agora_actions_submitted_total",
            "Action transactions broadcast",
        ))?;
        let identifier_retries = IntCounter::with_opts(Opts::new(
            "agora_identifier_retries_total",
            "Action resubmissions after identifier collisions",
        ))?;
        let reauthorization_rounds = IntCounter::with_opts(Opts::new(
            "agora_reauthorization_rounds_total",
            "Authorization rounds beyond the first",
        ))?;
        let confirmation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "agora_confirmation_seconds",
                "Wall time from broadcast to final status",
            )
            .buckets(prometheus::exponential_buckets(0.25, 2.0, 10)?),
        )?;
        let gas_limits = Histogram::with_opts(
            HistogramOpts::new("agora_gas_limits", "Gas limits on broadcast transactions")
                .buckets(prometheus::exponential_buckets(21_000.0, 2.0, 10)?),
        )?;

        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(sessions_completed.clone()))?;
        registry.register(Box::new(failures_by_kind.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(authorizations_submitted.clone()))?;
        registry.register(Box::new(actions_submitted.clone()))?;
        registry.register(Box::new(identifier_retries.clone()))?;
        registry.register(Box::new(reauthorization_rounds.clone()))?;
        registry.register(Box::new(confirmation_seconds.clone()))?;
        registry.register(Box::new(gas_limits.clone()))?;

        Ok(Self {
            registry,
            sessions_started,
            sessions_completed,
            failures_by_kind,
            active_sessions,
            authorizations_submitted,
            actions_submitted,
            identifier_retries,
            reauthorization_rounds,
            confirmation_seconds,
            gas_limits,
        })
    }

    pub fn global() -> &'static Metrics {
        &GLOBAL
    }

    /// Text exposition of every registered collector.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn confirmation_timer(&self) -> Timer {
        Timer {
            histogram: self.confirmation_seconds.clone(),
            started: Instant::now(),
        }
    }
}

/// Measures one interval into a histogram.
pub struct Timer {
    histogram: Histogram,
    started: Instant,
}

impl Timer {
    pub fn observe(self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.histogram.observe(elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_and_render() {
        let metrics = Metrics::global();
        metrics.sessions_started.inc();
        metrics
            .sessions_completed
            .with_label_values(&["succeeded"])
            .inc();
        metrics
            .failures_by_kind
            .with_label_values(&["duplicate_identifier"])
            .inc();

        let rendered = metrics.render();
        assert!(rendered.contains("agora_sessions_started_total"));
        assert!(rendered.contains("outcome=\"succeeded\""));
        assert!(rendered.contains("kind=\"duplicate_identifier\""));
    }

    #[test]
    fn test_timer_observes_elapsed() {
        let metrics = Metrics::global();
        let before = metrics.confirmation_seconds.get_sample_count();
        let timer = metrics.confirmation_timer();
        let elapsed = timer.observe();
        assert!(elapsed >= 0.0);
        assert_eq!(metrics.confirmation_seconds.get_sample_count(), before + 1);
    }
}
