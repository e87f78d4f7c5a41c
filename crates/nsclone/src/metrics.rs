use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static CLONES_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "clone_requests_started_total",
        "Total number of clone operations that created a clone record",
    )
    .unwrap()
});

pub static CLONES_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "clone_requests_rejected_total",
        "Clone requests rejected because the source already has an ongoing clone",
    )
    .unwrap()
});

pub static STATE_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "clone_state_transitions_total",
            "Committed clone state transitions by target state",
        ),
        &["state"],
    )
    .unwrap()
});

pub static RECONCILE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "clone_reconcile_failures_total",
        "Per-record failures during reconciliation sweeps",
    )
    .unwrap()
});

pub static CLONES_IN_PROGRESS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "clone_in_progress",
        "Tracked clone records not yet restored, as of the last sweep",
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    register_metrics_with(&REGISTRY)
}

/// Register all metrics with a caller-owned registry.
pub fn register_metrics_with(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(CLONES_STARTED.clone()))?;
    registry.register(Box::new(CLONES_REJECTED.clone()))?;
    registry.register(Box::new(STATE_TRANSITIONS.clone()))?;
    registry.register(Box::new(RECONCILE_FAILURES.clone()))?;
    registry.register(Box::new(CLONES_IN_PROGRESS.clone()))?;
    Ok(())
}
