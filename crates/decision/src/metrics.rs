// Metrics hooks for the decision engine.
//
// A process installs one `DecisionMetrics` implementation with
// [`set_decision_metrics`]; every `DecisionEngine` then reports request
// latency, campaign counts and rejection categories to it. No metrics backend
// is linked here.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::rules::RejectionCategory;

/// Metrics observer for showtime decisions.
pub trait DecisionMetrics: Send + Sync {
    /// One completed decision. `evaluated` counts the active campaigns that
    /// were looked at, `displayed` the ones returned to the client.
    fn record_decision(&self, latency: Duration, evaluated: usize, displayed: usize);

    /// One skipped campaign, or one request aborted by validation.
    fn record_rejection(&self, category: RejectionCategory);
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn DecisionMetrics>>> {
    static METRICS: OnceCell<RwLock<Option<Arc<dyn DecisionMetrics>>>> = OnceCell::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

pub(crate) fn metrics_recorder() -> Option<Arc<dyn DecisionMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

/// Install or clear the global decision metrics recorder.
pub fn set_decision_metrics(recorder: Option<Arc<dyn DecisionMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}
