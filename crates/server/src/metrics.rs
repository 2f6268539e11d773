//! Prometheus wiring for the decision engine metrics hook.
use std::sync::Arc;
use std::time::Duration;

use decision::{set_decision_metrics, DecisionMetrics, RejectionCategory};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Reports decisions through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusDecisionMetrics;

impl DecisionMetrics for PrometheusDecisionMetrics {
    fn record_decision(&self, latency: Duration, evaluated: usize, displayed: usize) {
        metrics::counter!("showtime_decisions_total").increment(1);
        metrics::histogram!("showtime_decision_duration_seconds").record(latency.as_secs_f64());
        metrics::histogram!("showtime_campaigns_evaluated").record(evaluated as f64);
        metrics::counter!("showtime_campaigns_displayed_total").increment(displayed as u64);
    }

    fn record_rejection(&self, category: RejectionCategory) {
        metrics::counter!("showtime_rejections_total", "category" => category.as_str()).increment(1);
    }
}

/// Install the process-wide Prometheus recorder and the decision metrics
/// hook. Later calls return the handle installed by the first one.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
    let handle = HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        set_decision_metrics(Some(Arc::new(PrometheusDecisionMetrics)));
        tracing::info!("prometheus recorder installed");
        Ok::<_, anyhow::Error>(handle)
    })?;
    Ok(handle.clone())
}
