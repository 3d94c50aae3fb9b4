//! Prometheus recorder installation and text rendering.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe the monitor metrics.
///
/// Call once at startup, before monitors start. Returns `true` if this call
/// installed the recorder, `false` if one was already set.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    trainwatch_monitor::metrics::describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

/// Current metrics in Prometheus text format. `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use trainwatch_core::ResetReason;
    use trainwatch_monitor::metrics as monitor_metrics;

    #[test]
    fn test_init_render_and_reinit() {
        assert!(init_metrics());
        assert!(!init_metrics());

        monitor_metrics::record_poll(Duration::from_millis(5));
        monitor_metrics::record_lines(3, 120);
        monitor_metrics::record_reset(ResetReason::Truncated);

        let text = render_metrics().unwrap();
        assert!(text.contains(monitor_metrics::POLLS_TOTAL));
        assert!(text.contains(monitor_metrics::LINES_INGESTED_TOTAL));
        assert!(text.contains("reason=\"truncated\""));
    }
}
