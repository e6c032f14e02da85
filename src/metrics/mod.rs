//! Process-local counters and gauges, exported in Prometheus text format.
//!
//! Counters are plain atomics bumped on the hot path; the scrape endpoint
//! renders them on demand so no background collection task is needed.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    pub authorisation_attempts: AtomicU64,
    pub authorisations_successful: AtomicU64,
    pub authorisations_rejected: AtomicU64,
    pub authorisation_errors: AtomicU64,

    pub captures_submitted: AtomicU64,
    pub captures_retried: AtomicU64,
    pub capture_errors: AtomicU64,
    /// Charges currently awaiting capture, refreshed by each sweep.
    pub capture_queue_size: AtomicU64,
    pub capture_sweeps: AtomicU64,
    pub capture_sweep_duration_ms_total: AtomicU64,

    pub refunds_submitted: AtomicU64,
    pub refund_errors: AtomicU64,

    pub notifications_received: AtomicU64,
    pub notifications_skipped: AtomicU64,
}

fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_authorisation_attempt(&self) {
        inc(&self.authorisation_attempts);
    }

    pub fn record_authorisation_success(&self) {
        inc(&self.authorisations_successful);
    }

    pub fn record_authorisation_rejected(&self) {
        inc(&self.authorisations_rejected);
    }

    pub fn record_authorisation_error(&self) {
        inc(&self.authorisation_errors);
    }

    pub fn record_capture_submitted(&self) {
        inc(&self.captures_submitted);
    }

    pub fn record_capture_retried(&self) {
        inc(&self.captures_retried);
    }

    pub fn record_capture_error(&self) {
        inc(&self.capture_errors);
    }

    pub fn set_capture_queue_size(&self, size: u64) {
        self.capture_queue_size.store(size, Ordering::Relaxed);
    }

    pub fn record_capture_sweep(&self, duration: std::time::Duration) {
        inc(&self.capture_sweeps);
        self.capture_sweep_duration_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_refund_submitted(&self) {
        inc(&self.refunds_submitted);
    }

    pub fn record_refund_error(&self) {
        inc(&self.refund_errors);
    }

    pub fn record_notification_received(&self) {
        inc(&self.notifications_received);
    }

    pub fn record_notification_skipped(&self) {
        inc(&self.notifications_skipped);
    }

    /// Renders every metric in Prometheus exposition format. The executor
    /// queue depth is owned by the executor and passed in at scrape time.
    pub fn render_prometheus(&self, executor_queue_depth: u64) -> String {
        let mut out = String::with_capacity(1024);
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        };
        counter(
            "connector_authorisation_attempts_total",
            "Authorisation operations started",
            self.authorisation_attempts.load(Ordering::Relaxed),
        );
        counter(
            "connector_authorisations_successful_total",
            "Authorisations accepted by the gateway",
            self.authorisations_successful.load(Ordering::Relaxed),
        );
        counter(
            "connector_authorisations_rejected_total",
            "Authorisations declined by the gateway",
            self.authorisations_rejected.load(Ordering::Relaxed),
        );
        counter(
            "connector_authorisation_errors_total",
            "Authorisations failed on gateway communication",
            self.authorisation_errors.load(Ordering::Relaxed),
        );
        counter(
            "connector_captures_submitted_total",
            "Captures submitted to the gateway",
            self.captures_submitted.load(Ordering::Relaxed),
        );
        counter(
            "connector_captures_retried_total",
            "Capture attempts scheduled for retry",
            self.captures_retried.load(Ordering::Relaxed),
        );
        counter(
            "connector_capture_errors_total",
            "Charges abandoned in capture error",
            self.capture_errors.load(Ordering::Relaxed),
        );
        counter(
            "connector_capture_sweeps_total",
            "Capture sweep runs",
            self.capture_sweeps.load(Ordering::Relaxed),
        );
        counter(
            "connector_capture_sweep_duration_ms_total",
            "Cumulative capture sweep wall time in milliseconds",
            self.capture_sweep_duration_ms_total.load(Ordering::Relaxed),
        );
        counter(
            "connector_refunds_submitted_total",
            "Refunds submitted to the gateway",
            self.refunds_submitted.load(Ordering::Relaxed),
        );
        counter(
            "connector_refund_errors_total",
            "Refunds failed at the gateway",
            self.refund_errors.load(Ordering::Relaxed),
        );
        counter(
            "connector_notifications_received_total",
            "Notification events received",
            self.notifications_received.load(Ordering::Relaxed),
        );
        counter(
            "connector_notifications_skipped_total",
            "Notification events skipped as unusable",
            self.notifications_skipped.load(Ordering::Relaxed),
        );

        let mut gauge = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        };
        gauge(
            "connector_capture_queue_size",
            "Charges awaiting capture at the last sweep",
            self.capture_queue_size.load(Ordering::Relaxed),
        );
        gauge(
            "connector_executor_queue_depth",
            "Gateway operations queued but not yet running",
            executor_queue_depth,
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() {
        let metrics = ConnectorMetrics::new();
        metrics.record_authorisation_attempt();
        metrics.record_authorisation_attempt();
        metrics.record_authorisation_success();
        metrics.set_capture_queue_size(7);

        let text = metrics.render_prometheus(3);
        assert!(text.contains("connector_authorisation_attempts_total 2"));
        assert!(text.contains("connector_authorisations_successful_total 1"));
        assert!(text.contains("connector_capture_queue_size 7"));
        assert!(text.contains("connector_executor_queue_depth 3"));
    }
}
