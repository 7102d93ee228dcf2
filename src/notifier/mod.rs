//! Notifier: metrics + optional webhook. Two independent sinks — a failed
//! metric emission never blocks progress, and the webhook call never
//! affects the reload outcome.

mod metrics;
pub mod webhook;

pub use metrics::Metrics;
pub use webhook::{WebhookPayload, WebhookSink, WorkloadSummary};

use std::time::Duration;

pub struct Notifier {
    metrics: Metrics,
    webhook: Option<WebhookSink>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, webhook_timeout: Option<Duration>) -> Self {
        Notifier { metrics: Metrics::new(), webhook: WebhookSink::new(webhook_url, webhook_timeout) }
    }

    pub fn new_for_test() -> Self {
        Notifier { metrics: Metrics::new(), webhook: None }
    }

    pub fn registry(&self) -> &prometheus::Registry {
        &self.metrics.registry
    }

    pub fn render_metrics(&self) -> String {
        self.metrics.encode()
    }

    pub fn record_stream_error(&self) {
        self.metrics.errors_total.with_label_values(&["stream"]).inc();
    }

    pub fn record_skipped_no_data_change(&self) {
        self.metrics.skipped_total.with_label_values(&["no-data-change"]).inc();
    }

    pub fn record_not_matched(&self) {
        self.metrics.skipped_total.with_label_values(&["not-matched"]).inc();
    }

    pub fn record_event_received(&self) {
        self.metrics.events_received_total.inc();
    }

    pub fn record_events_processed(&self) {
        self.metrics.events_processed_total.inc();
    }

    pub fn record_workloads_scanned(&self, n: usize) {
        self.metrics.workloads_scanned_total.inc_by(n as u64);
    }

    pub fn record_workloads_matched(&self, n: usize) {
        self.metrics.workloads_matched_total.inc_by(n as u64);
    }

    pub fn record_queue_add(&self) {
        self.metrics.queue_adds_total.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.metrics.queue_depth.set(depth as i64);
    }

    pub fn record_queue_latency(&self, workload_kind: &str, latency: Duration) {
        self.metrics.queue_latency_seconds.with_label_values(&[workload_kind]).observe(latency.as_secs_f64());
    }

    pub fn record_reconcile_duration(&self, source_kind: &str, duration: Duration) {
        self.metrics.reconcile_duration_seconds.with_label_values(&[source_kind]).observe(duration.as_secs_f64());
    }

    pub fn record_action_success(&self, workload_kind: &str, latency: Duration) {
        self.metrics.action_total.with_label_values(&[workload_kind, "success"]).inc();
        self.metrics.action_latency_seconds.with_label_values(&[workload_kind]).observe(latency.as_secs_f64());
        self.metrics.reload_executed_total.with_label_values(&["true"]).inc();
    }

    pub fn record_action_failure(&self, workload_kind: &str, latency: Duration) {
        self.metrics.action_total.with_label_values(&[workload_kind, "failure"]).inc();
        self.metrics.action_latency_seconds.with_label_values(&[workload_kind]).observe(latency.as_secs_f64());
        self.metrics.reload_executed_total.with_label_values(&["false"]).inc();
    }

    pub fn record_retry(&self) {
        self.metrics.retries_total.inc();
    }

    pub fn record_error(&self, label: &str) {
        self.metrics.errors_total.with_label_values(&[label]).inc();
    }

    pub fn record_dropped(&self) {
        self.metrics.dropped_total.inc();
    }

    /// Best-effort; errors are logged inside `WebhookSink::post` and never
    /// propagated. A non-2xx/failed delivery is counted but never retried —
    /// the webhook is observational, not authoritative.
    pub async fn notify_webhook(&self, payload: &WebhookPayload) {
        if let Some(webhook) = &self.webhook {
            if !webhook.post(payload).await {
                self.metrics.webhook_failures_total.inc();
            }
        }
    }
}
