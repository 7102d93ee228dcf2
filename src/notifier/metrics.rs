//! Prometheus metric families for the Notifier.

use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
};

pub struct Metrics {
    pub registry: Registry,
    pub events_received_total: IntCounter,
    pub events_processed_total: IntCounter,
    pub skipped_total: IntCounterVec,
    pub workloads_scanned_total: IntCounter,
    pub workloads_matched_total: IntCounter,
    pub action_total: IntCounterVec,
    pub reload_executed_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub retries_total: IntCounter,
    pub dropped_total: IntCounter,
    pub webhook_failures_total: IntCounter,
    pub queue_depth: IntGauge,
    pub queue_adds_total: IntCounter,
    pub queue_latency_seconds: HistogramVec,
    pub reconcile_duration_seconds: HistogramVec,
    pub action_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_received_total = IntCounter::new(
            "reloader_events_received_total",
            "Source object events observed from the watch stream, before the no-op filter.",
        )
        .unwrap();
        let events_processed_total = IntCounter::new(
            "reloader_events_processed_total",
            "Source object events that passed the no-op filter.",
        )
        .unwrap();
        let skipped_total = IntCounterVec::new(
            opts!("reloader_skipped_total", "Source events skipped without enqueuing a task."),
            &["reason"],
        )
        .unwrap();
        let workloads_scanned_total = IntCounter::new(
            "reloader_workloads_scanned_total",
            "Candidate workloads evaluated against the annotation policy.",
        )
        .unwrap();
        let workloads_matched_total = IntCounter::new(
            "reloader_workloads_matched_total",
            "Workloads that opted in and were enqueued for reload.",
        )
        .unwrap();
        let action_total = IntCounterVec::new(
            opts!("reloader_action_total", "Reload actions applied, by workload kind and result."),
            &["workload_kind", "result"],
        )
        .unwrap();
        let reload_executed_total = IntCounterVec::new(
            opts!("reloader_reload_executed_total", "Reload actions executed against the Kubernetes API, by outcome."),
            &["success"],
        )
        .unwrap();
        let errors_total = IntCounterVec::new(
            opts!("reloader_errors_total", "Terminal errors encountered applying reload tasks."),
            &["type"],
        )
        .unwrap();
        let retries_total = IntCounter::new(
            "reloader_retries_total",
            "Reload tasks re-enqueued after a transient or conflict error.",
        )
        .unwrap();
        let dropped_total = IntCounter::new(
            "reloader_dropped_total",
            "Reload tasks dropped after exhausting the retry budget.",
        )
        .unwrap();
        let webhook_failures_total = IntCounter::new(
            "reloader_webhook_failures_total",
            "Webhook deliveries that returned a non-2xx status or failed to send.",
        )
        .unwrap();
        let queue_depth = IntGauge::new("reloader_queue_depth", "Current work queue depth.").unwrap();
        let queue_adds_total =
            IntCounter::new("reloader_queue_adds_total", "Tasks added to the work queue.").unwrap();
        let queue_latency_seconds = HistogramVec::new(
            histogram_opts!(
                "reloader_queue_latency_seconds",
                "Time a task spent queued before a worker picked it up."
            ),
            &["workload_kind"],
        )
        .unwrap();
        let reconcile_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "reloader_reconcile_duration_seconds",
                "Time spent fanning out one source object change to candidate workloads."
            ),
            &["source_kind"],
        )
        .unwrap();
        let action_latency_seconds = HistogramVec::new(
            histogram_opts!("reloader_action_latency_seconds", "Time spent applying one reload task."),
            &["workload_kind"],
        )
        .unwrap();

        for collector in [
            Box::new(events_received_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(events_processed_total.clone()),
            Box::new(skipped_total.clone()),
            Box::new(workloads_scanned_total.clone()),
            Box::new(workloads_matched_total.clone()),
            Box::new(action_total.clone()),
            Box::new(reload_executed_total.clone()),
            Box::new(errors_total.clone()),
            Box::new(retries_total.clone()),
            Box::new(dropped_total.clone()),
            Box::new(webhook_failures_total.clone()),
            Box::new(queue_depth.clone()),
            Box::new(queue_adds_total.clone()),
            Box::new(queue_latency_seconds.clone()),
            Box::new(reconcile_duration_seconds.clone()),
            Box::new(action_latency_seconds.clone()),
        ] {
            registry.register(collector).expect("metric names are unique and valid");
        }

        Metrics {
            registry,
            events_received_total,
            events_processed_total,
            skipped_total,
            workloads_scanned_total,
            workloads_matched_total,
            action_total,
            reload_executed_total,
            errors_total,
            retries_total,
            dropped_total,
            webhook_failures_total,
            queue_depth,
            queue_adds_total,
            queue_latency_seconds,
            reconcile_duration_seconds,
            action_latency_seconds,
        }
    }

    /// Render the registry in Prometheus text exposition format for the
    /// `/metrics` handler.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("text encoding cannot fail for valid metric families");
        String::from_utf8(buf).expect("prometheus text encoder emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
