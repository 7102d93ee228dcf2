//! Reconciler: turns `SourceEvent`s into `ReloadTask`s.

use crate::annotation::{self, Decision, ScopeFilter};
use crate::collaborators::{SourceEvent, SourceEventStream, WorkloadIndex};
use crate::notifier::Notifier;
use crate::queue::{QueueHandle, ReloadTask};
use crate::resolver;
use crate::source::{Fingerprint, SourceKind, SourceObject};
use crate::strategy::Strategy;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Run `--reconcile-workers` concurrent copies of [`run`] sharing
/// one event stream, so the reconcile body — resolver + annotation policy
/// across every candidate workload in a namespace — isn't serialized behind
/// a single task when many source objects change at once. The stream itself
/// stays single-consumer (an event is only ever handed to one worker), the
/// same sharing discipline `supervisor.rs` already uses for apply workers.
pub async fn run_pool<S, W>(
    stream: S::Stream,
    workloads: Arc<W>,
    queue: QueueHandle,
    cache: Arc<FingerprintCache>,
    notifier: Arc<Notifier>,
    config: Arc<ReconcilerConfig>,
    workers: usize,
) where
    S: SourceEventStream,
    S::Stream: 'static,
    W: WorkloadIndex + 'static,
{
    let stream = Arc::new(tokio::sync::Mutex::new(stream));
    let mut handles = Vec::with_capacity(workers.max(1));
    for _ in 0..workers.max(1) {
        let stream = stream.clone();
        let workloads = workloads.clone();
        let queue = queue.clone();
        let cache = cache.clone();
        let notifier = notifier.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let event = {
                    let mut guard = stream.lock().await;
                    guard.next().await
                };
                let Some(event) = event else { break };
                handle_event(event, &*workloads, &queue, &cache, &notifier, &config);
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Per-source-object fingerprint cache, standing in for "the controller
/// cache's prior object revision". Keyed by identity, not
/// kept in the `WorkloadIndex`/`SourceEventStream` abstractions because it's
/// the Reconciler's own state, not a generic informer concern.
#[derive(Default)]
pub struct FingerprintCache {
    seen: Mutex<HashMap<(SourceKind, String, String), Fingerprint>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous fingerprint (if any) and records the new one.
    fn observe(&self, source: &SourceObject) -> Option<Fingerprint> {
        let key = (source.kind, source.namespace.clone(), source.name.clone());
        let new = source.fingerprint();
        self.seen.lock().insert(key, new.clone())
    }

    fn forget(&self, source: &SourceObject) {
        let key = (source.kind, source.namespace.clone(), source.name.clone());
        self.seen.lock().remove(&key);
    }
}

pub struct ReconcilerConfig {
    pub ignored_namespaces: Vec<String>,
    pub ignored_resources: Vec<String>,
    pub default_strategy: Strategy,
    pub reload_on_create: bool,
}

/// Run the reconcile loop: consume `stream`, and for every material change
/// fan out `ReloadTask`s for opted-in workloads via `queue`.
pub async fn run<S, W>(
    mut stream: S::Stream,
    workloads: Arc<W>,
    queue: QueueHandle,
    cache: Arc<FingerprintCache>,
    notifier: Arc<Notifier>,
    config: ReconcilerConfig,
) where
    S: SourceEventStream,
    W: WorkloadIndex,
{
    while let Some(event) = stream.next().await {
        handle_event(event, &*workloads, &queue, &cache, &notifier, &config);
    }
}

fn handle_event<W: WorkloadIndex>(
    event: anyhow::Result<SourceEvent>,
    workloads: &W,
    queue: &QueueHandle,
    cache: &FingerprintCache,
    notifier: &Notifier,
    config: &ReconcilerConfig,
) {
    match event {
        Ok(SourceEvent::Applied(source)) => {
            handle_applied(&source, workloads, queue, cache, notifier, config);
        }
        Ok(SourceEvent::Deleted(source)) => {
            // No action on delete: pods fail-fast on missing references.
            // Drop the cached fingerprint so a future object of the same
            // name is treated as a fresh Add.
            cache.forget(&source);
        }
        Err(err) => {
            warn!(error = %err, "source event stream error");
            notifier.record_stream_error();
        }
    }
}

#[instrument(skip_all, fields(namespace = %source.namespace, name = %source.name, kind = %source.kind))]
fn handle_applied<W: WorkloadIndex>(
    source: &SourceObject,
    workloads: &W,
    queue: &QueueHandle,
    cache: &FingerprintCache,
    notifier: &Notifier,
    config: &ReconcilerConfig,
) {
    notifier.record_event_received();
    let previous = cache.observe(source);

    let previous = match previous {
        None => {
            // Ignore Adds: nothing to diff against yet.
            if !config.reload_on_create {
                debug!("first observation of source object, skipping (reload-on-create disabled)");
                return;
            }
            None
        }
        Some(prev) => Some(prev),
    };

    let new_fingerprint = source.fingerprint();
    if let Some(prev) = &previous {
        if *prev == new_fingerprint {
            notifier.record_skipped_no_data_change();
            return;
        }
    }

    notifier.record_events_processed();
    let reconcile_started = std::time::Instant::now();

    let scope = ScopeFilter {
        ignored_namespaces: &config.ignored_namespaces,
        ignored_resources: &config.ignored_resources,
    };
    let candidates = workloads.candidates(&source.namespace);
    notifier.record_workloads_scanned(candidates.len());

    let mut matched = 0usize;
    for workload in candidates {
        if scope.excludes_kind(workload.kind()) {
            notifier.record_not_matched();
            continue;
        }
        let Some(pod_spec) = workload.pod_spec() else { continue };
        let references = resolver::resolve(pod_spec);
        let workload_annotations = workload.annotations();

        let decision = annotation::resolve(
            &workload_annotations,
            source.kind,
            &source.namespace,
            &source.name,
            &source.annotations,
            &references,
            &scope,
            config.default_strategy,
        );

        let Decision::Match { strategy, pause_period } = decision else {
            notifier.record_not_matched();
            continue;
        };

        if !resolver::references_name(&references, matches!(source.kind, SourceKind::ConfigMap), &source.name) {
            notifier.record_not_matched();
            continue;
        }

        matched += 1;
        queue.add(ReloadTask {
            workload_ref: workload.workload_ref(),
            trigger_source_namespace: source.namespace.clone(),
            trigger_source_name: source.name.clone(),
            trigger_is_configmap: matches!(source.kind, SourceKind::ConfigMap),
            trigger_fingerprint: new_fingerprint.clone(),
            strategy,
            pause_period,
            enqueued_at: Instant::now(),
            attempt: 0,
        });
        notifier.record_queue_add();
    }

    info!(matched, "fanned out reload tasks for source change");
    notifier.record_workloads_matched(matched);
    notifier.record_reconcile_duration(source.kind.as_lower(), reconcile_started.elapsed());
}
