//! Controller Supervisor: builds informers, starts reconciler and
//! queue workers, serves `/healthz`/`/readyz`/`/metrics`, and drains the
//! queue on shutdown within a configured timeout.

use crate::applier::Applier;
use crate::collaborators::kube_impl::{spawn_reflectors, KubeSourceStream, KubeWorkloadIndex, OptionalKinds};
use crate::config::Config;
use crate::notifier::Notifier;
use crate::pause::PauseState;
use crate::queue::{self, QueueHandle, WorkerHandle};
use crate::reconciler::{self, FingerprintCache, ReconcilerConfig};
use crate::webserver;
use kube::Client;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(config: Config, client: Client) -> anyhow::Result<()> {
    let notifier = Arc::new(Notifier::new(
        config.webhook.as_ref().map(|w| w.url().to_string()),
        config.webhook.as_ref().map(|w| w.timeout()),
    ));
    let pause_state = Arc::new(PauseState::new());
    let fingerprint_cache = Arc::new(FingerprintCache::new());
    let shutdown = CancellationToken::new();

    let optional_kinds = OptionalKinds {
        deployment_config: config.enable_deployment_config,
        argo_rollouts: config.enable_argo_rollouts,
    };
    let (workload_index, reflector_handles) = spawn_reflectors(client.clone(), optional_kinds);
    let workload_index = Arc::new(workload_index);

    let (queue, worker, queue_join) = queue::spawn(config.max_retries);
    let worker = Arc::new(Mutex::new(worker));

    let webserver_state =
        webserver::AppState { notifier: notifier.clone(), workload_index: workload_index.clone(), queue: queue.clone() };
    let webserver_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    let webserver_join = tokio::spawn(webserver::serve(webserver_addr, webserver_state, shutdown.clone()));

    let reconciler_config = Arc::new(ReconcilerConfig {
        ignored_namespaces: config.namespaces_to_ignore.clone(),
        ignored_resources: config.resources_to_ignore.clone(),
        default_strategy: config.reload_strategy,
        reload_on_create: config.reload_on_create,
    });
    let source_stream = KubeSourceStream::new(client.clone(), None).watch();
    let reconcile_join = tokio::spawn(reconciler::run_pool::<KubeSourceStream, KubeWorkloadIndex>(
        source_stream,
        workload_index.clone(),
        queue.clone(),
        fingerprint_cache.clone(),
        notifier.clone(),
        reconciler_config,
        config.reconcile_workers,
    ));

    let applier = Arc::new(Applier::new(client.clone()));
    let mut apply_workers = Vec::new();
    for id in 0..config.queue_workers.max(1) {
        apply_workers.push(spawn_apply_worker(
            id,
            applier.clone(),
            pause_state.clone(),
            notifier.clone(),
            worker.clone(),
            shutdown.clone(),
            config.max_retries,
        ));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining queue");
    shutdown.cancel();

    let shutdown_timeout = config.shutdown_timeout();
    let drained = tokio::time::timeout(shutdown_timeout, async {
        for handle in apply_workers {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(timeout_secs = shutdown_timeout.as_secs(), "shutdown timeout elapsed before queue drained");
    }

    reconcile_join.abort();
    queue_join.abort();
    webserver_join.abort();
    for handle in reflector_handles {
        handle.abort();
    }

    Ok(())
}

/// Drive one apply worker: pull tasks from the shared [`WorkerHandle`]
/// (behind a mutex, since it wraps a single-consumer channel), apply them,
/// and report the outcome back to the queue mediator.
fn spawn_apply_worker(
    id: usize,
    applier: Arc<Applier>,
    pause_state: Arc<PauseState>,
    notifier: Arc<Notifier>,
    worker: Arc<Mutex<WorkerHandle>>,
    shutdown: CancellationToken,
    max_retries: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let task = {
                let mut guard = worker.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => None,
                    task = guard.get() => task,
                }
            };
            let Some(task) = task else {
                info!(worker = id, "apply worker exiting");
                break;
            };

            notifier.record_queue_latency(&task.workload_ref.kind.to_string(), task.enqueued_at.elapsed());
            let result = applier.apply(&task, &pause_state, &notifier).await;
            let guard = worker.lock().await;
            match result {
                Ok(()) => guard.done(task.workload_ref, None),
                Err(err) if err.is_retryable() => {
                    // Mirrors the work queue's own `state.attempt > max_retries`
                    // check: once this Done(retry) would push the
                    // key's attempt count past the budget, the queue is about
                    // to drop it rather than re-enqueue, so count it here.
                    if task.attempt + 1 > max_retries {
                        notifier.record_dropped();
                    } else {
                        notifier.record_retry();
                    }
                    let backoff = crate::queue::backoff_for_attempt(task.attempt);
                    guard.done(task.workload_ref, Some(backoff));
                }
                Err(_) => {
                    guard.done(task.workload_ref, None);
                }
            }
        }
    })
}

async fn wait_for_shutdown_signal() {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}
