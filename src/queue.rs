//! Work Queue: rate-limited, key-deduplicating queue of reload
//! tasks with bounded retry and pause-period coalescing.
//!
//! Built "from channels+maps, not callbacks": a single mediator
//! task owns the dedup map and per-key dirty bits; workers only ever read
//! from the channel it feeds. This keeps the hot path lock-free, the same
//! shape `kube::runtime::Controller`'s own scheduler/runner internals favor.

use crate::source::Fingerprint;
use crate::strategy::Strategy;
use crate::workload::WorkloadRef;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, trace};

/// Initial retry backoff; doubles per attempt, capped at `MAX_BACKOFF`.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
pub const MAX_BACKOFF: Duration = Duration::from_secs(1000);
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// One unit of work: "reload `workload_ref` because `trigger_source`
/// changed to `trigger_fingerprint`".
#[derive(Debug, Clone)]
pub struct ReloadTask {
    pub workload_ref: WorkloadRef,
    pub trigger_source_namespace: String,
    pub trigger_source_name: String,
    pub trigger_is_configmap: bool,
    pub trigger_fingerprint: Fingerprint,
    pub strategy: Strategy,
    pub pause_period: Option<Duration>,
    pub enqueued_at: Instant,
    pub attempt: u32,
}

enum Command {
    Add(ReloadTask),
    Done { workload_ref: WorkloadRef, retry: Option<Duration> },
}

struct KeyState {
    dirty: Option<ReloadTask>,
    processing: bool,
    attempt: u32,
    delay_key: Option<delay_queue::Key>,
}

/// Handle held by producers (the Reconciler) to enqueue tasks.
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::UnboundedSender<Command>,
    depth: Arc<Mutex<usize>>,
}

impl QueueHandle {
    /// `Add(task)`: a task already queued for the same `workload_ref` has
    /// its payload replaced (stale fingerprints discarded), keeping its
    /// place in FIFO order.
    pub fn add(&self, task: ReloadTask) {
        let _ = self.commands.send(Command::Add(task));
    }

    /// Observable current depth for the queue-depth gauge.
    pub fn len(&self) -> usize {
        *self.depth.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle held by a worker to report task outcomes and fetch the next one.
pub struct WorkerHandle {
    tasks: mpsc::UnboundedReceiver<ReloadTask>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerHandle {
    /// Blocks until a task is available. Returns `None` once the mediator
    /// has shut down and drained.
    pub async fn get(&mut self) -> Option<ReloadTask> {
        self.tasks.recv().await
    }

    /// `Done(task, err)`: retire the key, or re-enqueue with the given
    /// backoff if `retry` is `Some`.
    pub fn done(&self, workload_ref: WorkloadRef, retry: Option<Duration>) {
        let _ = self.commands.send(Command::Done { workload_ref, retry });
    }
}

/// Spawn the queue mediator task and return the producer/worker handles plus
/// a join handle for shutdown.
pub fn spawn(max_retries: u32) -> (QueueHandle, WorkerHandle, tokio::task::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (task_tx, task_rx) = mpsc::unbounded_channel::<ReloadTask>();
    let depth = Arc::new(Mutex::new(0usize));
    let depth_for_mediator = depth.clone();
    let cmd_tx_for_handle = cmd_tx.clone();

    let join = tokio::spawn(mediator(cmd_rx, cmd_tx, task_tx, depth_for_mediator, max_retries));

    (
        QueueHandle { commands: cmd_tx_for_handle.clone(), depth: depth.clone() },
        WorkerHandle { tasks: task_rx, commands: cmd_tx_for_handle },
        join,
    )
}

async fn mediator(
    mut commands: mpsc::UnboundedReceiver<Command>,
    self_commands: mpsc::UnboundedSender<Command>,
    tasks: mpsc::UnboundedSender<ReloadTask>,
    depth: Arc<Mutex<usize>>,
    max_retries: u32,
) {
    let mut keys: HashMap<WorkloadRef, KeyState> = HashMap::new();
    let mut ready: Vec<ReloadTask> = Vec::new();
    let mut delays: DelayQueue<WorkloadRef> = DelayQueue::new();

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Add(task)) => handle_add(&mut keys, &mut ready, task),
                    Some(Command::Done { workload_ref, retry }) => {
                        handle_done(&mut keys, &mut delays, &self_commands, workload_ref, retry, max_retries);
                    }
                    None => break,
                }
            }
            Some(expired) = delays.next(), if !delays.is_empty() => {
                let workload_ref = expired.into_inner();
                if let Some(state) = keys.get_mut(&workload_ref) {
                    state.delay_key = None;
                    if let Some(task) = state.dirty.take() {
                        ready.push(task);
                    }
                }
            }
        }

        while let Some(mut task) = ready.pop() {
            if let Some(state) = keys.get_mut(&task.workload_ref) {
                if state.processing {
                    // Already in flight: record as dirty, processed on Done.
                    state.dirty = Some(task);
                    continue;
                }
                state.processing = true;
                // Carry the key's current attempt count onto the dispatched
                // task so the worker's backoff-on-failure calculation
                // (`backoff_for_attempt`) actually grows across retries of
                // the same key instead of staying pinned at the initial
                // delay.
                task.attempt = state.attempt;
            } else {
                keys.insert(
                    task.workload_ref.clone(),
                    KeyState { dirty: None, processing: true, attempt: 0, delay_key: None },
                );
                task.attempt = 0;
            }
            trace!(workload = %task.workload_ref, attempt = task.attempt, "dispatching task to worker");
            let _ = tasks.send(task);
        }

        // `keys` holds exactly the set of workload_refs that are queued,
        // in flight, or awaiting a retry backoff, so its size is the queue
        // depth the gauge should report — not a count of dispatches, which
        // would only ever grow across retries.
        *depth.lock() = keys.len();
    }
}

fn handle_add(keys: &mut HashMap<WorkloadRef, KeyState>, ready: &mut Vec<ReloadTask>, task: ReloadTask) {
    match keys.get_mut(&task.workload_ref) {
        Some(state) if state.processing => {
            debug!(workload = %task.workload_ref, "key processing, marking dirty");
            state.dirty = Some(task);
        }
        Some(_) | None => {
            ready.push(task);
        }
    }
}

fn handle_done(
    keys: &mut HashMap<WorkloadRef, KeyState>,
    delays: &mut DelayQueue<WorkloadRef>,
    self_commands: &mpsc::UnboundedSender<Command>,
    workload_ref: WorkloadRef,
    retry: Option<Duration>,
    max_retries: u32,
) {
    let Some(state) = keys.get_mut(&workload_ref) else { return };
    state.processing = false;

    if let Some(backoff) = retry {
        state.attempt += 1;
        if state.attempt > max_retries {
            debug!(workload = %workload_ref, attempts = state.attempt, "dropping task: max retries exceeded");
            keys.remove(&workload_ref);
            return;
        }
        if let Some(dirty) = state.dirty.take() {
            // A newer update already arrived; re-dispatch it immediately
            // instead of waiting out the backoff for stale data.
            let _ = self_commands.send(Command::Add(dirty));
        } else if let Some(old_key) = state.delay_key.take() {
            delays.remove(&old_key);
        }
        let capped = backoff.min(MAX_BACKOFF);
        state.delay_key = Some(delays.insert(workload_ref, capped));
        return;
    }

    state.attempt = 0;
    if let Some(dirty) = state.dirty.take() {
        let _ = self_commands.send(Command::Add(dirty));
    } else {
        keys.remove(&workload_ref);
    }
}

/// Compute the exponential backoff for the given attempt number (1-indexed):
/// initial 5ms, doubling, capped at 1000s.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let millis = INITIAL_BACKOFF.as_millis().saturating_mul(1u128 << attempt.min(32));
    Duration::from_millis(millis.min(MAX_BACKOFF.as_millis()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadKind;

    fn wref(name: &str) -> WorkloadRef {
        WorkloadRef { kind: WorkloadKind::Deployment, namespace: "default".into(), name: name.into() }
    }

    fn task(name: &str, fingerprint: &str) -> ReloadTask {
        ReloadTask {
            workload_ref: wref(name),
            trigger_source_namespace: "default".into(),
            trigger_source_name: "cm".into(),
            trigger_is_configmap: true,
            trigger_fingerprint: Fingerprint::from_hex(fingerprint.to_string()),
            strategy: Strategy::Annotation,
            pause_period: None,
            enqueued_at: Instant::now(),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn dispatches_a_single_added_task() {
        let (handle, mut worker, _join) = spawn(DEFAULT_MAX_RETRIES);
        handle.add(task("app", "f1"));
        let got = worker.get().await.expect("task");
        assert_eq!(got.workload_ref.name, "app");
        worker.done(got.workload_ref, None);
    }

    #[tokio::test]
    async fn same_key_collapses_to_latest_fingerprint() {
        let (handle, mut worker, _join) = spawn(DEFAULT_MAX_RETRIES);
        handle.add(task("app", "f1"));
        // Give the mediator a moment to pick up the first task and mark it
        // processing before the second Add arrives, so it is recorded dirty
        // rather than dispatched as a second task.
        tokio::task::yield_now().await;
        handle.add(task("app", "f2"));

        let first = worker.get().await.expect("first task");
        assert_eq!(first.trigger_fingerprint.as_str(), "f1");
        worker.done(first.workload_ref.clone(), None);

        let second = worker.get().await.expect("second task dispatched after Done");
        assert_eq!(second.trigger_fingerprint.as_str(), "f2");
        worker.done(second.workload_ref, None);
    }

    #[tokio::test]
    async fn redelivered_task_carries_growing_attempt_count() {
        let (handle, mut worker, _join) = spawn(DEFAULT_MAX_RETRIES);
        handle.add(task("app", "f1"));

        let first = worker.get().await.expect("first attempt");
        assert_eq!(first.attempt, 0);
        worker.done(first.workload_ref.clone(), Some(backoff_for_attempt(first.attempt)));

        let second = worker.get().await.expect("redelivered after backoff");
        assert_eq!(second.attempt, 1);
        worker.done(second.workload_ref.clone(), Some(backoff_for_attempt(second.attempt)));

        let third = worker.get().await.expect("redelivered again");
        assert_eq!(third.attempt, 2);
        worker.done(third.workload_ref, None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::from_millis(5));
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(10));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(20));
        assert!(backoff_for_attempt(40) <= MAX_BACKOFF);
    }
}
