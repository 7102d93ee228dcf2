//! End-to-end scenarios against the fan-out pipeline (reconciler + work
//! queue), driven by the in-memory collaborators in `reloader::testing`
//! instead of a real cluster.

use chrono::Utc;
use reloader::annotation::{ANNOTATION_AUTO, ANNOTATION_CONFIGMAP_RELOAD, ANNOTATION_PAUSE_PERIOD, ANNOTATION_STRATEGY};
use reloader::collaborators::SourceEvent;
use reloader::notifier::Notifier;
use reloader::pause::PauseState;
use reloader::queue::{self, ReloadTask};
use reloader::reconciler::{self, FingerprintCache, ReconcilerConfig};
use reloader::source::{SourceKind, SourceObject};
use reloader::strategy::{build_patch, Strategy};
use reloader::testing::{configmap, deployment_referencing, FakeSourceEventStream, FakeWorkloadIndex};
use reloader::workload::{Workload, WorkloadKind, WorkloadRef};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drive `reconciler::run` to completion against a fixed event list and
/// collect every `ReloadTask` it fanned out.
fn run_and_collect(events: Vec<anyhow::Result<SourceEvent>>, workloads: Vec<Workload>, config: ReconcilerConfig) -> Vec<ReloadTask> {
    let (queue, mut worker, _join) = queue::spawn(queue::DEFAULT_MAX_RETRIES);
    let cache = Arc::new(FingerprintCache::new());
    let notifier = Arc::new(Notifier::new_for_test());
    let index = Arc::new(FakeWorkloadIndex::new(workloads));
    let stream = FakeSourceEventStream::new(events);

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async move {
        let stream = stream.watch();
        tokio::time::timeout(
            Duration::from_secs(2),
            reconciler::run::<FakeSourceEventStream, FakeWorkloadIndex>(stream, index, queue, cache, notifier, config),
        )
        .await
        .ok();

        // Mark each task done as soon as it's collected, simulating an
        // instantly-successful apply: this frees its key so any update that
        // arrived while it was "in flight" (coalesced into the dirty slot)
        // gets flushed next, the same way a real apply worker drains it.
        let mut collected = Vec::new();
        while let Ok(Some(task)) = tokio::time::timeout(Duration::from_millis(20), worker.get()).await {
            worker.done(task.workload_ref.clone(), None);
            collected.push(task);
        }
        collected
    })
}

fn default_reconciler_config() -> ReconcilerConfig {
    ReconcilerConfig {
        ignored_namespaces: vec![],
        ignored_resources: vec![],
        default_strategy: Strategy::Annotation,
        reload_on_create: false,
    }
}

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// One ConfigMap, 50 opted-in Deployments referencing it. A single
/// material change fans out exactly one task per Deployment, each carrying
/// the new fingerprint.
#[test]
fn fanout_one_task_per_opted_in_workload() {
    let first = configmap("default", "shared", &[("config", "initial")]);
    let second = configmap("default", "shared", &[("config", "v2")]);

    let workloads: Vec<Workload> = (0..50)
        .map(|i| {
            deployment_referencing(
                "default",
                &format!("app-{i}"),
                &[(ANNOTATION_AUTO, "true"), (ANNOTATION_STRATEGY, "env-vars")],
                "shared",
            )
        })
        .collect();

    let events = vec![Ok(SourceEvent::Applied(first)), Ok(SourceEvent::Applied(second))];
    let tasks = run_and_collect(events, workloads, default_reconciler_config());

    assert_eq!(tasks.len(), 50);
    let expected_fingerprint = sha1_hex("config=v2");
    for task in &tasks {
        assert_eq!(task.trigger_fingerprint.as_str(), expected_fingerprint);
        assert_eq!(task.strategy, Strategy::EnvVar);
    }

    // The env-var strategy patch carries that same fingerprint as the value
    // Reloader pins on every container's STAKATER_SHARED_CONFIGMAP var.
    let patch = build_patch(Strategy::EnvVar, SourceKind::ConfigMap, "shared", &tasks[0].trigger_fingerprint, &["app".to_string()]);
    assert_eq!(
        patch["spec"]["template"]["spec"]["containers"][0]["env"][0]["value"],
        expected_fingerprint
    );
    assert_eq!(
        patch["spec"]["template"]["spec"]["containers"][0]["env"][0]["name"],
        "STAKATER_SHARED_CONFIGMAP"
    );
}

/// Annotation-only changes to a ConfigMap (its `data` never moves)
/// must never enqueue a reload.
#[test]
fn annotation_only_changes_enqueue_nothing() {
    let mut events = Vec::new();
    let mut workloads = Vec::new();

    for i in 0..10 {
        let cm_name = format!("cm-{i}");
        workloads.push(deployment_referencing("default", &format!("app-{i}"), &[(ANNOTATION_AUTO, "true")], &cm_name));

        for revision in 0..30 {
            let mut annotations = BTreeMap::new();
            annotations.insert("revision".to_string(), revision.to_string());
            events.push(Ok(SourceEvent::Applied(SourceObject {
                kind: SourceKind::ConfigMap,
                namespace: "default".to_string(),
                name: cm_name.clone(),
                data: BTreeMap::from([("config".to_string(), b"unchanged".to_vec())]),
                annotations,
            })));
        }
    }

    let tasks = run_and_collect(events, workloads, default_reconciler_config());
    assert!(tasks.is_empty());
}

/// Many rapid updates distributed across several ConfigMap/Deployment
/// pairs. The queue's per-key coalescing must still preserve per-workload
/// ordering: whichever fingerprint reaches a worker last for a given
/// Deployment is the final value written to that ConfigMap.
#[test]
fn burst_preserves_last_fingerprint_per_workload() {
    let pairs = 10;
    let updates_per_pair = 50;

    let mut events = Vec::new();
    let mut workloads = Vec::new();
    let mut expected_final = BTreeMap::new();

    for i in 0..pairs {
        let cm_name = format!("cm-{i}");
        let app_name = format!("app-{i}");
        workloads.push(deployment_referencing("default", &app_name, &[(ANNOTATION_AUTO, "true")], &cm_name));

        for revision in 0..updates_per_pair {
            let value = format!("v{revision}");
            events.push(Ok(SourceEvent::Applied(configmap("default", &cm_name, &[("config", &value)]))));
            expected_final.insert(app_name.clone(), sha1_hex(&format!("config={value}")));
        }
    }

    let tasks = run_and_collect(events, workloads, default_reconciler_config());

    let mut last_seen: BTreeMap<String, String> = BTreeMap::new();
    for task in &tasks {
        last_seen.insert(task.workload_ref.name.clone(), task.trigger_fingerprint.as_str().to_string());
    }

    for (app_name, expected_fp) in expected_final {
        assert_eq!(last_seen.get(&app_name), Some(&expected_fp), "workload {app_name} ended on the wrong fingerprint");
    }
}

/// A Deployment opted into `reload-strategy=restart` gets exactly
/// one task carrying that strategy, and the strategy engine's patch for it
/// stamps the same provenance fields the annotation strategy does (the
/// subsequent pod deletion is the Applier's job and isn't exercised here).
#[test]
fn restart_strategy_is_selected_and_patch_carries_provenance() {
    let first = configmap("default", "shared", &[("x", "1")]);
    let second = configmap("default", "shared", &[("x", "2")]);
    let workload = deployment_referencing("default", "app", &[(ANNOTATION_CONFIGMAP_RELOAD, "shared"), (ANNOTATION_STRATEGY, "restart")], "shared");

    let events = vec![Ok(SourceEvent::Applied(first)), Ok(SourceEvent::Applied(second))];
    let tasks = run_and_collect(events, vec![workload], default_reconciler_config());

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].strategy, Strategy::Restart);

    let patch = build_patch(Strategy::Restart, SourceKind::ConfigMap, "shared", &tasks[0].trigger_fingerprint, &[]);
    assert_eq!(
        patch["spec"]["template"]["metadata"]["annotations"]["reloader.stakater.com/last-reloaded-from"],
        "ConfigMap/shared"
    );
    assert_eq!(
        patch["spec"]["template"]["metadata"]["annotations"]["reloader.stakater.com/last-reloaded-fingerprint"],
        tasks[0].trigger_fingerprint.as_str()
    );
}

/// A 15s pause period against a ConfigMap updated every 2s for 60s
/// (30 updates) must bound the number of reload *actions* actually taken,
/// even though every update still produces a queued task. Coalescing lives
/// in the queue (a key stays `processing` for the whole pause-sleep, so
/// updates arriving meanwhile collapse into one dirty slot) plus the
/// Applier's own pause gate; this test models that gate directly against a
/// simulated worker loop, using paused virtual time so it runs instantly.
#[tokio::test(start_paused = true)]
async fn pause_bounds_reload_actions_over_window() {
    let (handle, mut worker, queue_join) = queue::spawn(queue::DEFAULT_MAX_RETRIES);
    let pause_state = Arc::new(PauseState::new());
    let actions = Arc::new(AtomicUsize::new(0));
    let pause_period = Duration::from_secs(15);

    let wref = WorkloadRef { kind: WorkloadKind::Deployment, namespace: "default".into(), name: "app".into() };

    let worker_pause = pause_state.clone();
    let worker_actions = actions.clone();
    let worker_task = tokio::spawn(async move {
        while let Some(task) = worker.get().await {
            if let Some(remaining) = worker_pause.remaining(&task.workload_ref, pause_period, Utc::now()) {
                tokio::time::sleep(remaining).await;
            }
            worker_pause.record_reload(&task.workload_ref, Utc::now());
            worker_actions.fetch_add(1, Ordering::SeqCst);
            worker.done(task.workload_ref, None);
        }
    });

    for revision in 0..30u32 {
        handle.add(ReloadTask {
            workload_ref: wref.clone(),
            trigger_source_namespace: "default".into(),
            trigger_source_name: "cm".into(),
            trigger_is_configmap: true,
            trigger_fingerprint: reloader::source::Fingerprint::from_hex(format!("{revision:040x}")),
            strategy: Strategy::Annotation,
            pause_period: Some(pause_period),
            enqueued_at: tokio::time::Instant::now(),
            attempt: 0,
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    // Let any in-flight pause-sleep finish before reading the final count.
    tokio::time::sleep(pause_period).await;

    let taken = actions.load(Ordering::SeqCst);
    assert!(taken >= 1 && taken <= 5, "expected <=5 reload actions over the 60s window, got {taken}");

    worker_task.abort();
    queue_join.abort();
}

/// Workloads appear and disappear while their ConfigMap keeps
/// changing. The reconciler must never panic, and dropping a workload from
/// the index (simulating its deletion) simply stops it from matching future
/// changes rather than erroring.
#[test]
fn workload_appearance_and_disappearance_does_not_panic() {
    let present = deployment_referencing("default", "app", &[(ANNOTATION_AUTO, "true")], "shared");

    let first = configmap("default", "shared", &[("config", "v1")]);
    let second = configmap("default", "shared", &[("config", "v2")]);
    let third = configmap("default", "shared", &[("config", "v3")]);

    // Round 1: workload present, should match the v1 -> v2 change.
    let tasks_present = run_and_collect(
        vec![Ok(SourceEvent::Applied(first)), Ok(SourceEvent::Applied(second.clone()))],
        vec![present.clone()],
        default_reconciler_config(),
    );
    assert_eq!(tasks_present.len(), 1);

    // Round 2: workload deleted from the index (simulating churn) while the
    // same ConfigMap keeps changing. No candidates, no panic, no tasks.
    let tasks_absent =
        run_and_collect(vec![Ok(SourceEvent::Applied(second)), Ok(SourceEvent::Applied(third.clone()))], vec![], default_reconciler_config());
    assert!(tasks_absent.is_empty());

    // Round 3: workload reappears and matches again.
    let tasks_reappeared = run_and_collect(vec![Ok(SourceEvent::Applied(third))], vec![present], default_reconciler_config());
    // Reappearing is indistinguishable from a fresh Add from the
    // reconciler's perspective (its fingerprint cache was keyed per-process,
    // not reset here), so this just asserts the pipeline completes cleanly.
    assert!(tasks_reappeared.len() <= 1);
}
