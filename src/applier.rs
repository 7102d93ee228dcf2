//! Workload Applier: read-modify-write one queued [`ReloadTask`]
//! against the Kubernetes API, with conflict retry and pause-period gating.

use crate::error::ReloadError;
use crate::notifier::{Notifier, WebhookPayload, WorkloadSummary};
use crate::pause::PauseState;
use crate::queue::ReloadTask;
use crate::strategy::{build_patch, Strategy};
use crate::workload::{WorkloadKind, WorkloadLike};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{info, instrument, warn};

const FIELD_MANAGER: &str = "reloader";
const MAX_CONFLICT_RETRIES: u32 = 5;
const CONFLICT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct Applier {
    client: Client,
}

impl Applier {
    pub fn new(client: Client) -> Self {
        Applier { client }
    }

    #[instrument(skip_all, fields(workload = %task.workload_ref, strategy = ?task.strategy))]
    pub async fn apply(
        &self,
        task: &ReloadTask,
        pause_state: &PauseState,
        notifier: &Notifier,
    ) -> Result<(), ReloadError> {
        if let Some(pause_period) = task.pause_period {
            if let Some(remaining) = pause_state.remaining(&task.workload_ref, pause_period, Utc::now()) {
                info!(remaining_ms = remaining.as_millis() as u64, "coalescing: sleeping out pause period");
                tokio::time::sleep(remaining).await;
            }
        }

        let namespace = task.workload_ref.namespace.as_str();
        let kind_label = task.workload_ref.kind.to_string();
        let started = tokio::time::Instant::now();

        let result = match task.workload_ref.kind {
            WorkloadKind::Deployment => {
                apply_generic::<k8s_openapi::api::apps::v1::Deployment>(
                    &Api::namespaced(self.client.clone(), namespace),
                    &Api::namespaced(self.client.clone(), namespace),
                    task,
                )
                .await
            }
            WorkloadKind::StatefulSet => {
                apply_generic::<k8s_openapi::api::apps::v1::StatefulSet>(
                    &Api::namespaced(self.client.clone(), namespace),
                    &Api::namespaced(self.client.clone(), namespace),
                    task,
                )
                .await
            }
            WorkloadKind::DaemonSet => {
                apply_generic::<k8s_openapi::api::apps::v1::DaemonSet>(
                    &Api::namespaced(self.client.clone(), namespace),
                    &Api::namespaced(self.client.clone(), namespace),
                    task,
                )
                .await
            }
            #[cfg(feature = "openshift")]
            WorkloadKind::DeploymentConfig => {
                apply_generic::<crate::workload::openshift::DeploymentConfig>(
                    &Api::namespaced(self.client.clone(), namespace),
                    &Api::namespaced(self.client.clone(), namespace),
                    task,
                )
                .await
            }
            #[cfg(feature = "argo-rollouts")]
            WorkloadKind::Rollout => {
                apply_generic::<crate::workload::argo::Rollout>(
                    &Api::namespaced(self.client.clone(), namespace),
                    &Api::namespaced(self.client.clone(), namespace),
                    task,
                )
                .await
            }
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(()) => {
                pause_state.record_reload(&task.workload_ref, Utc::now());
                notifier.record_action_success(&kind_label, elapsed);
                info!("reload applied");
                notifier.notify_webhook(&webhook_payload(task, &kind_label)).await;
            }
            Err(err) => {
                notifier.record_action_failure(&kind_label, elapsed);
                if !matches!(err, ReloadError::NoOp | ReloadError::NotMatched) {
                    notifier.record_error(err.metric_label());
                }
                warn!(error = %err, "reload failed");
            }
        }
        result
    }
}

async fn apply_generic<K>(api: &Api<K>, pods: &Api<Pod>, task: &ReloadTask) -> Result<(), ReloadError>
where
    K: WorkloadLike
        + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    let current = api.get(&task.workload_ref.name).await.map_err(ReloadError::classify)?;
    let containers = current.pod_spec().map(|ps| ps.containers.clone()).unwrap_or_default();
    let container_names: Vec<String> = containers.iter().map(|c| c.name.clone()).collect();

    // Built-in kinds accept a strategic merge patch, whose array merge-key
    // semantics let the env-var strategy's patch carry just the one env
    // entry it owns. CRD-backed kinds (`supports_strategic_merge() ==
    // false`) only accept JSON merge patch, which replaces arrays wholesale,
    // so the env-var strategy there needs the full current container list.
    let (patch_body, strategic) = if K::supports_strategic_merge() {
        (
            build_patch(task.strategy, source_kind(task), &task.trigger_source_name, &task.trigger_fingerprint, &container_names),
            true,
        )
    } else {
        match task.strategy {
            Strategy::EnvVar => (
                crate::strategy::build_merge_patch_env_var(source_kind(task), &task.trigger_source_name, &task.trigger_fingerprint, &containers),
                false,
            ),
            Strategy::Annotation | Strategy::Restart => (
                build_patch(task.strategy, source_kind(task), &task.trigger_source_name, &task.trigger_fingerprint, &container_names),
                false,
            ),
        }
    };

    let mut attempt = 0u32;
    loop {
        let patch_params = PatchParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PatchParams::default() };
        let outcome = if strategic {
            api.patch(&task.workload_ref.name, &patch_params, &Patch::Strategic(&patch_body)).await
        } else {
            api.patch(&task.workload_ref.name, &patch_params, &Patch::Merge(&patch_body)).await
        };

        match outcome {
            Ok(patched) => {
                if task.strategy == Strategy::Restart {
                    delete_pods(pods, &patched.selector()).await?;
                }
                return Ok(());
            }
            Err(err) => {
                let classified = ReloadError::classify(err);
                if matches!(classified, ReloadError::Conflict(_)) && attempt < MAX_CONFLICT_RETRIES {
                    attempt += 1;
                    tokio::time::sleep(jittered_backoff(attempt)).await;
                    continue;
                }
                return Err(classified);
            }
        }
    }
}

/// Equal-jitter backoff for a conflict retry: half the deterministic base
/// delay, plus a uniformly random half, so concurrent controllers retrying
/// against the same object don't collide on the same wall-clock tick.
fn jittered_backoff(attempt: u32) -> Duration {
    let base = CONFLICT_RETRY_BACKOFF * attempt;
    let half_millis = (base.as_millis() / 2) as u64;
    let jitter_millis = rand::rng().random_range(0..=half_millis.max(1));
    Duration::from_millis(half_millis + jitter_millis)
}

fn label_selector_string(selector: &std::collections::BTreeMap<String, String>) -> String {
    selector.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

async fn delete_pods(pods: &Api<Pod>, selector: &std::collections::BTreeMap<String, String>) -> Result<(), ReloadError> {
    if selector.is_empty() {
        return Ok(());
    }
    let selector_str = label_selector_string(selector);
    let list = pods.list(&ListParams::default().labels(&selector_str)).await.map_err(ReloadError::classify)?;
    for pod in list.items {
        let Some(name) = pod.metadata.name else { continue };
        if let Err(err) = pods.delete(&name, &DeleteParams::default()).await {
            let classified = ReloadError::classify(err);
            if !matches!(classified, ReloadError::Terminal(_)) {
                return Err(classified);
            }
            // Pod already gone or forbidden: restart's job is done regardless.
        }
    }
    Ok(())
}

/// Build the JSON payload posted on a successful action: one
/// workload per call, since the applier reloads workloads independently.
fn webhook_payload(task: &ReloadTask, workload_kind_label: &str) -> WebhookPayload {
    let source_kind = source_kind(task);
    WebhookPayload {
        kind: source_kind.to_string(),
        namespace: task.trigger_source_namespace.clone(),
        resource_name: task.trigger_source_name.clone(),
        resource_type: source_kind.as_lower().to_string(),
        hash: task.trigger_fingerprint.as_str().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        workloads: vec![WorkloadSummary {
            kind: workload_kind_label.to_string(),
            name: task.workload_ref.name.clone(),
            namespace: task.workload_ref.namespace.clone(),
        }],
    }
}

fn source_kind(task: &ReloadTask) -> crate::source::SourceKind {
    if task.trigger_is_configmap {
        crate::source::SourceKind::ConfigMap
    } else {
        crate::source::SourceKind::Secret
    }
}
