//! Collaborator abstractions: "Model the Kubernetes watch
//! mechanism behind two interfaces... any implementation that satisfies
//! these can replace the Kubernetes client for tests."
//!
//! [`SourceEventStream`] emits add/update/delete of ConfigMaps and Secrets.
//! [`WorkloadIndex`] gives namespace-scoped, cheap-to-read access to the
//! candidate workloads. Production implementations wrap `kube::runtime`
//! watchers/reflectors (see [`kube_impl`]); tests use an in-memory fake
//! (`src/testing.rs`). The *previous* fingerprint a source object carried
//! is not this abstraction's job to track — that's the Reconciler's own
//! cache — so events here just carry the current object.
use crate::source::SourceObject;
use crate::workload::Workload;
use futures::Stream;

/// One observed mutation of a ConfigMap or Secret.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Applied(SourceObject),
    Deleted(SourceObject),
}

/// Emits [`SourceEvent`]s for ConfigMaps and Secrets in watched namespaces.
pub trait SourceEventStream {
    type Stream: Stream<Item = anyhow::Result<SourceEvent>> + Send + Unpin;

    fn watch(self) -> Self::Stream;
}

/// Namespace-scoped, cache-backed lookup of candidate workloads.
pub trait WorkloadIndex: Send + Sync {
    fn candidates(&self, namespace: &str) -> Vec<Workload>;

    /// True once every underlying informer's cache has performed its
    /// initial list+watch sync.
    fn is_synced(&self) -> bool;
}

pub mod kube_impl {
    use super::*;
    use futures::stream::{select, BoxStream};
    use futures::StreamExt;
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube::runtime::reflector::{self, Store};
    use kube::runtime::watcher::{self, Event};
    use kube::runtime::WatchStreamExt;
    use kube::{Api, Client};

    /// Watches ConfigMaps and Secrets across the configured namespace scope
    /// and emits [`SourceEvent`]s.
    pub struct KubeSourceStream {
        configmaps: Api<ConfigMap>,
        secrets: Api<Secret>,
    }

    impl KubeSourceStream {
        pub fn new(client: Client, namespace: Option<&str>) -> Self {
            let configmaps: Api<ConfigMap> = match namespace {
                Some(ns) => Api::namespaced(client.clone(), ns),
                None => Api::all(client.clone()),
            };
            let secrets: Api<Secret> = match namespace {
                Some(ns) => Api::namespaced(client.clone(), ns),
                None => Api::all(client.clone()),
            };
            Self { configmaps, secrets }
        }
    }

    impl SourceEventStream for KubeSourceStream {
        type Stream = BoxStream<'static, anyhow::Result<SourceEvent>>;

        fn watch(self) -> Self::Stream {
            let cm_events = watcher::watcher(self.configmaps, watcher::Config::default())
                .default_backoff()
                .filter_map(|res| async move { to_event(res, SourceObject::from_configmap) });

            let secret_events = watcher::watcher(self.secrets, watcher::Config::default())
                .default_backoff()
                .filter_map(|res| async move { to_event(res, SourceObject::from_secret) });

            select(cm_events, secret_events).boxed()
        }
    }

    fn to_event<K>(event: watcher::Result<Event<K>>, convert: impl Fn(&K) -> SourceObject) -> Option<anyhow::Result<SourceEvent>> {
        match event {
            Ok(Event::Apply(obj)) => Some(Ok(SourceEvent::Applied(convert(&obj)))),
            Ok(Event::Delete(obj)) => Some(Ok(SourceEvent::Deleted(convert(&obj)))),
            Ok(Event::Init) | Ok(Event::InitApply(_)) | Ok(Event::InitDone) => None,
            Err(err) => Some(Err(anyhow::Error::from(err))),
        }
    }

    /// `WorkloadIndex` backed by reflector stores, one per compiled-in and
    /// enabled workload kind. Deployment/StatefulSet/DaemonSet are always
    /// present; `DeploymentConfig`/`Rollout` are additionally gated on the
    /// matching `--enable-*` flag since watching a
    /// CRD the cluster hasn't installed would just error the watcher. Each
    /// store is kept current by a background task started in
    /// [`spawn_reflectors`].
    pub struct KubeWorkloadIndex {
        pub deployments: Store<Deployment>,
        pub stateful_sets: Store<StatefulSet>,
        pub daemon_sets: Store<DaemonSet>,
        #[cfg(feature = "openshift")]
        pub deployment_configs: Option<Store<crate::workload::openshift::DeploymentConfig>>,
        #[cfg(feature = "argo-rollouts")]
        pub rollouts: Option<Store<crate::workload::argo::Rollout>>,
        synced: Vec<std::sync::Arc<std::sync::atomic::AtomicBool>>,
    }

    /// Which optional, CRD-backed workload kinds to track.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct OptionalKinds {
        pub deployment_config: bool,
        pub argo_rollouts: bool,
    }

    /// Start the built-in reflectors, plus any enabled optional ones, and
    /// return the index plus their join handles, so the supervisor can await
    /// cache sync before reporting readiness.
    pub fn spawn_reflectors(
        client: Client,
        optional: OptionalKinds,
    ) -> (KubeWorkloadIndex, Vec<tokio::task::JoinHandle<()>>) {
        let deployments: Api<Deployment> = Api::all(client.clone());
        let stateful_sets: Api<StatefulSet> = Api::all(client.clone());
        let daemon_sets: Api<DaemonSet> = Api::all(client.clone());

        let (deployment_store, deployment_writer) = reflector::store();
        let (stateful_set_store, stateful_set_writer) = reflector::store();
        let (daemon_set_store, daemon_set_writer) = reflector::store();

        let deployment_synced = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stateful_set_synced = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let daemon_set_synced = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut handles = vec![
            spawn_reflector(deployments, deployment_writer, deployment_synced.clone()),
            spawn_reflector(stateful_sets, stateful_set_writer, stateful_set_synced.clone()),
            spawn_reflector(daemon_sets, daemon_set_writer, daemon_set_synced.clone()),
        ];
        let mut synced = vec![deployment_synced, stateful_set_synced, daemon_set_synced];

        #[cfg(feature = "openshift")]
        let deployment_configs = if optional.deployment_config {
            let api: Api<crate::workload::openshift::DeploymentConfig> = Api::all(client.clone());
            let (store, writer) = reflector::store();
            let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            handles.push(spawn_reflector(api, writer, flag.clone()));
            synced.push(flag);
            Some(store)
        } else {
            None
        };

        #[cfg(feature = "argo-rollouts")]
        let rollouts = if optional.argo_rollouts {
            let api: Api<crate::workload::argo::Rollout> = Api::all(client.clone());
            let (store, writer) = reflector::store();
            let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            handles.push(spawn_reflector(api, writer, flag.clone()));
            synced.push(flag);
            Some(store)
        } else {
            None
        };

        (
            KubeWorkloadIndex {
                deployments: deployment_store,
                stateful_sets: stateful_set_store,
                daemon_sets: daemon_set_store,
                #[cfg(feature = "openshift")]
                deployment_configs,
                #[cfg(feature = "argo-rollouts")]
                rollouts,
                synced,
            },
            handles,
        )
    }

    /// Drive one reflector to completion of its initial sync, then keep
    /// draining watch events for the lifetime of the process. `synced` is
    /// flipped once the first full list+watch relist has been observed.
    fn spawn_reflector<K>(
        api: Api<K>,
        writer: reflector::store::Writer<K>,
        synced: std::sync::Arc<std::sync::atomic::AtomicBool>,
    ) -> tokio::task::JoinHandle<()>
    where
        K: kube::Resource + Clone + std::fmt::Debug + Send + Sync + 'static + serde::de::DeserializeOwned,
        K::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
    {
        tokio::spawn(async move {
            let stream = watcher::watcher(api, watcher::Config::default()).default_backoff().reflect(writer);
            futures::pin_mut!(stream);
            while let Some(event) = stream.next().await {
                if matches!(event, Ok(Event::InitDone)) {
                    synced.store(true, std::sync::atomic::Ordering::Relaxed);
                }
            }
        })
    }

    impl WorkloadIndex for KubeWorkloadIndex {
        fn candidates(&self, namespace: &str) -> Vec<Workload> {
            let mut out = Vec::new();
            out.extend(
                self.deployments
                    .state()
                    .into_iter()
                    .filter(|d| d.metadata.namespace.as_deref() == Some(namespace))
                    .map(|d| Workload::Deployment((*d).clone())),
            );
            out.extend(
                self.stateful_sets
                    .state()
                    .into_iter()
                    .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
                    .map(|s| Workload::StatefulSet((*s).clone())),
            );
            out.extend(
                self.daemon_sets
                    .state()
                    .into_iter()
                    .filter(|d| d.metadata.namespace.as_deref() == Some(namespace))
                    .map(|d| Workload::DaemonSet((*d).clone())),
            );
            #[cfg(feature = "openshift")]
            if let Some(store) = &self.deployment_configs {
                out.extend(
                    store
                        .state()
                        .into_iter()
                        .filter(|d| d.metadata.namespace.as_deref() == Some(namespace))
                        .map(|d| Workload::DeploymentConfig((*d).clone())),
                );
            }
            #[cfg(feature = "argo-rollouts")]
            if let Some(store) = &self.rollouts {
                out.extend(
                    store
                        .state()
                        .into_iter()
                        .filter(|r| r.metadata.namespace.as_deref() == Some(namespace))
                        .map(|r| Workload::Rollout((*r).clone())),
                );
            }
            out
        }

        fn is_synced(&self) -> bool {
            self.synced.iter().all(|flag| flag.load(std::sync::atomic::Ordering::Relaxed))
        }
    }
}
