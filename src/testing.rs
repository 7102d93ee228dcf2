//! In-memory fakes for [`crate::collaborators::SourceEventStream`] and
//! [`crate::collaborators::WorkloadIndex`], used to drive the reconciler in
//! tests without a cluster.

use crate::collaborators::{SourceEvent, SourceEventStream, WorkloadIndex};
use crate::source::SourceObject;
use crate::workload::Workload;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMapEnvSource, Container, EnvFromSource, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

pub struct FakeSourceEventStream {
    events: Vec<anyhow::Result<SourceEvent>>,
}

impl FakeSourceEventStream {
    pub fn new(events: Vec<anyhow::Result<SourceEvent>>) -> Self {
        FakeSourceEventStream { events }
    }
}

impl SourceEventStream for FakeSourceEventStream {
    type Stream = BoxStream<'static, anyhow::Result<SourceEvent>>;

    fn watch(self) -> Self::Stream {
        stream::iter(self.events).boxed()
    }
}

pub struct FakeWorkloadIndex {
    workloads: Vec<Workload>,
}

impl FakeWorkloadIndex {
    pub fn new(workloads: Vec<Workload>) -> Self {
        FakeWorkloadIndex { workloads }
    }
}

impl WorkloadIndex for FakeWorkloadIndex {
    fn candidates(&self, namespace: &str) -> Vec<Workload> {
        self.workloads.iter().filter(|w| w.namespace() == namespace).cloned().collect()
    }

    fn is_synced(&self) -> bool {
        true
    }
}

pub fn configmap(namespace: &str, name: &str, data: &[(&str, &str)]) -> SourceObject {
    SourceObject {
        kind: crate::source::SourceKind::ConfigMap,
        namespace: namespace.to_string(),
        name: name.to_string(),
        data: data.iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect(),
        annotations: BTreeMap::new(),
    }
}

/// A Deployment whose sole container references `configmap_name` via
/// `envFrom`, carrying the given annotations.
pub fn deployment_referencing(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    configmap_name: &str,
) -> Workload {
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector::default(),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        env_from: Some(vec![EnvFromSource {
                            config_map_ref: Some(ConfigMapEnvSource {
                                name: Some(configmap_name.to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };
    Workload::Deployment(deployment)
}
