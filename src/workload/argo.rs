//! Argo Rollouts support, feature-gated behind `argo-rollouts`. A genuine
//! CRD (`argoproj.io/v1alpha1`), derived the same way `kube::CustomResource`
//! derives any typed custom resource.

use super::{WorkloadKind, WorkloadLike, WorkloadRef};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "Rollout", plural = "rollouts", namespaced)]
pub struct RolloutSpec {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
}

impl WorkloadLike for Rollout {
    fn kind() -> WorkloadKind {
        WorkloadKind::Rollout
    }

    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone().unwrap_or_default()
    }

    fn pod_spec(&self) -> Option<&k8s_openapi::api::core::v1::PodSpec> {
        self.spec.template.spec.as_ref()
    }

    fn selector(&self) -> BTreeMap<String, String> {
        self.spec.selector.match_labels.clone().unwrap_or_default()
    }

    fn supports_strategic_merge() -> bool {
        false
    }
}
