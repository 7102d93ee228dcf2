//! OpenShift `DeploymentConfig` support, feature-gated behind `openshift`.
//!
//! `DeploymentConfig` is a built-in OpenShift API resource, not a CRD the
//! cluster operator installs, but `kube`'s `#[derive(CustomResource)]` is
//! still the right tool to get a typed `Api<DeploymentConfig>` client for a
//! fixed group/version/kind, just never calling `DeploymentConfig::crd()`
//! since Reloader doesn't own or install this type.

use super::{WorkloadKind, WorkloadLike, WorkloadRef};
use k8s_openapi::api::core::v1::PodSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mirrors the subset of `apps.openshift.io/v1 DeploymentConfig.spec` the
/// reload engine needs: a bare label-map selector (unlike `Deployment`'s
/// `LabelSelector`) and a pod template.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.openshift.io",
    version = "v1",
    kind = "DeploymentConfig",
    plural = "deploymentconfigs",
    namespaced
)]
pub struct DeploymentConfigSpec {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub template: DeploymentConfigPodTemplate,
}

/// `DeploymentConfig.spec.template` is a bare `{ metadata, spec }` pair, not
/// the full `core/v1 PodTemplateSpec` envelope `k8s-openapi` would derive
/// `Deserialize` strictness against, so it's modeled directly here.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct DeploymentConfigPodTemplate {
    #[serde(default)]
    pub metadata: DeploymentConfigTemplateMetadata,
    pub spec: PodSpec,
}

#[derive(Default, Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct DeploymentConfigTemplateMetadata {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl WorkloadLike for DeploymentConfig {
    fn kind() -> WorkloadKind {
        WorkloadKind::DeploymentConfig
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

    fn pod_spec(&self) -> Option<&PodSpec> {
        Some(&self.spec.template.spec)
    }

    fn selector(&self) -> BTreeMap<String, String> {
        self.spec.selector.clone()
    }

    fn supports_strategic_merge() -> bool {
        false
    }
}
