//! Reference Resolver: enumerate every ConfigMap/Secret a pod
//! template references, tagged with the reference's shape.

use crate::workload::ReferenceKind;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::collections::BTreeSet;

/// `(ReferenceKind, referenced_name)`, deduplicated per kind.
pub type References = BTreeSet<(ReferenceKind, String)>;

/// Walk a pod template and collect every referenced ConfigMap/Secret name,
/// tagged by the mechanism used to reference it. Pure: the same pod
/// template always yields the same set.
pub fn resolve(pod_spec: &PodSpec) -> References {
    let mut refs = References::new();

    for container in all_containers(pod_spec) {
        resolve_container(container, &mut refs);
    }

    if let Some(volumes) = &pod_spec.volumes {
        for volume in volumes {
            if let Some(cm) = &volume.config_map {
                if let Some(name) = &cm.name {
                    refs.insert((ReferenceKind::VolumeCM, name.clone()));
                }
            }
            if let Some(secret) = &volume.secret {
                if let Some(name) = &secret.secret_name {
                    refs.insert((ReferenceKind::VolumeSecret, name.clone()));
                }
            }
            if let Some(projected) = &volume.projected {
                if let Some(sources) = &projected.sources {
                    for source in sources {
                        if let Some(cm) = &source.config_map {
                            if let Some(name) = &cm.name {
                                refs.insert((ReferenceKind::ProjectedCM, name.clone()));
                            }
                        }
                        if let Some(secret) = &source.secret {
                            if let Some(name) = &secret.name {
                                refs.insert((ReferenceKind::ProjectedSecret, name.clone()));
                            }
                        }
                    }
                }
            }
        }
    }

    if let Some(pull_secrets) = &pod_spec.image_pull_secrets {
        for secret in pull_secrets {
            if let Some(name) = &secret.name {
                refs.insert((ReferenceKind::ImagePullSecret, name.clone()));
            }
        }
    }

    refs
}

fn all_containers(pod_spec: &PodSpec) -> impl Iterator<Item = &Container> {
    // Ephemeral containers (debug containers attached to a running pod) are
    // not part of the pod template and are intentionally not walked here.
    pod_spec.init_containers.iter().flatten().chain(pod_spec.containers.iter())
}

fn resolve_container(container: &Container, refs: &mut References) {
    if let Some(env_from) = &container.env_from {
        for source in env_from {
            if let Some(cm) = &source.config_map_ref {
                if let Some(name) = &cm.name {
                    refs.insert((ReferenceKind::EnvFromCM, name.clone()));
                }
            }
            if let Some(secret) = &source.secret_ref {
                if let Some(name) = &secret.name {
                    refs.insert((ReferenceKind::EnvFromSecret, name.clone()));
                }
            }
        }
    }

    if let Some(env) = &container.env {
        for var in env {
            let Some(value_from) = &var.value_from else {
                continue;
            };
            if let Some(cm_key_ref) = &value_from.config_map_key_ref {
                if let Some(name) = &cm_key_ref.name {
                    refs.insert((ReferenceKind::EnvValueFromCM, name.clone()));
                }
            }
            if let Some(secret_key_ref) = &value_from.secret_key_ref {
                if let Some(name) = &secret_key_ref.name {
                    refs.insert((ReferenceKind::EnvValueFromSecret, name.clone()));
                }
            }
        }
    }
}

/// True if the resolved references contain `name` under the given source
/// kind (used by the reconciler to decide whether a workload is a
/// candidate for a given source object).
pub fn references_name(refs: &References, kind_is_configmap: bool, name: &str) -> bool {
    refs.iter()
        .any(|(rk, n)| rk.is_configmap() == kind_is_configmap && n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ConfigMapEnvSource, ConfigMapKeySelector, ConfigMapProjection, ConfigMapVolumeSource,
        EnvFromSource, EnvVar, EnvVarSource, LocalObjectReference, ProjectedVolumeSource,
        SecretEnvSource, SecretKeySelector, SecretProjection, SecretVolumeSource, Volume,
        VolumeProjection,
    };

    fn pod_spec_with_everything() -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "app".into(),
                env_from: Some(vec![
                    EnvFromSource {
                        config_map_ref: Some(ConfigMapEnvSource {
                            name: Some("shared".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    EnvFromSource {
                        secret_ref: Some(SecretEnvSource {
                            name: Some("shared-secret".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                env: Some(vec![
                    EnvVar {
                        name: "FOO".into(),
                        value_from: Some(EnvVarSource {
                            config_map_key_ref: Some(ConfigMapKeySelector {
                                name: Some("keyed-cm".into()),
                                key: "foo".into(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "BAR".into(),
                        value_from: Some(EnvVarSource {
                            secret_key_ref: Some(SecretKeySelector {
                                name: Some("keyed-secret".into()),
                                key: "bar".into(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            init_containers: Some(vec![Container {
                name: "init".into(),
                env_from: Some(vec![EnvFromSource {
                    config_map_ref: Some(ConfigMapEnvSource {
                        name: Some("init-cm".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            volumes: Some(vec![
                Volume {
                    name: "cfg".into(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some("vol-cm".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: "sec".into(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some("vol-secret".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: "proj".into(),
                    projected: Some(ProjectedVolumeSource {
                        sources: Some(vec![VolumeProjection {
                            config_map: Some(ConfigMapProjection {
                                name: Some("proj-cm".into()),
                                ..Default::default()
                            }),
                            secret: Some(SecretProjection {
                                name: Some("proj-secret".into()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                    }),
                    ..Default::default()
                },
            ]),
            image_pull_secrets: Some(vec![LocalObjectReference {
                name: Some("pull-secret".into()),
            }]),
            ..Default::default()
        }
    }

    #[test]
    fn walks_every_reference_shape() {
        let refs = resolve(&pod_spec_with_everything());
        let names: BTreeSet<&str> = refs.iter().map(|(_, n)| n.as_str()).collect();
        for expected in [
            "shared",
            "shared-secret",
            "keyed-cm",
            "keyed-secret",
            "init-cm",
            "vol-cm",
            "vol-secret",
            "proj-cm",
            "proj-secret",
            "pull-secret",
        ] {
            assert!(names.contains(expected), "missing reference {expected}");
        }
    }

    #[test]
    fn deduplicates_same_name_same_kind() {
        let mut pod_spec = PodSpec::default();
        pod_spec.containers = vec![
            Container {
                name: "a".into(),
                env_from: Some(vec![EnvFromSource {
                    config_map_ref: Some(ConfigMapEnvSource {
                        name: Some("shared".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            Container {
                name: "b".into(),
                env_from: Some(vec![EnvFromSource {
                    config_map_ref: Some(ConfigMapEnvSource {
                        name: Some("shared".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        ];
        let refs = resolve(&pod_spec);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn resolver_is_pure() {
        let pod_spec = pod_spec_with_everything();
        assert_eq!(resolve(&pod_spec), resolve(&pod_spec));
    }

    #[test]
    fn references_name_checks_kind() {
        let refs = resolve(&pod_spec_with_everything());
        assert!(references_name(&refs, true, "shared"));
        assert!(!references_name(&refs, false, "shared"));
        assert!(references_name(&refs, false, "shared-secret"));
    }
}
