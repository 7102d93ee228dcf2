//! Strategy Engine: mutate a pod template so a workload rolls.

use crate::source::{Fingerprint, SourceKind};
use k8s_openapi::api::core::v1::Container;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The three reload strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "env-var", alias = "env-vars")]
    EnvVar,
    #[serde(rename = "annotation", alias = "annotations")]
    Annotation,
    #[serde(rename = "restart")]
    Restart,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "env-vars" | "env-var" => Some(Strategy::EnvVar),
            "annotations" | "annotation" => Some(Strategy::Annotation),
            "restart" => Some(Strategy::Restart),
            _ => None,
        }
    }
}

/// Uppercase the name and collapse runs of non-`[A-Z0-9]` characters to a
/// single `_`, with no leading or trailing underscore.
pub fn sanitize_env_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = true; // suppress a leading underscore
    for ch in name.chars() {
        let upper = ch.to_ascii_uppercase();
        if upper.is_ascii_alphanumeric() {
            out.push(upper);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Build the env var name Reloader ensures on every container
/// (`STAKATER_<SANITIZED>_CONFIGMAP` / `..._SECRET`).
pub fn env_var_name(reference_name: &str, source_kind: SourceKind) -> String {
    let suffix = match source_kind {
        SourceKind::ConfigMap => "CONFIGMAP",
        SourceKind::Secret => "SECRET",
    };
    format!("STAKATER_{}_{}", sanitize_env_name(reference_name), suffix)
}

/// Build the JSON merge patch body for the chosen strategy against a pod
/// template (`spec.template`).
pub fn build_patch(
    strategy: Strategy,
    source_kind: SourceKind,
    source_name: &str,
    fingerprint: &Fingerprint,
    existing_container_names: &[String],
) -> Value {
    match strategy {
        Strategy::EnvVar => {
            let env_name = env_var_name(source_name, source_kind);
            let containers: Vec<Value> = existing_container_names
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "env": [{ "name": env_name, "value": fingerprint.as_str() }],
                    })
                })
                .collect();
            json!({
                "spec": {
                    "template": {
                        "spec": {
                            "containers": containers,
                        }
                    }
                }
            })
        }
        Strategy::Annotation | Strategy::Restart => {
            // Only the two fingerprint-bearing annotations are written here: a
            // wall-clock timestamp would make the same (strategy, fingerprint)
            // pair produce a different patch on every application, which
            // violates the strategy-idempotence invariant.
            json!({
                "spec": {
                    "template": {
                        "metadata": {
                            "annotations": {
                                crate::annotation::ANNOTATION_LAST_RELOADED_FROM: format!("{}/{}", source_kind, source_name),
                                crate::annotation::ANNOTATION_LAST_RELOADED_FINGERPRINT: fingerprint.as_str(),
                            }
                        }
                    }
                }
            })
        }
    }
}

/// Build a JSON *merge* patch (RFC 7396) body for the env-var strategy.
///
/// `Patch::Strategic` relies on merge-key metadata the Kubernetes API server
/// only knows for built-in types; CRD-backed workload kinds (OpenShift
/// `DeploymentConfig`, Argo `Rollout`) only accept JSON merge/JSON patch.
/// A merge patch replaces arrays wholesale rather than merging by key, so
/// unlike [`build_patch`]'s container fragments (which rely on the
/// strategic merge's `env` merge key to touch just one entry), this
/// re-serializes each *whole* current container, updating only the one env
/// entry Reloader owns so no sibling container field or env var is lost.
pub fn build_merge_patch_env_var(
    source_kind: SourceKind,
    source_name: &str,
    fingerprint: &Fingerprint,
    containers: &[Container],
) -> Value {
    let env_name = env_var_name(source_name, source_kind);
    let containers: Vec<Value> = containers
        .iter()
        .map(|container| {
            let mut value = serde_json::to_value(container).expect("Container always serializes");
            let mut env: Vec<Value> = value
                .get("env")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            env.retain(|entry| entry.get("name").and_then(Value::as_str) != Some(env_name.as_str()));
            env.push(json!({ "name": env_name, "value": fingerprint.as_str() }));
            value["env"] = Value::Array(env);
            value
        })
        .collect();
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": containers,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_mixed_separators_and_case() {
        assert_eq!(sanitize_env_name("my-config.v2"), "MY_CONFIG_V2");
    }

    #[test]
    fn leading_non_alphanumeric_produces_no_leading_underscore() {
        assert_eq!(sanitize_env_name("--leading"), "LEADING");
        assert_eq!(sanitize_env_name(".dotfile"), "DOTFILE");
    }

    #[test]
    fn collapses_runs_of_separators() {
        assert_eq!(sanitize_env_name("a---b..c"), "A_B_C");
    }

    #[test]
    fn trailing_separators_are_dropped() {
        assert_eq!(sanitize_env_name("trailing-"), "TRAILING");
    }

    #[test]
    fn env_var_name_follows_stakater_naming_convention() {
        assert_eq!(env_var_name("shared", SourceKind::ConfigMap), "STAKATER_SHARED_CONFIGMAP");
    }

    #[test]
    fn strategy_parse_round_trips_known_values() {
        assert_eq!(Strategy::parse("env-vars"), Some(Strategy::EnvVar));
        assert_eq!(Strategy::parse("annotations"), Some(Strategy::Annotation));
        assert_eq!(Strategy::parse("restart"), Some(Strategy::Restart));
        assert_eq!(Strategy::parse("bogus"), None);
    }

    #[test]
    fn strategy_deserializes_both_plural_and_singular_yaml_forms() {
        assert_eq!(serde_yaml_ng::from_str::<Strategy>("env-vars").unwrap(), Strategy::EnvVar);
        assert_eq!(serde_yaml_ng::from_str::<Strategy>("env-var").unwrap(), Strategy::EnvVar);
        assert_eq!(serde_yaml_ng::from_str::<Strategy>("annotations").unwrap(), Strategy::Annotation);
        assert_eq!(serde_yaml_ng::from_str::<Strategy>("annotation").unwrap(), Strategy::Annotation);
        assert_eq!(serde_yaml_ng::from_str::<Strategy>("restart").unwrap(), Strategy::Restart);
    }

    #[test]
    fn annotation_patch_is_byte_identical_for_equal_fingerprint() {
        let fp = Fingerprint::from_hex("a".repeat(40));
        let p1 = build_patch(Strategy::Annotation, SourceKind::ConfigMap, "shared", &fp, &[]);
        let p2 = build_patch(Strategy::Annotation, SourceKind::ConfigMap, "shared", &fp, &[]);
        assert_eq!(p1, p2);
    }

    #[test]
    fn merge_patch_env_var_preserves_other_env_entries_and_fields() {
        let fp = Fingerprint::from_hex("b".repeat(40));
        let container = Container {
            name: "app".into(),
            image: Some("example/app:v1".into()),
            env: Some(vec![k8s_openapi::api::core::v1::EnvVar {
                name: "OTHER".into(),
                value: Some("kept".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let patch = build_merge_patch_env_var(SourceKind::ConfigMap, "shared", &fp, &[container]);
        let env = patch["spec"]["template"]["spec"]["containers"][0]["env"].as_array().unwrap();
        assert_eq!(env.len(), 2);
        assert!(env.iter().any(|e| e["name"] == "OTHER" && e["value"] == "kept"));
        assert!(env.iter().any(|e| e["name"] == "STAKATER_SHARED_CONFIGMAP" && e["value"] == fp.as_str()));
        assert_eq!(patch["spec"]["template"]["spec"]["containers"][0]["image"], "example/app:v1");
    }

    #[test]
    fn merge_patch_env_var_replaces_stale_fingerprint_not_duplicates() {
        let old_fp = Fingerprint::from_hex("c".repeat(40));
        let new_fp = Fingerprint::from_hex("d".repeat(40));
        let container = Container {
            name: "app".into(),
            env: Some(vec![k8s_openapi::api::core::v1::EnvVar {
                name: "STAKATER_SHARED_CONFIGMAP".into(),
                value: Some(old_fp.as_str().to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let patch = build_merge_patch_env_var(SourceKind::ConfigMap, "shared", &new_fp, &[container]);
        let env = patch["spec"]["template"]["spec"]["containers"][0]["env"].as_array().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0]["value"], new_fp.as_str());
    }
}
