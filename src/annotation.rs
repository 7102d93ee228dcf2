//! Annotation Policy.

use crate::resolver::References;
use crate::source::SourceKind;
use crate::strategy::Strategy;
use crate::workload::WorkloadKind;
use std::collections::BTreeMap;
use std::time::Duration;

pub const ANNOTATION_AUTO: &str = "reloader.stakater.com/auto";
pub const ANNOTATION_SEARCH: &str = "reloader.stakater.com/search";
pub const ANNOTATION_MATCH: &str = "reloader.stakater.com/match";
pub const ANNOTATION_STRATEGY: &str = "reloader.stakater.com/reload-strategy";
pub const ANNOTATION_PAUSE_PERIOD: &str = "reloader.stakater.com/pause-period";
pub const ANNOTATION_CONFIGMAP_RELOAD: &str = "configmap.reloader.stakater.com/reload";
pub const ANNOTATION_SECRET_RELOAD: &str = "secret.reloader.stakater.com/reload";

pub const ANNOTATION_LAST_RELOADED_FROM: &str = "reloader.stakater.com/last-reloaded-from";
pub const ANNOTATION_LAST_RELOADED_FINGERPRINT: &str = "reloader.stakater.com/last-reloaded-fingerprint";

/// Decision produced by [`resolve`] for one (workload, source) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip,
    Match { strategy: Strategy, pause_period: Option<Duration> },
}

/// Namespaces/resources configuration excludes from consideration.
pub struct ScopeFilter<'a> {
    pub ignored_namespaces: &'a [String],
    /// Whole workload kinds (`deployments`, `statefulsets`, ...) never
    /// considered as reload candidates, matched case-insensitively against
    /// [`WorkloadKind::plural`].
    pub ignored_resources: &'a [String],
}

impl ScopeFilter<'_> {
    pub fn excludes(&self, namespace: &str) -> bool {
        self.ignored_namespaces.iter().any(|ns| ns == namespace)
    }

    pub fn excludes_kind(&self, kind: WorkloadKind) -> bool {
        self.ignored_resources.iter().any(|r| r.eq_ignore_ascii_case(kind.plural()))
    }
}

/// Resolve the annotation policy for one workload against one source
/// object, following the five-step precedence.
pub fn resolve(
    workload_annotations: &BTreeMap<String, String>,
    source_kind: SourceKind,
    source_namespace: &str,
    source_name: &str,
    source_annotations: &BTreeMap<String, String>,
    references: &References,
    scope: &ScopeFilter<'_>,
    default_strategy: Strategy,
) -> Decision {
    // Step 1: namespace scope exclusion.
    if scope.excludes(source_namespace) {
        return Decision::Skip;
    }

    let workload_strategy_override = workload_annotations
        .get(ANNOTATION_STRATEGY)
        .and_then(|s| Strategy::parse(s));
    let pause_period = workload_annotations
        .get(ANNOTATION_PAUSE_PERIOD)
        .and_then(|s| parse_duration(s));

    // Step 2: explicit allow-list (`*.reload=n1,n2`).
    if let Some(names) = allow_list(workload_annotations, source_kind) {
        if names.iter().any(|n| n == source_name) {
            return Decision::Match {
                strategy: workload_strategy_override.unwrap_or(default_strategy),
                pause_period,
            };
        }
        // An allow-list is present but doesn't name this source: the
        // workload has opted into a narrower contract than `auto`, so a
        // non-listed source never matches even if `auto=true` is also set.
        return Decision::Skip;
    }

    // Step 3: `auto=true` plus resolver-confirmed reference.
    if is_true(workload_annotations, ANNOTATION_AUTO) {
        let referenced = references
            .iter()
            .any(|(rk, name)| rk.is_configmap() == matches!(source_kind, SourceKind::ConfigMap) && name == source_name);
        if referenced {
            return Decision::Match {
                strategy: workload_strategy_override.unwrap_or(default_strategy),
                pause_period,
            };
        }
    }

    // Step 4: `search=true` plus a matching `match` annotation on the source.
    if is_true(workload_annotations, ANNOTATION_SEARCH) && is_true(source_annotations, ANNOTATION_MATCH) {
        return Decision::Match {
            strategy: workload_strategy_override.unwrap_or(default_strategy),
            pause_period,
        };
    }

    // Step 5: no opt-in applies.
    Decision::Skip
}

fn is_true(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).map(|v| v == "true").unwrap_or(false)
}

fn allow_list(annotations: &BTreeMap<String, String>, kind: SourceKind) -> Option<Vec<String>> {
    let key = match kind {
        SourceKind::ConfigMap => ANNOTATION_CONFIGMAP_RELOAD,
        SourceKind::Secret => ANNOTATION_SECRET_RELOAD,
    };
    annotations
        .get(key)
        .map(|csv| csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

/// Parse a Go-style duration string (`15s`, `2m`, `1h30m`) into a
/// [`Duration`]. Only the units Reloader's pause-period annotation uses
/// (`s`, `m`, `h`) are supported.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
        } else {
            let value: f64 = digits.parse().ok()?;
            digits.clear();
            let unit_seconds = match c {
                's' => 1.0,
                'm' => 60.0,
                'h' => 3600.0,
                _ => return None,
            };
            total += Duration::from_secs_f64(value * unit_seconds);
        }
    }
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}
