//! Error taxonomy for the reload engine.
//!
//! `ReloadError` classifies every failure a queued task can hit into the
//! kinds the work queue and applier dispatch on. Boundary code (config
//! loading, webhook I/O, `main`) still uses plain `anyhow::Result`.

use kube::error::ErrorResponse;

/// One of the outcomes a queued [`crate::queue::ReloadTask`] can produce.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// Fingerprint unchanged since the last observed revision.
    #[error("no data change")]
    NoOp,

    /// Annotation policy resolved to `Skip`.
    #[error("workload does not opt in to this source")]
    NotMatched,

    /// 5xx, throttling, connection reset, or timeout talking to the API server.
    #[error("transient API error: {0}")]
    TransientApi(#[source] kube::Error),

    /// 409 Conflict on patch; local retry budget exhausted.
    #[error("resource version conflict exhausted local retries: {0}")]
    Conflict(#[source] kube::Error),

    /// 4xx other than 409, not-found, or permission denied.
    #[error("terminal API error: {0}")]
    Terminal(#[source] kube::Error),

    /// The supervisor's cancellation token fired mid-task.
    #[error("shutdown in progress")]
    Shutdown,
}

impl ReloadError {
    /// Classify a raw [`kube::Error`] returned from a patch/get/delete call.
    pub fn classify(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ErrorResponse { code: 409, .. }) => ReloadError::Conflict(err),
            kube::Error::Api(ErrorResponse { code, .. }) if is_terminal_status(*code) => {
                ReloadError::Terminal(err)
            }
            kube::Error::Api(ErrorResponse { code, .. }) if *code >= 500 => {
                ReloadError::TransientApi(err)
            }
            _ => ReloadError::TransientApi(err),
        }
    }

    /// Whether the work queue should re-enqueue this task with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReloadError::TransientApi(_) | ReloadError::Conflict(_))
    }

    /// Short, stable label for the `errors_total{type=...}` counter.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReloadError::NoOp => "no-op",
            ReloadError::NotMatched => "not-matched",
            ReloadError::TransientApi(_) => "transient",
            ReloadError::Conflict(_) => "conflict",
            ReloadError::Terminal(err) if is_not_found(err) => "not-found",
            ReloadError::Terminal(_) => "terminal",
            ReloadError::Shutdown => "shutdown",
        }
    }
}

/// 4xx codes other than 409 (conflict, handled separately) and 404 are
/// terminal: retrying without external intervention cannot change the
/// outcome.
fn is_terminal_status(code: u16) -> bool {
    (400..500).contains(&code) && code != 409
}

/// A 404 during churn (workload deleted mid-flight) gets its own
/// `errors_total{type="not-found"}` label rather than the catch-all
/// `"terminal"`, since it's the expected shape of a terminal error under
/// workload churn rather than a misconfiguration.
fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 404, .. }))
}
