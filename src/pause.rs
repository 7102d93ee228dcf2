//! `PauseState`: per-workload "don't reload again too soon" gate.
//! Intentionally non-persistent — a restart resets it.

use crate::workload::WorkloadRef;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
pub struct PauseState {
    last_reloaded_at: RwLock<HashMap<WorkloadRef, DateTime<Utc>>>,
}

impl PauseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a reload action against `workload_ref` just succeeded.
    pub fn record_reload(&self, workload_ref: &WorkloadRef, at: DateTime<Utc>) {
        self.last_reloaded_at.write().insert(workload_ref.clone(), at);
    }

    /// If `workload_ref` reloaded within `pause_period` of `now`, return the
    /// remaining time to wait before it's eligible again.
    pub fn remaining(&self, workload_ref: &WorkloadRef, pause_period: Duration, now: DateTime<Utc>) -> Option<Duration> {
        let last = *self.last_reloaded_at.read().get(workload_ref)?;
        let elapsed = (now - last).to_std().ok()?;
        if elapsed >= pause_period {
            None
        } else {
            Some(pause_period - elapsed)
        }
    }
}
