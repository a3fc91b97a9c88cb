//! Health hysteresis.
//!
//! A module is only considered failed after `threshold` consecutive
//! unhealthy checks; any other result resets the count.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dockhand_module_sdk::{HealthState, HealthStatus};
use parking_lot::Mutex;
use serde::Serialize;

/// Outcome of recording one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Unhealthy, with the current consecutive count
    Failing(u32),
    ThresholdReached,
}

/// Consecutive-failure counter for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounter {
    consecutive_failures: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record(&mut self, status: &HealthStatus) -> HealthVerdict {
        if status.is_unhealthy() {
            self.record_failure()
        } else {
            self.record_success()
        }
    }

    pub fn record_success(&mut self) -> HealthVerdict {
        self.consecutive_failures = 0;
        HealthVerdict::Healthy
    }

    pub fn record_failure(&mut self) -> HealthVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            HealthVerdict::ThresholdReached
        } else {
            HealthVerdict::Failing(self.consecutive_failures)
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Snapshot of one module's supervision state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub name: String,
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub last_state: Option<HealthState>,
    pub last_message: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
}

struct Tracked {
    counter: FailureCounter,
    last_state: Option<HealthState>,
    last_message: Option<String>,
    last_check: Option<DateTime<Utc>>,
}

/// Health counters for every supervised module.
pub struct HealthTracker {
    threshold: Mutex<u32>,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: Mutex::new(threshold),
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Applies to modules tracked after this call.
    pub fn set_threshold(&self, threshold: u32) {
        *self.threshold.lock() = threshold;
    }

    pub fn track(&self, name: &str) {
        let threshold = *self.threshold.lock();
        self.tracked.lock().insert(
            name.to_string(),
            Tracked {
                counter: FailureCounter::new(threshold),
                last_state: None,
                last_message: None,
                last_check: None,
            },
        );
    }

    pub fn untrack(&self, name: &str) -> bool {
        self.tracked.lock().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.tracked.lock().clear();
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracked.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Record a result. Returns `None` when `name` is no longer tracked.
    pub fn record(&self, name: &str, status: &HealthStatus) -> Option<HealthVerdict> {
        let mut tracked = self.tracked.lock();
        let entry = tracked.get_mut(name)?;
        entry.last_state = Some(status.status);
        entry.last_message = Some(status.message.clone());
        entry.last_check = Some(status.last_check);

        let previous = entry.counter.consecutive_failures();
        let verdict = entry.counter.record(status);
        if verdict == HealthVerdict::Healthy && previous > 0 {
            tracing::info!(module = %name, after_failures = previous, "Module recovered");
        }
        Some(verdict)
    }

    pub fn snapshot(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self
            .tracked
            .lock()
            .iter()
            .map(|(name, t)| HealthRecord {
                name: name.clone(),
                consecutive_failures: t.counter.consecutive_failures(),
                threshold: t.counter.threshold(),
                last_state: t.last_state,
                last_message: t.last_message.clone(),
                last_check: t.last_check,
            })
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}
