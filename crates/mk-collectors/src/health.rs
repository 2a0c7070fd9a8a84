//! Per-collector health tracking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Shared health state. Collectors update it as they work; the manager
/// reads snapshots on its 30-second sweep.
#[derive(Debug, Default)]
pub struct CollectorHealth {
    last_success: Mutex<Option<DateTime<Utc>>>,
    error_count: AtomicU64,
    target_count: AtomicUsize,
}

/// A point-in-time view of a collector's health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub last_success: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub target_count: usize,
}

impl CollectorHealth {
    pub fn new() -> Self {
        CollectorHealth::default()
    }

    pub fn record_success(&self, at: DateTime<Utc>) {
        let mut guard = self
            .last_success
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(at);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_target_count(&self, count: usize) {
        self.target_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_success = *self
            .last_success
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        HealthSnapshot {
            last_success,
            error_count: self.error_count.load(Ordering::Relaxed),
            target_count: self.target_count.load(Ordering::Relaxed),
        }
    }
}
