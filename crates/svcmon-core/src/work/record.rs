// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-work-name counters and their immutable snapshot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::error::WorkError;

/// Immutable snapshot of the counters for one work name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    pub work_name: String,
    pub ok_count: u32,
    /// Total milliseconds spent in successful executions.
    pub ok_duration: u64,
    pub error_count: u32,
    /// Total milliseconds spent in failed executions.
    pub error_duration: u64,
}

impl WorkRecord {
    pub fn ok_avg_duration(&self) -> f64 {
        average(self.ok_duration, self.ok_count)
    }

    pub fn error_avg_duration(&self) -> f64 {
        average(self.error_duration, self.error_count)
    }
}

fn average(total: u64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / f64::from(count)
    }
}

/// Concurrently updatable counters for one work name.
///
/// Each field is updated independently; a snapshot taken while recorders
/// are active may pair a count with a duration from a neighbouring update.
#[derive(Debug)]
pub struct MutableWorkRecord {
    work_name: String,
    ok_count: AtomicU32,
    ok_duration: AtomicU64,
    error_count: AtomicU32,
    error_duration: AtomicU64,
}

impl MutableWorkRecord {
    pub fn new(work_name: impl Into<String>) -> Result<Self, WorkError> {
        let work_name = work_name.into();
        if work_name.is_empty() {
            return Err(WorkError::EmptyWorkName);
        }
        Ok(Self::new_unchecked(work_name))
    }

    pub(crate) fn new_unchecked(work_name: String) -> Self {
        Self {
            work_name,
            ok_count: AtomicU32::new(0),
            ok_duration: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
            error_duration: AtomicU64::new(0),
        }
    }

    pub fn work_name(&self) -> &str {
        &self.work_name
    }

    pub fn record_ok(&self, duration_ms: u64) {
        self.ok_count.fetch_add(1, Ordering::Relaxed);
        self.ok_duration.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn record_error(&self, duration_ms: u64) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.error_duration.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn ok_count(&self) -> u32 {
        self.ok_count.load(Ordering::Relaxed)
    }

    pub fn ok_duration(&self) -> u64 {
        self.ok_duration.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn error_duration(&self) -> u64 {
        self.error_duration.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkRecord {
        WorkRecord {
            work_name: self.work_name.clone(),
            ok_count: self.ok_count(),
            ok_duration: self.ok_duration(),
            error_count: self.error_count(),
            error_duration: self.error_duration(),
        }
    }
}
