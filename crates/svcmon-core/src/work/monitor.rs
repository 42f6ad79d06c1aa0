// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-source work monitor with lock-free roll-over.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use super::collection::WorkRecordCollection;
use super::now_millis;
use crate::error::WorkError;

/// Accumulates work outcomes for one source.
///
/// Recorders always go through the current collection pointer. Rolling
/// swaps in a fresh collection and hands the previous one back, so an
/// update racing with a roll lands in either the old or the new window
/// and is never lost.
#[derive(Debug)]
pub struct WorkMonitor {
    source_name: String,
    current: ArcSwap<WorkRecordCollection>,
}

impl WorkMonitor {
    pub fn new(source_name: impl Into<String>) -> Self {
        let source_name = source_name.into();
        let current = ArcSwap::from_pointee(WorkRecordCollection::new(
            source_name.clone(),
            now_millis(),
        ));
        Self {
            source_name,
            current,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn record_work_ok(&self, work_name: &str, duration_ms: u64) -> Result<(), WorkError> {
        self.current.load().record(work_name, duration_ms, true)
    }

    pub fn record_work_error(&self, work_name: &str, duration_ms: u64) -> Result<(), WorkError> {
        self.current.load().record(work_name, duration_ms, false)
    }

    /// The collection currently being recorded into.
    pub fn current(&self) -> Arc<WorkRecordCollection> {
        self.current.load_full()
    }

    /// Swaps in an empty collection and returns the finished one with its
    /// end time set.
    pub fn roll_records(&self) -> Arc<WorkRecordCollection> {
        let now = now_millis();
        let fresh = Arc::new(WorkRecordCollection::new(self.source_name.clone(), now));
        let finished = self.current.swap(fresh);
        finished.set_end_time(now);
        trace!(
            source = %self.source_name,
            records = finished.size(),
            "Rolled work records"
        );
        finished
    }
}
