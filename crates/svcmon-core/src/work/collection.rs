// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The set of work records accumulated over one publishing window.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::record::{MutableWorkRecord, WorkRecord};
use crate::error::WorkError;

/// Work records for one source over the window `[start_time, end_time)`.
///
/// Records are created on first use. `end_time` stays at zero while the
/// collection is the monitor's current one and is set when it is rolled.
#[derive(Debug)]
pub struct WorkRecordCollection {
    source_name: String,
    start_time: u64,
    end_time: AtomicU64,
    records: DashMap<String, MutableWorkRecord>,
}

impl WorkRecordCollection {
    pub fn new(source_name: impl Into<String>, start_time: u64) -> Self {
        Self {
            source_name: source_name.into(),
            start_time,
            end_time: AtomicU64::new(0),
            records: DashMap::new(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Window start, milliseconds since the Unix epoch.
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Window end, milliseconds since the Unix epoch. `None` while still open.
    pub fn end_time(&self) -> Option<u64> {
        match self.end_time.load(Ordering::Acquire) {
            0 => None,
            end => Some(end),
        }
    }

    pub(crate) fn set_end_time(&self, end_time: u64) {
        self.end_time.store(end_time.max(1), Ordering::Release);
    }

    /// Number of distinct work names recorded.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recorded work names, sorted.
    pub fn work_record_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn work_record(&self, work_name: &str) -> Option<WorkRecord> {
        self.records.get(work_name).map(|r| r.snapshot())
    }

    /// Snapshots of every record, sorted by work name.
    pub fn work_records(&self) -> Vec<WorkRecord> {
        let mut records: Vec<WorkRecord> = self.records.iter().map(|r| r.snapshot()).collect();
        records.sort_by(|a, b| a.work_name.cmp(&b.work_name));
        records
    }

    pub fn record_ok(&self, work_name: &str, duration_ms: u64) -> Result<(), WorkError> {
        self.record(work_name, duration_ms, true)
    }

    pub fn record_error(&self, work_name: &str, duration_ms: u64) -> Result<(), WorkError> {
        self.record(work_name, duration_ms, false)
    }

    pub(crate) fn record(&self, work_name: &str, duration_ms: u64, ok: bool) -> Result<(), WorkError> {
        if work_name.is_empty() {
            return Err(WorkError::EmptyWorkName);
        }
        let apply = |record: &MutableWorkRecord| {
            if ok {
                record.record_ok(duration_ms);
            } else {
                record.record_error(duration_ms);
            }
        };

        if let Some(record) = self.records.get(work_name) {
            apply(record.value());
            return Ok(());
        }
        // Concurrent creators race on the entry; exactly one record wins.
        let record = self
            .records
            .entry(work_name.to_owned())
            .or_insert_with(|| MutableWorkRecord::new_unchecked(work_name.to_owned()));
        apply(record.value());
        Ok(())
    }
}
