// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work accounting.
//!
//! A [`WorkMonitor`] accumulates per-work-name success/error counts and
//! durations into the current [`WorkRecordCollection`]. A publisher
//! periodically rolls the monitor over, receiving the finished collection
//! while recorders continue into a fresh one without blocking.

mod collection;
mod instrument;
mod monitor;
mod record;

pub use collection::WorkRecordCollection;
pub use instrument::{MonitoredWork, WorkFailure};
pub use monitor::WorkMonitor;
pub use record::{MutableWorkRecord, WorkRecord};

/// Work name used when a caller does not name its work.
pub const NO_NAME: &str = "<unnamed>";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
