// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for work recording and roll-over under concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use svcmon_core::error::WorkError;
use svcmon_core::work::{MonitoredWork, NO_NAME, WorkMonitor, WorkRecordCollection};

fn totals(collections: &[Arc<WorkRecordCollection>]) -> (u64, u64) {
    collections
        .iter()
        .flat_map(|collection| collection.work_records())
        .fold((0, 0), |(ok, err), record| {
            (ok + u64::from(record.ok_count), err + u64::from(record.error_count))
        })
}

#[test]
fn test_save_scenario() {
    let monitor = WorkMonitor::new("orders");
    monitor.record_work_ok("save", 100).unwrap();
    monitor.record_work_ok("save", 150).unwrap();
    monitor.record_work_error("save", 300).unwrap();

    let rolled = monitor.roll_records();
    let save = rolled.work_record("save").unwrap();
    assert_eq!(save.ok_count, 2);
    assert_eq!(save.ok_duration, 250);
    assert_eq!(save.ok_avg_duration(), 125.0);
    assert_eq!(save.error_count, 1);
    assert_eq!(save.error_duration, 300);
    assert_eq!(save.error_avg_duration(), 300.0);
}

#[test]
fn test_roll_twice_without_activity() {
    let monitor = WorkMonitor::new("orders");
    monitor.record_work_ok("save", 1).unwrap();
    monitor.roll_records();
    let second = monitor.roll_records();
    assert_eq!(second.size(), 0);
    assert!(second.work_record_names().is_empty());
}

#[test]
fn test_empty_work_name_is_validation_error() {
    let monitor = WorkMonitor::new("orders");
    assert_eq!(monitor.record_work_ok("", 1), Err(WorkError::EmptyWorkName));
    assert_eq!(monitor.roll_records().size(), 0);
}

#[test]
fn test_counts_conserved_across_concurrent_rolls() {
    const THREADS: usize = 8;
    const CALLS: usize = 5_000;

    let monitor = Arc::new(WorkMonitor::new("orders"));
    let done = Arc::new(AtomicBool::new(false));

    let roller = {
        let monitor = monitor.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let mut rolled = Vec::new();
            while !done.load(Ordering::SeqCst) {
                rolled.push(monitor.roll_records());
                std::thread::yield_now();
            }
            rolled
        })
    };

    let recorders: Vec<_> = (0..THREADS)
        .map(|thread| {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                for call in 0..CALLS {
                    let name = if call % 3 == 0 { "load" } else { "save" };
                    if (thread + call) % 2 == 0 {
                        monitor.record_work_ok(name, 1).unwrap();
                    } else {
                        monitor.record_work_error(name, 1).unwrap();
                    }
                }
            })
        })
        .collect();
    for recorder in recorders {
        recorder.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);

    let mut collections = roller.join().unwrap();
    collections.push(monitor.roll_records());

    let (ok, err) = totals(&collections);
    assert_eq!(ok + err, (THREADS * CALLS) as u64);
    assert_eq!(ok, (THREADS * CALLS / 2) as u64);
}

#[test]
fn test_rolled_windows_are_ordered() {
    let monitor = WorkMonitor::new("orders");
    let collections: Vec<_> = (0..5).map(|_| monitor.roll_records()).collect();
    for pair in collections.windows(2) {
        assert_eq!(pair[0].end_time(), Some(pair[1].start_time()));
    }
}

#[tokio::test]
async fn test_monitored_work_feeds_monitor() {
    let monitor = WorkMonitor::new("orders");

    for _ in 0..3 {
        MonitoredWork::new(&monitor, "save")
            .unwrap()
            .run(async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();
    }
    let _ = MonitoredWork::new(&monitor, "save")
        .unwrap()
        .run(async { Err::<(), _>(std::io::Error::other("disk full")) })
        .await;
    MonitoredWork::unnamed(&monitor)
        .run_blocking(|| Ok::<_, anyhow::Error>(()))
        .unwrap();

    let rolled = monitor.roll_records();
    assert_eq!(rolled.size(), 2);
    let save = rolled.work_record("save").unwrap();
    assert_eq!(save.ok_count, 3);
    assert_eq!(save.error_count, 1);
    assert_eq!(rolled.work_record(NO_NAME).unwrap().ok_count, 1);
}

#[test]
fn test_interruption_rearms_token() {
    let monitor = WorkMonitor::new("orders");
    let token = tokio_util::sync::CancellationToken::new();

    let err = MonitoredWork::new(&monitor, "wait")
        .unwrap()
        .interrupt_token(&token)
        .run_blocking(|| Err::<(), _>(std::io::Error::from(std::io::ErrorKind::Interrupted)))
        .unwrap_err();

    assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    assert!(token.is_cancelled());
    let record = monitor.current().work_record("wait").unwrap();
    assert_eq!(record.error_count, 1);
    assert_eq!(record.ok_count, 0);
}
