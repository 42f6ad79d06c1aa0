// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test fixtures for svcmon-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use svcmon_core::error::ServiceError;
use svcmon_core::lifecycle::{Service, ServiceLifecycle};
use svcmon_core::publish::WorkRecordCollectionProcessor;
use svcmon_core::reconnecting_socket::ConnectionListener;
use svcmon_core::work::{WorkRecord, WorkRecordCollection};

/// Service with configurable hook behavior and hook counters.
pub struct TestService {
    lifecycle: ServiceLifecycle,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub start_delay: Duration,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub panic_on_start: AtomicBool,
}

impl TestService {
    pub fn new(name: &str) -> Self {
        Self::with_start_delay(name, Duration::ZERO)
    }

    pub fn with_start_delay(name: &str, start_delay: Duration) -> Self {
        Self {
            lifecycle: ServiceLifecycle::new(name),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            start_delay,
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            panic_on_start: AtomicBool::new(false),
        }
    }

    /// Graceful-shutdown work that sleeps for `duration`.
    pub async fn work(&self, duration: Duration) -> Result<(), ServiceError> {
        self.lifecycle
            .graceful(async {
                tokio::time::sleep(duration).await;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Service for TestService {
    fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }

    async fn on_start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.panic_on_start.load(Ordering::SeqCst) {
            panic!("start hook panicked");
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("start hook failed").into());
        }
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), ServiceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("stop hook failed").into());
        }
        Ok(())
    }
}

/// One collection as seen by a processor.
#[derive(Debug, Clone)]
pub struct Published {
    pub timestamp: u64,
    pub source_name: String,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub records: Vec<WorkRecord>,
}

impl Published {
    pub fn record(&self, work_name: &str) -> Option<&WorkRecord> {
        self.records.iter().find(|r| r.work_name == work_name)
    }
}

/// Processor that forwards every collection it sees over a channel.
pub struct ChannelProcessor {
    tx: mpsc::UnboundedSender<Published>,
}

impl ChannelProcessor {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl WorkRecordCollectionProcessor for ChannelProcessor {
    async fn process(&self, timestamp: u64, collection: &WorkRecordCollection) {
        let _ = self.tx.send(Published {
            timestamp,
            source_name: collection.source_name().to_string(),
            start_time: collection.start_time(),
            end_time: collection.end_time(),
            records: collection.work_records(),
        });
    }
}

/// Connection events in the order they fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ConnectFail,
}

/// Listener that counts and forwards connection events.
pub struct RecordingListener {
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub connect_failed: AtomicUsize,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
            connect_failed: AtomicUsize::new(0),
            tx,
        };
        (Arc::new(listener), rx)
    }
}

impl ConnectionListener for RecordingListener {
    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(ConnectionEvent::Disconnected);
    }

    fn on_connect_fail(&self) {
        self.connect_failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(ConnectionEvent::ConnectFail);
    }
}

/// Waits for the next event, failing the test after `timeout`.
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>, timeout: Duration) -> T {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Polls `condition` every 10ms until it holds, failing the test after `timeout`.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
