// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic work-record publishing.
//!
//! [`WorkPublishService`] wakes on wall-clock boundaries that are a
//! multiple of the publish periodicity. Each cycle it rolls every
//! registered [`WorkMonitor`] and hands the finished collections to each
//! [`WorkRecordCollectionProcessor`], all stamped with the boundary time.
//!
//! The service starts itself when the first monitor registers and stops
//! when the last one deregisters.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::ServiceError;
use crate::lifecycle::{Service, ServiceLifecycle};
use crate::work::{WorkMonitor, WorkRecordCollection, now_millis};

/// Default time between publish cycles.
pub const DEFAULT_PUBLISH_PERIODICITY: Duration = Duration::from_secs(60);

/// Consumes the collections rolled in one publish cycle.
#[async_trait]
pub trait WorkRecordCollectionProcessor: Send + Sync {
    /// `timestamp` is the cycle boundary in milliseconds since the Unix epoch.
    async fn process(&self, timestamp: u64, collection: &WorkRecordCollection);
}

/// Something work monitors can be registered with for periodic publishing.
#[async_trait]
pub trait WorkPublisher: Send + Sync {
    async fn register_work_monitor(&self, monitor: Arc<WorkMonitor>) -> Result<(), ServiceError>;

    async fn deregister_work_monitor(&self, monitor: &Arc<WorkMonitor>) -> Result<(), ServiceError>;
}

/// Configuration for [`WorkPublishService`].
#[derive(Debug, Clone)]
pub struct WorkPublishServiceConfig {
    /// Time between publish cycles. Must be non-zero.
    pub publish_periodicity: Duration,
    /// When disabled the service keeps its schedule but skips publishing.
    pub enabled: bool,
}

impl Default for WorkPublishServiceConfig {
    fn default() -> Self {
        Self {
            publish_periodicity: DEFAULT_PUBLISH_PERIODICITY,
            enabled: true,
        }
    }
}

/// Periodically rolls registered work monitors and runs processors over
/// the results.
pub struct WorkPublishService {
    lifecycle: ServiceLifecycle,
    shared: Arc<PublishShared>,
    // Serializes registration changes with the start/stop they trigger.
    membership: Mutex<()>,
}

struct PublishShared {
    periodicity_ms: AtomicU64,
    enabled: AtomicBool,
    monitors: ArcSwap<Vec<Arc<WorkMonitor>>>,
    processors: ArcSwap<Vec<Arc<dyn WorkRecordCollectionProcessor>>>,
}

impl WorkPublishService {
    pub fn new(config: WorkPublishServiceConfig) -> Result<Self, ServiceError> {
        let periodicity_ms = periodicity_millis(config.publish_periodicity)?;
        Ok(Self {
            lifecycle: ServiceLifecycle::new("work-publisher"),
            shared: Arc::new(PublishShared {
                periodicity_ms: AtomicU64::new(periodicity_ms),
                enabled: AtomicBool::new(config.enabled),
                monitors: ArcSwap::from_pointee(Vec::new()),
                processors: ArcSwap::from_pointee(Vec::new()),
            }),
            membership: Mutex::new(()),
        })
    }

    pub fn publish_periodicity(&self) -> Duration {
        Duration::from_millis(self.shared.periodicity_ms.load(Ordering::Relaxed))
    }

    /// Takes effect from the next cycle.
    pub fn set_publish_periodicity(&self, periodicity: Duration) -> Result<(), ServiceError> {
        let periodicity_ms = periodicity_millis(periodicity)?;
        self.shared
            .periodicity_ms
            .store(periodicity_ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_processors(&self, processors: Vec<Arc<dyn WorkRecordCollectionProcessor>>) {
        self.shared.processors.store(Arc::new(processors));
    }

    pub fn add_processor(&self, processor: Arc<dyn WorkRecordCollectionProcessor>) {
        self.shared.processors.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&processor));
            next
        });
    }

    /// Monitors currently registered.
    pub fn monitors(&self) -> Vec<Arc<WorkMonitor>> {
        Vec::clone(&self.shared.monitors.load())
    }

    /// Runs one publish cycle immediately, stamped with `timestamp`.
    pub async fn publish(&self, timestamp: u64) {
        self.shared.publish(timestamp).await;
    }
}

impl PublishShared {
    fn periodicity_ms(&self) -> u64 {
        self.periodicity_ms.load(Ordering::Relaxed)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn publish(&self, timestamp: u64) {
        let monitors = self.monitors.load_full();
        let collections: Vec<Arc<WorkRecordCollection>> =
            monitors.iter().map(|monitor| monitor.roll_records()).collect();

        let processors = self.processors.load_full();
        for processor in processors.iter() {
            for collection in &collections {
                let processed = AssertUnwindSafe(processor.process(timestamp, collection))
                    .catch_unwind()
                    .await;
                if processed.is_err() {
                    error!(
                        source = %collection.source_name(),
                        "Work record processor panicked"
                    );
                }
            }
        }
        debug!(
            timestamp,
            monitors = collections.len(),
            processors = processors.len(),
            "Published work records"
        );
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            periodicity_ms = self.periodicity_ms(),
            "Work publisher loop started"
        );

        let mut last_wake = 0;
        loop {
            let periodicity = self.periodicity_ms();
            let now = now_millis();
            let wake = next_wake(now, periodicity, last_wake);

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = tokio::time::sleep(Duration::from_millis(wake.saturating_sub(now))) => {}
            }
            last_wake = wake;

            if !self.is_enabled() {
                trace!("Work publishing disabled, skipping cycle");
                continue;
            }

            self.publish(wake).await;

            let finished = now_millis();
            if finished >= wake + periodicity {
                warn!(
                    elapsed_ms = finished - wake,
                    periodicity_ms = periodicity,
                    "Work publishing took longer than the publish period"
                );
            }
        }

        info!("Work publisher loop stopped");
    }
}

/// First periodicity boundary strictly after `now`, never repeating `last_wake`.
fn next_wake(now: u64, periodicity: u64, last_wake: u64) -> u64 {
    let boundary = now - now % periodicity + periodicity;
    if boundary <= last_wake {
        last_wake + periodicity
    } else {
        boundary
    }
}

fn periodicity_millis(periodicity: Duration) -> Result<u64, ServiceError> {
    let millis = u64::try_from(periodicity.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Err(ServiceError::InvalidArgument(
            "publish periodicity must be greater than zero".to_string(),
        ));
    }
    Ok(millis)
}

#[async_trait]
impl Service for WorkPublishService {
    fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }

    async fn on_start(&self) -> Result<(), ServiceError> {
        let shared = Arc::clone(&self.shared);
        self.lifecycle
            .spawn_task("work-publisher", move |shutdown| shared.run(shutdown))
            .await;
        Ok(())
    }
}

#[async_trait]
impl WorkPublisher for WorkPublishService {
    async fn register_work_monitor(&self, monitor: Arc<WorkMonitor>) -> Result<(), ServiceError> {
        let _membership = self.membership.lock().await;
        let monitors = self.shared.monitors.load_full();
        if monitors.iter().any(|m| Arc::ptr_eq(m, &monitor)) {
            return Ok(());
        }

        let mut next = Vec::clone(&monitors);
        next.push(Arc::clone(&monitor));
        self.shared.monitors.store(Arc::new(next));
        info!(source = %monitor.source_name(), "Work monitor registered");

        self.start().await
    }

    async fn deregister_work_monitor(&self, monitor: &Arc<WorkMonitor>) -> Result<(), ServiceError> {
        let _membership = self.membership.lock().await;
        let monitors = self.shared.monitors.load_full();
        if !monitors.iter().any(|m| Arc::ptr_eq(m, monitor)) {
            return Ok(());
        }

        let next: Vec<Arc<WorkMonitor>> = monitors
            .iter()
            .filter(|m| !Arc::ptr_eq(m, monitor))
            .cloned()
            .collect();
        let now_empty = next.is_empty();
        self.shared.monitors.store(Arc::new(next));
        info!(source = %monitor.source_name(), "Work monitor deregistered");

        if now_empty {
            self.stop_immediate().await?;
        }
        Ok(())
    }
}
