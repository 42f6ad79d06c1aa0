// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queued hand-off from telemetry producers to slow sinks.
//!
//! [`AsyncTelemetrySink`] accepts telemetry as graceful-shutdown work,
//! buffers it in a bounded queue and delivers it to the wrapped sinks from
//! a single background task. Producers never wait on the wrapped sinks.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{TelemetryInfo, TelemetrySink};
use crate::error::ServiceError;
use crate::lifecycle::{Service, ServiceLifecycle, ServiceState};

/// What happens to an entry offered to a full queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullPolicy {
    /// Evict the oldest queued entry to make room.
    #[default]
    DiscardOldest,
    /// Drop the offered entry.
    DiscardOffered,
}

/// What happens to queued entries when the sink stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownBehavior {
    /// Drop them.
    Discard,
    /// Deliver them before the worker exits.
    #[default]
    Process,
}

/// Queue settings. They can only change while the sink is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncTelemetrySinkConfig {
    /// Upper bound on queued entries; unbounded by default.
    pub max_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub shutdown_behavior: ShutdownBehavior,
}

impl Default for AsyncTelemetrySinkConfig {
    fn default() -> Self {
        Self {
            max_capacity: usize::MAX,
            queue_full_policy: QueueFullPolicy::default(),
            shutdown_behavior: ShutdownBehavior::default(),
        }
    }
}

impl AsyncTelemetrySinkConfig {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.max_capacity == 0 {
            return Err(ServiceError::InvalidArgument(
                "max_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A [`TelemetrySink`] service that queues telemetry for background delivery.
///
/// Entries published while the service is not running are dropped.
pub struct AsyncTelemetrySink {
    lifecycle: ServiceLifecycle,
    config: ArcSwap<AsyncTelemetrySinkConfig>,
    queue: Arc<TelemetryQueue>,
    sinks: Arc<Vec<Arc<dyn TelemetrySink>>>,
}

#[derive(Default)]
struct TelemetryQueue {
    items: Mutex<VecDeque<TelemetryInfo>>,
    ready: Notify,
}

impl AsyncTelemetrySink {
    pub fn new(
        sinks: Vec<Arc<dyn TelemetrySink>>,
        config: AsyncTelemetrySinkConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        Ok(Self {
            lifecycle: ServiceLifecycle::new("telemetry-queue"),
            config: ArcSwap::from_pointee(config),
            queue: Arc::new(TelemetryQueue::default()),
            sinks: Arc::new(sinks),
        })
    }

    pub fn config(&self) -> AsyncTelemetrySinkConfig {
        **self.config.load()
    }

    /// Replaces the queue settings. Refused unless the service is STOPPED.
    pub fn reconfigure(&self, config: AsyncTelemetrySinkConfig) -> Result<(), ServiceError> {
        config.validate()?;
        let state = self.state();
        if state != ServiceState::Stopped {
            return Err(ServiceError::NotStopped {
                service: self.name().to_string(),
                state,
            });
        }
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Entries waiting for delivery.
    pub async fn queued(&self) -> usize {
        self.queue.items.lock().await.len()
    }
}

impl TelemetryQueue {
    /// Returns false when the entry was dropped.
    async fn offer(&self, info: TelemetryInfo, config: &AsyncTelemetrySinkConfig) -> bool {
        let mut items = self.items.lock().await;
        if items.len() >= config.max_capacity {
            match config.queue_full_policy {
                QueueFullPolicy::DiscardOffered => return false,
                QueueFullPolicy::DiscardOldest => {
                    while items.len() >= config.max_capacity {
                        items.pop_front();
                    }
                }
            }
        }
        items.push_back(info);
        drop(items);
        self.ready.notify_one();
        true
    }

    async fn take(&self) -> Option<TelemetryInfo> {
        self.items.lock().await.pop_front()
    }

    async fn take_all(&self) -> VecDeque<TelemetryInfo> {
        std::mem::take(&mut *self.items.lock().await)
    }

    async fn run(
        self: Arc<Self>,
        sinks: Arc<Vec<Arc<dyn TelemetrySink>>>,
        shutdown_behavior: ShutdownBehavior,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = self.ready.notified() => {}
            }
            while !shutdown.is_cancelled() {
                let Some(info) = self.take().await else {
                    break;
                };
                deliver(&sinks, &info).await;
            }
        }

        let remaining = self.take_all().await;
        match shutdown_behavior {
            ShutdownBehavior::Discard => {
                info!(count = remaining.len(), "Discarding queued telemetry at shutdown");
            }
            ShutdownBehavior::Process => {
                info!(count = remaining.len(), "Processing queued telemetry at shutdown");
                for info in &remaining {
                    deliver(&sinks, info).await;
                }
            }
        }
    }
}

async fn deliver(sinks: &[Arc<dyn TelemetrySink>], info: &TelemetryInfo) {
    for sink in sinks {
        sink.publish(info).await;
    }
}

#[async_trait]
impl Service for AsyncTelemetrySink {
    fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }

    async fn on_start(&self) -> Result<(), ServiceError> {
        let leftover = self.queue.take_all().await.len();
        if leftover > 0 {
            debug!(count = leftover, "Dropped telemetry left from the previous run");
        }

        let queue = Arc::clone(&self.queue);
        let sinks = Arc::clone(&self.sinks);
        let shutdown_behavior = self.config.load().shutdown_behavior;
        self.lifecycle
            .spawn_task("telemetry-queue", move |shutdown| {
                queue.run(sinks, shutdown_behavior, shutdown)
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for AsyncTelemetrySink {
    async fn publish(&self, info: &TelemetryInfo) {
        let config = self.config();
        let offered = self
            .lifecycle
            .graceful(async { Ok::<_, ServiceError>(self.queue.offer(info.clone(), &config).await) })
            .await;
        match offered {
            Ok(true) => {}
            Ok(false) => trace!(name = %info.name(), "Telemetry queue full, dropping entry"),
            Err(err) => debug!(name = %info.name(), error = %err, "Telemetry not queued"),
        }
    }
}
