// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The [`Service`] trait implemented by long-lived components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ServiceLifecycle, ServiceState};
use crate::error::ServiceError;
use crate::work::WorkMonitor;

/// A component with a start/stop lifecycle.
///
/// Implementors own a [`ServiceLifecycle`] and override the `on_start` /
/// `on_stop` hooks. The provided `start` / `stop` methods drive the state
/// machine and should not be overridden.
#[async_trait]
pub trait Service: Send + Sync {
    fn lifecycle(&self) -> &ServiceLifecycle;

    /// Called while STARTING. An error aborts the start and the service
    /// returns to STOPPED.
    async fn on_start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Called while STOPPING, after in-flight work has drained or been
    /// interrupted and the service's own tasks have exited.
    async fn on_stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Starts the service. Idempotent on a started service.
    async fn start(&self) -> Result<(), ServiceError> {
        self.lifecycle().start(self).await
    }

    /// Stops the service, giving in-flight graceful work up to `grace` to finish.
    async fn stop(&self, grace: Duration) -> Result<(), ServiceError> {
        self.lifecycle().stop(self, grace).await
    }

    /// Stops the service, interrupting in-flight work immediately.
    async fn stop_immediate(&self) -> Result<(), ServiceError> {
        self.stop(Duration::ZERO).await
    }

    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    fn state(&self) -> ServiceState {
        self.lifecycle().state()
    }

    fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }

    fn work_monitor(&self) -> &Arc<WorkMonitor> {
        self.lifecycle().work_monitor()
    }
}
