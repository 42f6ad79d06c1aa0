// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! svcmon-core - service lifecycle and work monitoring substrate
//!
//! Building blocks for long-lived server components:
//!
//! - [`lifecycle`]: start/stop state machine with graceful shutdown of
//!   in-flight work, owned background tasks and sub-services
//! - [`work`]: per-component work accounting with lock-free roll-over
//! - [`publish`]: periodic publishing of rolled work records
//! - [`telemetry`]: turning work records into named telemetry and
//!   shipping it to JSON logs or Graphite
//! - [`reconnecting_socket`]: fire-and-forget TCP writer with background
//!   reconnection
//! - [`intervene`]: operator intervention requests raised by services
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use svcmon_core::prelude::*;
//!
//! struct OrderStore {
//!     lifecycle: ServiceLifecycle,
//! }
//!
//! #[async_trait::async_trait]
//! impl Service for OrderStore {
//!     fn lifecycle(&self) -> &ServiceLifecycle {
//!         &self.lifecycle
//!     }
//! }
//!
//! impl OrderStore {
//!     // Monitoring wraps the graceful call so interrupted saves are recorded.
//!     async fn save(&self, order: Order) -> Result<(), ServiceError> {
//!         MonitoredWork::new(self.work_monitor(), "save")?
//!             .run(self.lifecycle.graceful(self.write(order)))
//!             .await
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod intervene;
pub mod lifecycle;
pub mod publish;
pub mod reconnecting_socket;
pub mod telemetry;
pub mod work;

pub use config::{Config, ConfigError};
pub use error::{Error, Result, ServiceError, SocketError, TelemetryError, WorkError};

/// Commonly used types.
pub mod prelude {
    pub use crate::error::{ServiceError, WorkError};
    pub use crate::lifecycle::{Service, ServiceLifecycle, ServiceState};
    pub use crate::publish::{
        WorkPublishService, WorkPublishServiceConfig, WorkPublisher, WorkRecordCollectionProcessor,
    };
    pub use crate::work::{MonitoredWork, NO_NAME, WorkFailure, WorkMonitor, WorkRecordCollection};
}
