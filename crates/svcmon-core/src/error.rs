// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for svcmon-core.

use thiserror::Error;

use crate::lifecycle::ServiceState;

/// Errors raised by the service lifecycle and by work executed under graceful shutdown.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// A state change was requested that the lifecycle does not allow.
    #[error("service '{service}': invalid state transition {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    /// Graceful-shutdown work was submitted while the service was not started.
    #[error("service '{service}' refusing work [{state}]")]
    NotRunning { service: String, state: ServiceState },

    /// Settings that can only change while stopped were modified on a live service.
    #[error("service '{service}' must be STOPPED to reconfigure [{state}]")]
    NotStopped { service: String, state: ServiceState },

    /// Another caller's start attempt failed while this caller was waiting on it.
    #[error("service '{0}': start operation in another task failed")]
    ConcurrentStartFailed(String),

    /// The operation was interrupted by service shutdown.
    #[error("service operation interrupted")]
    Interrupted,

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Work was rejected by the work monitor.
    #[error(transparent)]
    Work(#[from] WorkError),

    /// A lifecycle hook or sub-service failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Work name validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// Work names are used as record keys and telemetry suffixes and cannot be empty.
    #[error("work name cannot be empty")]
    EmptyWorkName,
}

/// Reconnecting socket configuration errors.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The target host name is empty.
    #[error("hostname cannot be empty")]
    EmptyHost,

    /// The target port is outside 1..=65535.
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    /// A zero reconnect periodicity would retry a failing host without pause.
    #[error("reconnect periodicity must be greater than zero")]
    InvalidReconnectPeriodicity,

    /// `start()` was called outside of a tokio runtime.
    #[error("reconnecting socket requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Telemetry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    /// `name` and `createdAt` are fixed at construction time.
    #[error("can't modify attr '{0}'")]
    ReservedAttribute(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Lifecycle operation failed.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Work recording was rejected.
    #[error("Work error: {0}")]
    Work(#[from] WorkError),

    /// Socket configuration was rejected.
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    /// Telemetry construction was rejected.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
