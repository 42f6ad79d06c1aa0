// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the svcmon binary.

use std::time::Duration;

use crate::publish::DEFAULT_PUBLISH_PERIODICITY;
use crate::reconnecting_socket::DEFAULT_RECONNECT_PERIODICITY;
use crate::telemetry::DEFAULT_GRAPHITE_PORT;

/// Configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Source name of the heartbeat work monitor
    pub source_name: String,
    /// Time between work publish cycles
    pub publish_periodicity: Duration,
    /// Whether publish cycles run processors
    pub publish_enabled: bool,
    /// Grace period given to in-flight work on shutdown
    pub stop_grace_period: Duration,
    /// Graphite host; empty disables the Graphite sink
    pub graphite_host: String,
    /// Graphite plaintext port
    pub graphite_port: u16,
    /// Delay between Graphite reconnect attempts
    pub reconnect_periodicity: Duration,
    /// Telemetry name filter (`INCLUDE:<regex>,EXCLUDE:<regex>`)
    pub telemetry_filter: String,
    /// Entries buffered ahead of the telemetry sinks
    pub telemetry_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_name: "svcmon".to_string(),
            publish_periodicity: DEFAULT_PUBLISH_PERIODICITY,
            publish_enabled: true,
            stop_grace_period: Duration::from_millis(5000),
            graphite_host: String::new(),
            graphite_port: DEFAULT_GRAPHITE_PORT,
            reconnect_periodicity: DEFAULT_RECONNECT_PERIODICITY,
            telemetry_filter: String::new(),
            telemetry_queue_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let source_name = lookup("SVCMON_SOURCE_NAME").unwrap_or(defaults.source_name);
        if source_name.is_empty() {
            return Err(ConfigError::InvalidValue("SVCMON_SOURCE_NAME"));
        }

        let publish_periodicity = match lookup("SVCMON_PUBLISH_PERIODICITY_SECS") {
            Some(value) => {
                let secs: u64 = parse(&value, "SVCMON_PUBLISH_PERIODICITY_SECS")?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue("SVCMON_PUBLISH_PERIODICITY_SECS"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.publish_periodicity,
        };

        let publish_enabled = lookup("SVCMON_PUBLISH_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.publish_enabled);

        let stop_grace_period = match lookup("SVCMON_STOP_GRACE_MS") {
            Some(value) => Duration::from_millis(parse(&value, "SVCMON_STOP_GRACE_MS")?),
            None => defaults.stop_grace_period,
        };

        let graphite_host = lookup("SVCMON_GRAPHITE_HOST")
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.graphite_host);

        let graphite_port: u16 = match lookup("SVCMON_GRAPHITE_PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.graphite_port,
        };
        if graphite_port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let reconnect_periodicity = match lookup("SVCMON_RECONNECT_PERIODICITY_MS") {
            Some(value) => {
                let millis = parse(&value, "SVCMON_RECONNECT_PERIODICITY_MS")?;
                if millis == 0 {
                    return Err(ConfigError::InvalidValue("SVCMON_RECONNECT_PERIODICITY_MS"));
                }
                Duration::from_millis(millis)
            }
            None => defaults.reconnect_periodicity,
        };

        let telemetry_filter = lookup("SVCMON_TELEMETRY_FILTER").unwrap_or(defaults.telemetry_filter);

        let telemetry_queue_capacity = match lookup("SVCMON_TELEMETRY_QUEUE_CAPACITY") {
            Some(value) => {
                let capacity = parse(&value, "SVCMON_TELEMETRY_QUEUE_CAPACITY")?;
                usize::try_from(capacity)
                    .ok()
                    .filter(|capacity| *capacity > 0)
                    .ok_or(ConfigError::InvalidValue("SVCMON_TELEMETRY_QUEUE_CAPACITY"))?
            }
            None => defaults.telemetry_queue_capacity,
        };

        Ok(Self {
            source_name,
            publish_periodicity,
            publish_enabled,
            stop_grace_period,
            graphite_host,
            graphite_port,
            reconnect_periodicity,
            telemetry_filter,
            telemetry_queue_capacity,
        })
    }

    /// Whether the Graphite sink should be created.
    pub fn graphite_enabled(&self) -> bool {
        !self.graphite_host.is_empty()
    }
}

fn parse(value: &str, key: &'static str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue(key))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has a value that cannot be used.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}
