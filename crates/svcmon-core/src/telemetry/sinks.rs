// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in telemetry sinks.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, trace, warn};

use super::{TelemetryInfo, TelemetrySink};
use crate::error::SocketError;
use crate::reconnecting_socket::{ConnectionListener, ReconnectingSocket};

/// Graphite plaintext protocol port.
pub const DEFAULT_GRAPHITE_PORT: u16 = 2003;

/// Logs each telemetry entry as a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogSink;

#[async_trait]
impl TelemetrySink for JsonLogSink {
    async fn publish(&self, info: &TelemetryInfo) {
        match serde_json::to_string(info) {
            Ok(json) => info!(target: "svcmon::telemetry", telemetry = %json, "Telemetry"),
            Err(err) => warn!(name = %info.name(), error = %err, "Failed to serialize telemetry"),
        }
    }
}

/// Sends numeric attributes to Graphite over a [`ReconnectingSocket`].
///
/// Each attribute becomes one plaintext line:
/// `<name>.<attribute> <value> <epoch seconds>`.
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    socket: ReconnectingSocket,
}

struct GraphiteConnectionLog;

impl ConnectionListener for GraphiteConnectionLog {
    fn on_connected(&self) {
        info!("Connected to Graphite");
    }

    fn on_disconnected(&self) {
        warn!("Disconnected from Graphite");
    }
}

impl GraphiteSink {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        reconnect_periodicity: Duration,
    ) -> Result<Self, SocketError> {
        let socket = ReconnectingSocket::with_listener(host, port, Arc::new(GraphiteConnectionLog))?;
        socket.set_reconnect_periodicity(reconnect_periodicity)?;
        Ok(Self { socket })
    }

    pub fn start(&self) -> Result<(), SocketError> {
        self.socket.start()
    }

    pub async fn stop(&self) {
        self.socket.stop().await;
    }

    pub fn socket(&self) -> &ReconnectingSocket {
        &self.socket
    }
}

/// Renders the Graphite plaintext lines for `info`.
pub(crate) fn graphite_lines(info: &TelemetryInfo) -> String {
    let timestamp = info.created_at() / 1000;
    let mut lines = String::new();
    for (key, value) in info.attributes().filter(|(_, value)| value.is_numeric()) {
        let _ = writeln!(lines, "{}.{key} {value} {timestamp}", info.name());
    }
    lines
}

#[async_trait]
impl TelemetrySink for GraphiteSink {
    async fn publish(&self, info: &TelemetryInfo) {
        if !self.socket.is_connected() {
            trace!(name = %info.name(), "Graphite not connected, dropping telemetry");
            return;
        }
        let lines = graphite_lines(info);
        if !lines.is_empty() {
            self.socket.write(lines.as_bytes());
        }
    }
}
