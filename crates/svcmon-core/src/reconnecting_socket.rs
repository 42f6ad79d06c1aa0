// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fire-and-forget TCP client that reconnects in the background.
//!
//! Writes never block and never fail: while disconnected the data is
//! dropped. The first write error tears the connection down, notifies the
//! [`ConnectionListener`] once and schedules a single reconnect attempt
//! after the reconnect periodicity.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::SocketError;
use crate::lifecycle::StoppableTask;

/// Default delay between connection attempts.
pub const DEFAULT_RECONNECT_PERIODICITY: Duration = Duration::from_millis(60_000);

/// How long `stop()` waits for an in-progress connect attempt to exit.
const CONNECT_ATTEMPT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state notifications. All hooks default to no-ops.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self) {}

    fn on_disconnected(&self) {}

    fn on_connect_fail(&self) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

/// A TCP connection to `host:port` that is re-established automatically.
#[derive(Clone)]
pub struct ReconnectingSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    host: String,
    port: u16,
    reconnect_periodicity_ms: AtomicU64,
    socket: ArcSwapOption<TcpStream>,
    connect_attempt: ArcSwapOption<StoppableTask>,
    listener: Arc<dyn ConnectionListener>,
    runtime: OnceLock<Handle>,
}

impl std::fmt::Debug for ReconnectingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingSocket")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ReconnectingSocket {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, SocketError> {
        Self::with_listener(host, port, Arc::new(NoopListener))
    }

    pub fn with_listener(
        host: impl Into<String>,
        port: u16,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self, SocketError> {
        let host = host.into();
        if host.is_empty() {
            return Err(SocketError::EmptyHost);
        }
        if port == 0 {
            return Err(SocketError::InvalidPort);
        }
        Ok(Self {
            inner: Arc::new(SocketInner {
                host,
                port,
                reconnect_periodicity_ms: AtomicU64::new(
                    DEFAULT_RECONNECT_PERIODICITY.as_millis() as u64,
                ),
                socket: ArcSwapOption::empty(),
                connect_attempt: ArcSwapOption::empty(),
                listener,
                runtime: OnceLock::new(),
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn reconnect_periodicity(&self) -> Duration {
        self.inner.reconnect_periodicity()
    }

    /// Applies to attempts scheduled after the call. Must be non-zero.
    pub fn set_reconnect_periodicity(&self, periodicity: Duration) -> Result<(), SocketError> {
        let millis = u64::try_from(periodicity.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(SocketError::InvalidReconnectPeriodicity);
        }
        self.inner
            .reconnect_periodicity_ms
            .store(millis, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.socket.load().is_some()
    }

    /// Whether a connect attempt is scheduled or running.
    pub fn is_connecting(&self) -> bool {
        self.inner.connect_attempt.load().is_some()
    }

    /// Begins connecting immediately unless connected or already connecting.
    /// Must be called within a tokio runtime; later reconnects run on the
    /// same runtime.
    pub fn start(&self) -> Result<(), SocketError> {
        let runtime = Handle::try_current()?;
        if self.inner.runtime.set(runtime).is_err() {
            trace!(host = %self.inner.host, port = self.inner.port, "Socket runtime already set");
        }
        if self.is_connected() {
            return Ok(());
        }
        self.inner.start_connect_attempt(Duration::ZERO);
        Ok(())
    }

    /// Cancels any connect attempt and closes the connection. Idempotent.
    pub async fn stop(&self) {
        if let Some(attempt) = self.inner.connect_attempt.swap(None) {
            attempt.shutdown(CONNECT_ATTEMPT_STOP_TIMEOUT).await;
        }
        if self.inner.socket.swap(None).is_some() {
            info!(host = %self.inner.host, port = self.inner.port, "Socket closed");
        }
    }

    /// Writes `data` if connected, otherwise drops it.
    ///
    /// Data that does not fit in the send buffer is dropped. Any other
    /// write error disconnects and schedules a reconnect.
    pub fn write(&self, data: &[u8]) {
        let Some(stream) = self.inner.socket.load_full() else {
            trace!(bytes = data.len(), "Socket not connected, dropping data");
            return;
        };
        if let Err(err) = try_write_all(&stream, data) {
            self.inner.on_write_error(stream, err);
        }
    }
}

impl SocketInner {
    fn reconnect_periodicity(&self) -> Duration {
        Duration::from_millis(self.reconnect_periodicity_ms.load(Ordering::Relaxed))
    }

    /// Schedules a connect attempt unless one is already in flight.
    fn start_connect_attempt(self: &Arc<Self>, initial_delay: Duration) {
        if self.connect_attempt.load().is_some() {
            return;
        }
        let Some(runtime) = self.runtime.get() else {
            warn!(host = %self.host, port = self.port, "Socket not started, skipping reconnect");
            return;
        };

        let attempt = Arc::new(StoppableTask::new(
            format!("connect-{}:{}", self.host, self.port),
            CancellationToken::new(),
        ));
        let previous = self
            .connect_attempt
            .compare_and_swap(&None::<Arc<StoppableTask>>, Some(Arc::clone(&attempt)));
        if previous.is_some() {
            return;
        }

        let inner = Arc::clone(self);
        let this_attempt = Arc::clone(&attempt);
        attempt.start_on(runtime, move |shutdown| async move {
            inner.connect_loop(this_attempt, initial_delay, shutdown).await;
        });
    }

    async fn connect_loop(
        self: &Arc<Self>,
        attempt: Arc<StoppableTask>,
        initial_delay: Duration,
        shutdown: CancellationToken,
    ) {
        let mut delay = initial_delay;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return,

                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.reconnect_periodicity();

            debug!(host = %self.host, port = self.port, "Connecting");
            let connected = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return,

                result = TcpStream::connect((self.host.as_str(), self.port)) => result,
            };

            match connected {
                Ok(stream) => {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(error = %err, "Failed to set TCP_NODELAY");
                    }
                    self.publish_connection(stream);
                    self.finish_connect_attempt(&attempt, &shutdown);
                    return;
                }
                Err(err) => {
                    error!(
                        host = %self.host,
                        port = self.port,
                        error = %err,
                        retry_ms = delay.as_millis() as u64,
                        "Failed to connect"
                    );
                    self.listener.on_connect_fail();
                }
            }
        }
    }

    fn publish_connection(&self, stream: TcpStream) {
        self.socket.store(Some(Arc::new(stream)));
        info!(host = %self.host, port = self.port, "Socket connected");
    }

    /// Releases the attempt slot after a successful connect.
    ///
    /// A write failure between publishing the connection and releasing the
    /// slot finds the slot taken and cannot schedule its reconnect, so the
    /// reconnect is scheduled here instead.
    fn finish_connect_attempt(
        self: &Arc<Self>,
        attempt: &Arc<StoppableTask>,
        shutdown: &CancellationToken,
    ) {
        let previous = self
            .connect_attempt
            .compare_and_swap(&Some(Arc::clone(attempt)), None::<Arc<StoppableTask>>);
        let released = matches!(&*previous, Some(held) if Arc::ptr_eq(held, attempt));
        self.listener.on_connected();

        if released && !shutdown.is_cancelled() && self.socket.load().is_none() {
            debug!(host = %self.host, port = self.port, "Connection lost while connecting, rescheduling");
            self.start_connect_attempt(self.reconnect_periodicity());
        }
    }

    fn on_write_error(self: &Arc<Self>, stream: Arc<TcpStream>, err: io::Error) {
        let current = Some(stream);
        let previous = self
            .socket
            .compare_and_swap(&current, None::<Arc<TcpStream>>);
        let tore_down = match (&*previous, &current) {
            (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
            _ => false,
        };
        // Only the writer that removed the connection reports it.
        if !tore_down {
            return;
        }

        error!(host = %self.host, port = self.port, error = %err, "Socket write failed, disconnecting");
        self.listener.on_disconnected();
        self.start_connect_attempt(self.reconnect_periodicity());
    }
}

fn try_write_all(stream: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => data = &data[written..],
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                debug!(dropped = data.len(), "Socket send buffer full, dropping data");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
