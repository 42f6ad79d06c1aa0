// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Measures a unit of work and records its outcome in a [`WorkMonitor`].

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::NO_NAME;
use super::monitor::WorkMonitor;
use crate::error::{ServiceError, WorkError};

/// Classifies failures returned by monitored work.
///
/// Work that fails because it was interrupted is still recorded as an
/// error, but the interruption is re-signalled on the caller's token so
/// the enclosing loop observes it.
pub trait WorkFailure {
    fn is_interrupted(&self) -> bool {
        false
    }
}

impl WorkFailure for ServiceError {
    fn is_interrupted(&self) -> bool {
        matches!(self, ServiceError::Interrupted)
    }
}

impl WorkFailure for std::io::Error {
    fn is_interrupted(&self) -> bool {
        self.kind() == std::io::ErrorKind::Interrupted
    }
}

impl WorkFailure for anyhow::Error {
    fn is_interrupted(&self) -> bool {
        if let Some(err) = self.downcast_ref::<ServiceError>() {
            return err.is_interrupted();
        }
        self.downcast_ref::<std::io::Error>()
            .is_some_and(|err| err.kind() == std::io::ErrorKind::Interrupted)
    }
}

impl WorkFailure for crate::error::Error {
    fn is_interrupted(&self) -> bool {
        match self {
            crate::error::Error::Service(err) => err.is_interrupted(),
            crate::error::Error::Io(err) => err.is_interrupted(),
            _ => false,
        }
    }
}

/// One monitored execution: times the work, records ok or error exactly
/// once, then hands back the work's own result.
///
/// ```ignore
/// MonitoredWork::new(&monitor, "save")?
///     .run(async { store.save(order).await })
///     .await?;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MonitoredWork<'a> {
    monitor: &'a WorkMonitor,
    work_name: &'a str,
    interrupt: Option<&'a CancellationToken>,
}

impl<'a> MonitoredWork<'a> {
    pub fn new(monitor: &'a WorkMonitor, work_name: &'a str) -> Result<Self, WorkError> {
        if work_name.is_empty() {
            return Err(WorkError::EmptyWorkName);
        }
        Ok(Self {
            monitor,
            work_name,
            interrupt: None,
        })
    }

    /// Records under the shared [`NO_NAME`] bucket.
    pub fn unnamed(monitor: &'a WorkMonitor) -> Self {
        Self {
            monitor,
            work_name: NO_NAME,
            interrupt: None,
        }
    }

    /// Token cancelled again when the work reports an interruption.
    pub fn interrupt_token(mut self, token: &'a CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    pub fn work_name(&self) -> &str {
        self.work_name
    }

    pub async fn run<F, T, E>(self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: WorkFailure,
    {
        let pending = self.pending();
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        self.finish(pending, outcome)
    }

    pub fn run_blocking<F, T, E>(self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: WorkFailure,
    {
        let pending = self.pending();
        let outcome = panic::catch_unwind(AssertUnwindSafe(work));
        self.finish(pending, outcome)
    }

    fn pending(&self) -> PendingRecord<'a> {
        PendingRecord {
            monitor: self.monitor,
            work_name: self.work_name,
            started: Instant::now(),
            armed: true,
        }
    }

    fn finish<T, E>(
        self,
        pending: PendingRecord<'_>,
        outcome: std::thread::Result<Result<T, E>>,
    ) -> Result<T, E>
    where
        E: WorkFailure,
    {
        match outcome {
            Ok(Ok(value)) => {
                pending.settle(true);
                Ok(value)
            }
            Ok(Err(err)) => {
                pending.settle(false);
                if err.is_interrupted() {
                    if let Some(token) = self.interrupt {
                        token.cancel();
                    }
                }
                Err(err)
            }
            Err(payload) => {
                pending.settle(false);
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Outcome owed to the monitor by one running invocation.
///
/// Settled once the work returns. Dropping it unsettled, which is what
/// happens when the enclosing future is dropped mid-flight, records an
/// error.
struct PendingRecord<'a> {
    monitor: &'a WorkMonitor,
    work_name: &'a str,
    started: Instant,
    armed: bool,
}

impl PendingRecord<'_> {
    fn settle(mut self, ok: bool) {
        self.armed = false;
        self.record(ok);
    }

    fn record(&self, ok: bool) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        // The name was validated at construction, so recording cannot fail.
        let _ = if ok {
            self.monitor.record_work_ok(self.work_name, elapsed)
        } else {
            self.monitor.record_work_error(self.work_name, elapsed)
        };
    }
}

impl Drop for PendingRecord<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(work = %self.work_name, "Monitored work dropped before completion");
            self.record(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        let monitor = WorkMonitor::new("svc");
        assert_eq!(
            MonitoredWork::new(&monitor, "").unwrap_err(),
            WorkError::EmptyWorkName
        );
    }

    #[test]
    fn test_blocking_ok_and_error_recorded_once() {
        let monitor = WorkMonitor::new("svc");

        let value = MonitoredWork::new(&monitor, "parse")
            .unwrap()
            .run_blocking(|| Ok::<_, std::io::Error>(42))
            .unwrap();
        assert_eq!(value, 42);

        let err = MonitoredWork::new(&monitor, "parse")
            .unwrap()
            .run_blocking(|| Err::<(), _>(std::io::Error::other("boom")))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let record = monitor.current().work_record("parse").unwrap();
        assert_eq!(record.ok_count, 1);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test]
    async fn test_async_duration_measured() {
        let monitor = WorkMonitor::new("svc");
        MonitoredWork::new(&monitor, "sleep")
            .unwrap()
            .run(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, ServiceError>(())
            })
            .await
            .unwrap();

        let record = monitor.current().work_record("sleep").unwrap();
        assert_eq!(record.ok_count, 1);
        assert!(record.ok_duration >= 30);
    }

    #[tokio::test]
    async fn test_unnamed_work_shares_bucket() {
        let monitor = WorkMonitor::new("svc");
        for _ in 0..2 {
            MonitoredWork::unnamed(&monitor)
                .run(async { Ok::<_, anyhow::Error>(()) })
                .await
                .unwrap();
        }
        assert_eq!(monitor.current().work_record_names(), vec![NO_NAME]);
        assert_eq!(monitor.current().work_record(NO_NAME).unwrap().ok_count, 2);
    }

    #[tokio::test]
    async fn test_interruption_resignalled() {
        let monitor = WorkMonitor::new("svc");
        let token = CancellationToken::new();

        let err = MonitoredWork::new(&monitor, "wait")
            .unwrap()
            .interrupt_token(&token)
            .run(async { Err::<(), _>(ServiceError::Interrupted) })
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Interrupted));
        assert!(token.is_cancelled());
        assert_eq!(monitor.current().work_record("wait").unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn test_plain_error_leaves_token_alone() {
        let monitor = WorkMonitor::new("svc");
        let token = CancellationToken::new();
        let _ = MonitoredWork::new(&monitor, "fail")
            .unwrap()
            .interrupt_token(&token)
            .run(async { Err::<(), _>(anyhow::anyhow!("nope")) })
            .await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_anyhow_interruption_detected() {
        let err = anyhow::Error::from(ServiceError::Interrupted);
        assert!(err.is_interrupted());
        let err = anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::Interrupted));
        assert!(err.is_interrupted());
        assert!(!anyhow::anyhow!("other").is_interrupted());
    }

    #[test]
    fn test_panic_recorded_then_resumed() {
        let monitor = WorkMonitor::new("svc");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            MonitoredWork::new(&monitor, "explode")
                .unwrap()
                .run_blocking(|| -> Result<(), ServiceError> { panic!("kaboom") })
        }));
        assert!(result.is_err());
        let record = monitor.current().work_record("explode").unwrap();
        assert_eq!(record.ok_count, 0);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test]
    async fn test_dropped_work_recorded_as_error() {
        let monitor = WorkMonitor::new("svc");
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let work = MonitoredWork::new(&monitor, "slow").unwrap().run(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        });
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = work => panic!("work should have been dropped"),
        }

        let record = monitor.current().work_record("slow").unwrap();
        assert_eq!(record.ok_count, 0);
        assert_eq!(record.error_count, 1);
        assert!(record.error_duration >= 40);
    }

    #[tokio::test]
    async fn test_completed_work_not_recorded_twice() {
        let monitor = WorkMonitor::new("svc");
        let work = MonitoredWork::new(&monitor, "quick")
            .unwrap()
            .run(async { Ok::<_, ServiceError>(()) });
        work.await.unwrap();
        let record = monitor.current().work_record("quick").unwrap();
        assert_eq!(record.ok_count, 1);
        assert_eq!(record.error_count, 0);
    }
}
