// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named background task with cooperative shutdown and a bounded join.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A background task that can be asked to stop and then waited for.
///
/// The task body receives a shutdown token and is expected to return
/// promptly once it is cancelled. Exit is observed through a second token
/// that is cancelled when the body returns or panics.
#[derive(Debug)]
pub struct StoppableTask {
    name: String,
    shutdown: CancellationToken,
    exited: CancellationToken,
}

impl StoppableTask {
    /// Creates the task without running it.
    pub fn new(name: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self {
            name: name.into(),
            shutdown,
            exited: CancellationToken::new(),
        }
    }

    /// Creates the task and runs it on the current runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, shutdown: CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Self::new(name, shutdown);
        task.start_on(&Handle::current(), body);
        task
    }

    /// Runs the body on `runtime`. Must be called at most once.
    pub fn start_on<F, Fut>(&self, runtime: &Handle, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = self.name.clone();
        let exited = self.exited.clone().drop_guard();
        let body = body(self.shutdown.clone());
        runtime.spawn(async move {
            let _exited = exited;
            info!(task = %name, "Task starting");
            body.await;
            info!(task = %name, "Task exiting");
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Whether the body has returned.
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Requests shutdown and waits up to `max_wait` for the body to return.
    ///
    /// Returns `false` if the task was still running when the wait ended.
    pub async fn shutdown(&self, max_wait: Duration) -> bool {
        self.shutdown.cancel();
        if tokio::time::timeout(max_wait, self.exited.cancelled())
            .await
            .is_err()
        {
            error!(
                task = %self.name,
                max_wait_ms = max_wait.as_millis() as u64,
                "Task did not exit in time"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_exit() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let task = StoppableTask::spawn("worker", CancellationToken::new(), |token| async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!task.is_shutdown());
        assert!(task.shutdown(Duration::from_secs(5)).await);
        assert!(task.is_shutdown());
        assert!(task.has_exited());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_bounded() {
        let task = StoppableTask::spawn("stubborn", CancellationToken::new(), |_token| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(!task.shutdown(Duration::from_millis(50)).await);
        assert!(!task.has_exited());
    }

    #[tokio::test]
    async fn test_panicking_body_counts_as_exited() {
        let task = StoppableTask::spawn("faulty", CancellationToken::new(), |_token| async move {
            panic!("task failure");
        });
        assert!(task.shutdown(Duration::from_secs(5)).await);
        assert!(task.has_exited());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = CancellationToken::new();
        let task = StoppableTask::spawn("child", parent.child_token(), |token| async move {
            token.cancelled().await;
        });
        parent.cancel();
        assert!(task.is_shutdown());
        assert!(task.shutdown(Duration::from_secs(5)).await);
    }
}
