// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service lifecycle with graceful shutdown.
//!
//! Every long-lived component embeds a [`ServiceLifecycle`] and implements
//! [`Service`]. The lifecycle owns:
//!
//! - the state machine (see [`ServiceState`]), linearized through a
//!   `watch` channel so concurrent callers can wait for transient states
//!   to settle
//! - a per-start shutdown token; cancelling it interrupts graceful work and
//!   background tasks
//! - the in-flight counter used to drain graceful work on stop
//! - the component's [`WorkMonitor`] and the publishers it is registered with
//! - sub-services, stopped in reverse start order
//! - the listeners told when the service needs operator intervention

mod graceful;
mod service;
mod state;
mod task;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::FutureExt;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use service::Service;
pub use state::ServiceState;
pub use task::StoppableTask;

use crate::error::ServiceError;
use crate::intervene::InterventionListener;
use crate::publish::WorkPublisher;
use crate::work::WorkMonitor;
use graceful::{InFlight, InFlightGuard};

/// Default upper bound on waiting for a background task to exit.
pub const DEFAULT_TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state and resources shared by a [`Service`] implementation.
pub struct ServiceLifecycle {
    name: String,
    state: watch::Sender<ServiceState>,
    in_flight: Arc<InFlight>,
    shutdown: ArcSwap<CancellationToken>,
    tasks: Mutex<Vec<StoppableTask>>,
    sub_services: Mutex<Vec<Arc<dyn Service>>>,
    work_monitor: Arc<WorkMonitor>,
    work_publishers: Mutex<Vec<Arc<dyn WorkPublisher>>>,
    intervention_listeners: ArcSwap<Vec<Arc<dyn InterventionListener>>>,
    task_join_timeout: Duration,
}

impl fmt::Debug for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight.count())
            .finish_non_exhaustive()
    }
}

impl ServiceLifecycle {
    /// Creates a stopped lifecycle. `name` doubles as the work monitor's source name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (state, _) = watch::channel(ServiceState::Stopped);
        Self {
            work_monitor: Arc::new(WorkMonitor::new(name.clone())),
            name,
            state,
            in_flight: Arc::new(InFlight::default()),
            shutdown: ArcSwap::from_pointee(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            sub_services: Mutex::new(Vec::new()),
            work_publishers: Mutex::new(Vec::new()),
            intervention_listeners: ArcSwap::from_pointee(Vec::new()),
            task_join_timeout: DEFAULT_TASK_JOIN_TIMEOUT,
        }
    }

    pub fn with_task_join_timeout(mut self, timeout: Duration) -> Self {
        self.task_join_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Started
    }

    /// Receiver observing every state change.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn work_monitor(&self) -> &Arc<WorkMonitor> {
        &self.work_monitor
    }

    /// Token cancelled when the current run of the service stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        CancellationToken::clone(&self.shutdown.load())
    }

    /// Graceful work currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Drives STOPPED -> STARTING -> STARTED, running `service.on_start()`.
    ///
    /// Returns immediately when already started. Waits for a concurrent
    /// start or stop to settle first.
    pub async fn start<S: Service + ?Sized>(&self, service: &S) -> Result<(), ServiceError> {
        let mut states = self.state.subscribe();
        loop {
            match self.try_transition(ServiceState::Stopped, ServiceState::Starting) {
                Ok(()) => break,
                Err(ServiceState::Started) => return Ok(()),
                Err(ServiceState::Starting) => {
                    return match self.wait_while(&mut states, ServiceState::Starting).await {
                        ServiceState::Started => Ok(()),
                        _ => Err(ServiceError::ConcurrentStartFailed(self.name.clone())),
                    };
                }
                Err(ServiceState::Stopping) => {
                    self.wait_while(&mut states, ServiceState::Stopping).await;
                }
                Err(ServiceState::Stopped) => {}
            }
        }

        self.shutdown.store(Arc::new(CancellationToken::new()));
        match AssertUnwindSafe(self.run_start(service)).catch_unwind().await {
            Ok(Ok(())) => {
                self.transition(ServiceState::Starting, ServiceState::Started)?;
                info!(service = %self.name, "Service started");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(service = %self.name, error = %err, "Service failed to start");
                self.clean_partial_start().await;
                Err(err)
            }
            Err(payload) => {
                error!(service = %self.name, "Service panicked while starting");
                self.clean_partial_start().await;
                panic::resume_unwind(payload)
            }
        }
    }

    /// Drives STARTED -> STOPPING -> STOPPED.
    ///
    /// In order: waits up to `grace` for in-flight graceful work, cancels
    /// the shutdown token, joins the service's tasks, runs
    /// `service.on_stop()`, stops sub-services and deregisters the work
    /// monitor. The service ends STOPPED even when a step fails; the first
    /// failure is returned.
    pub async fn stop<S: Service + ?Sized>(
        &self,
        service: &S,
        grace: Duration,
    ) -> Result<(), ServiceError> {
        let mut states = self.state.subscribe();
        loop {
            match self.try_transition(ServiceState::Started, ServiceState::Stopping) {
                Ok(()) => break,
                Err(ServiceState::Stopped) => return Ok(()),
                Err(ServiceState::Stopping) => {
                    self.wait_while(&mut states, ServiceState::Stopping).await;
                    return Ok(());
                }
                Err(ServiceState::Starting) => {
                    self.wait_while(&mut states, ServiceState::Starting).await;
                }
                Err(ServiceState::Started) => {}
            }
        }

        self.drain(grace).await;
        self.shutdown.load().cancel();
        self.shutdown_tasks().await;

        let mut first_error = None;
        let mut panic_payload = None;
        match AssertUnwindSafe(service.on_stop()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(service = %self.name, error = %err, "Service stop hook failed");
                first_error = Some(err);
            }
            Err(payload) => {
                error!(service = %self.name, "Service panicked while stopping");
                panic_payload = Some(payload);
            }
        }
        if let Err(err) = self.stop_sub_services().await {
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
        self.deregister_with_work_publishers().await;

        if let Err(err) = self.transition(ServiceState::Stopping, ServiceState::Stopped) {
            error!(service = %self.name, error = %err, "Failed to mark service stopped");
        }
        info!(service = %self.name, "Service stopped");

        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Runs `work` as graceful-shutdown work.
    ///
    /// Refused with [`ServiceError::NotRunning`] unless the service is
    /// STARTED. A stop waits for the work up to its grace period; after
    /// that the work is dropped at its next await point and the call
    /// returns [`ServiceError::Interrupted`].
    pub async fn graceful<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ServiceError>,
    {
        let (_guard, token) = self.enter_graceful()?;
        tokio::select! {
            biased;

            result = work => result,

            _ = token.cancelled() => {
                debug!(service = %self.name, "Graceful work interrupted");
                Err(ServiceError::Interrupted.into())
            }
        }
    }

    /// Spawns a background task owned by the current run of the service.
    ///
    /// The task's token is cancelled on stop, and stop waits (bounded) for
    /// the task to return.
    pub async fn spawn_task<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = StoppableTask::spawn(name, self.shutdown.load().child_token(), body);
        self.tasks.lock().await.push(task);
    }

    /// Starts `service` and stops it together with this one.
    pub async fn start_sub_service(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        service.start().await?;
        debug!(service = %self.name, sub_service = %service.name(), "Sub-service started");
        self.sub_services.lock().await.push(service);
        Ok(())
    }

    /// Replaces the set of publishers this service's work monitor is
    /// registered with. While running, the difference is applied at once.
    pub async fn set_work_publishers(
        &self,
        publishers: Vec<Arc<dyn WorkPublisher>>,
    ) -> Result<(), ServiceError> {
        let mut current = self.work_publishers.lock().await;
        if self.is_running() {
            for old in current.iter() {
                if !publishers.iter().any(|p| same_publisher(p, old)) {
                    old.deregister_work_monitor(&self.work_monitor).await?;
                }
            }
            for new in publishers.iter() {
                if !current.iter().any(|p| same_publisher(p, new)) {
                    new.register_work_monitor(Arc::clone(&self.work_monitor))
                        .await?;
                }
            }
        }
        *current = publishers;
        Ok(())
    }

    pub fn set_intervention_listeners(&self, listeners: Vec<Arc<dyn InterventionListener>>) {
        self.intervention_listeners.store(Arc::new(listeners));
    }

    /// Logs `message` and forwards it to every intervention listener.
    pub fn record_intervention_request(&self, message: &str) {
        error!(service = %self.name, request = message, "Intervention requested");
        for listener in self.intervention_listeners.load().iter() {
            listener.record_intervention_request(&self.name, message);
        }
    }

    fn try_transition(&self, from: ServiceState, to: ServiceState) -> Result<(), ServiceState> {
        let mut observed = from;
        let changed = self.state.send_if_modified(|state| {
            observed = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(service = %self.name, %from, %to, "Service state changed");
            Ok(())
        } else {
            Err(observed)
        }
    }

    fn transition(&self, from: ServiceState, to: ServiceState) -> Result<(), ServiceError> {
        if !from.can_transition_to(to) {
            return Err(self.invalid_transition(from, to));
        }
        self.try_transition(from, to)
            .map_err(|actual| self.invalid_transition(actual, to))
    }

    fn invalid_transition(&self, from: ServiceState, to: ServiceState) -> ServiceError {
        ServiceError::InvalidTransition {
            service: self.name.clone(),
            from,
            to,
        }
    }

    async fn wait_while(
        &self,
        states: &mut watch::Receiver<ServiceState>,
        transient: ServiceState,
    ) -> ServiceState {
        match states.wait_for(|state| *state != transient).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn enter_graceful(&self) -> Result<(InFlightGuard, CancellationToken), ServiceError> {
        // Holding the state borrow orders this check against the STARTED ->
        // STOPPING transition, so a stop never misses counted work.
        let state = self.state.borrow();
        if *state != ServiceState::Started {
            return Err(ServiceError::NotRunning {
                service: self.name.clone(),
                state: *state,
            });
        }
        Ok((self.in_flight.enter(), self.shutdown_token()))
    }

    async fn run_start<S: Service + ?Sized>(&self, service: &S) -> Result<(), ServiceError> {
        self.register_with_work_publishers().await?;
        service.on_start().await
    }

    async fn drain(&self, grace: Duration) {
        let pending = self.in_flight.count();
        if pending == 0 || grace.is_zero() {
            return;
        }
        info!(
            service = %self.name,
            pending,
            grace_ms = grace.as_millis() as u64,
            "Waiting for in-flight work"
        );
        if tokio::time::timeout(grace, self.in_flight.wait_drained())
            .await
            .is_err()
        {
            warn!(
                service = %self.name,
                pending = self.in_flight.count(),
                "Grace period elapsed, interrupting in-flight work"
            );
        }
    }

    async fn shutdown_tasks(&self) {
        // Tokens are children of the cancelled run token, so all tasks are
        // already winding down while we wait on each in turn.
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks.iter().rev() {
            if !task.shutdown(self.task_join_timeout).await {
                self.record_intervention_request(&format!(
                    "task '{}' still running {}ms after shutdown",
                    task.name(),
                    self.task_join_timeout.as_millis()
                ));
            }
        }
    }

    async fn stop_sub_services(&self) -> Result<(), ServiceError> {
        let services = std::mem::take(&mut *self.sub_services.lock().await);
        let mut first_error = None;
        for service in services.iter().rev() {
            if let Err(err) = service.stop_immediate().await {
                error!(
                    service = %self.name,
                    sub_service = %service.name(),
                    error = %err,
                    "Failed to stop sub-service"
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn clean_partial_start(&self) {
        self.shutdown.load().cancel();
        self.shutdown_tasks().await;
        if let Err(err) = self.stop_sub_services().await {
            warn!(service = %self.name, error = %err, "Sub-service cleanup failed");
        }
        self.deregister_with_work_publishers().await;
        if let Err(err) = self.transition(ServiceState::Starting, ServiceState::Stopped) {
            error!(service = %self.name, error = %err, "Failed to reset service state");
        }
    }

    async fn register_with_work_publishers(&self) -> Result<(), ServiceError> {
        let publishers = self.work_publishers.lock().await.clone();
        for publisher in &publishers {
            publisher
                .register_work_monitor(Arc::clone(&self.work_monitor))
                .await?;
        }
        Ok(())
    }

    async fn deregister_with_work_publishers(&self) {
        let publishers = self.work_publishers.lock().await.clone();
        for publisher in &publishers {
            if let Err(err) = publisher.deregister_work_monitor(&self.work_monitor).await {
                warn!(service = %self.name, error = %err, "Failed to deregister work monitor");
            }
        }
    }
}

fn same_publisher(a: &Arc<dyn WorkPublisher>, b: &Arc<dyn WorkPublisher>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
