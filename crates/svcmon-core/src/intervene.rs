// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Requests for operator intervention.
//!
//! A service that reaches a state it cannot recover from on its own (a
//! leaked resource, a task that will not exit) reports it through
//! [`ServiceLifecycle::record_intervention_request`], which fans the
//! message out to the registered [`InterventionListener`]s.
//!
//! [`ServiceLifecycle::record_intervention_request`]: crate::lifecycle::ServiceLifecycle::record_intervention_request

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Receives intervention requests raised by services.
pub trait InterventionListener: Send + Sync {
    /// `source` is the name of the service that raised the request.
    fn record_intervention_request(&self, source: &str, message: &str);
}

/// Logs each intervention request at warn level.
#[derive(Debug)]
pub struct LoggingInterventionListener {
    enabled: AtomicBool,
}

impl Default for LoggingInterventionListener {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingInterventionListener {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl InterventionListener for LoggingInterventionListener {
    fn record_intervention_request(&self, source: &str, message: &str) {
        if self.is_enabled() {
            warn!(target: "svcmon::intervention", source, request = message, "Intervention required");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_by_default() {
        let listener = LoggingInterventionListener::default();
        assert!(listener.is_enabled());
        listener.record_intervention_request("svc", "intervention required");

        listener.set_enabled(false);
        assert!(!listener.is_enabled());
        listener.record_intervention_request("svc", "intervention required");
    }
}
