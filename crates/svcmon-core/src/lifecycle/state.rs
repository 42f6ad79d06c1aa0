// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service states and the transitions allowed between them.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a long-lived component.
///
/// ```text
/// STOPPED ──► STARTING ──► STARTED ──► STOPPING ──► STOPPED
///                 │                                   ▲
///                 └──────────── (failed start) ───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ServiceState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        matches!(
            (self, next),
            (ServiceState::Stopped, ServiceState::Starting)
                | (ServiceState::Starting, ServiceState::Started)
                | (ServiceState::Starting, ServiceState::Stopped)
                | (ServiceState::Started, ServiceState::Stopping)
                | (ServiceState::Stopping, ServiceState::Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Stopped => "STOPPED",
            ServiceState::Starting => "STARTING",
            ServiceState::Started => "STARTED",
            ServiceState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
