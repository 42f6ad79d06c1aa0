// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Include/exclude filtering of telemetry by name.
//!
//! Filters are written as a comma separated list of `INCLUDE:<regex>` and
//! `EXCLUDE:<regex>` entries. The first entry whose regex matches the whole
//! name decides; names matching no entry are included.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::error;

use super::{TelemetryInfo, TelemetrySink};

#[derive(Debug, Clone)]
struct Rule {
    include: bool,
    pattern: Regex,
}

/// Ordered include/exclude rules over telemetry names.
#[derive(Debug, Clone, Default)]
pub struct TelemetryNameFilter {
    rules: Vec<Rule>,
}

impl TelemetryNameFilter {
    /// Parses a filter definition. Malformed entries are logged and skipped.
    pub fn parse(definition: &str) -> Self {
        let rules = definition
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(parse_rule)
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(name))
            .is_none_or(|rule| rule.include)
    }
}

fn parse_rule(entry: &str) -> Option<Rule> {
    let (kind, pattern) = match entry.split_once(':') {
        Some(parts) => parts,
        None => {
            error!(entry, "Telemetry filter entry missing INCLUDE:/EXCLUDE: prefix");
            return None;
        }
    };
    let include = match kind.trim() {
        kind if kind.eq_ignore_ascii_case("INCLUDE") => true,
        kind if kind.eq_ignore_ascii_case("EXCLUDE") => false,
        other => {
            error!(entry, kind = other, "Unknown telemetry filter kind");
            return None;
        }
    };
    match Regex::new(&format!("^(?:{})$", pattern.trim())) {
        Ok(pattern) => Some(Rule { include, pattern }),
        Err(err) => {
            error!(entry, error = %err, "Invalid telemetry filter pattern");
            None
        }
    }
}

/// Forwards only the telemetry accepted by a [`TelemetryNameFilter`].
pub struct FilteringSink {
    filter: TelemetryNameFilter,
    inner: Arc<dyn TelemetrySink>,
}

impl FilteringSink {
    pub fn new(filter: TelemetryNameFilter, inner: Arc<dyn TelemetrySink>) -> Self {
        Self { filter, inner }
    }
}

#[async_trait]
impl TelemetrySink for FilteringSink {
    async fn publish(&self, info: &TelemetryInfo) {
        if self.filter.accepts(info.name()) {
            self.inner.publish(info).await;
        }
    }
}
