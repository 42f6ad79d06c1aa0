// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Telemetry built from published work records.
//!
//! [`WorkRecordTelemetryProcessor`] turns every record of a rolled
//! collection into a [`TelemetryInfo`] named `<source>.<work>` and hands
//! it to each configured [`TelemetrySink`]. Slow sinks can be put behind
//! an [`AsyncTelemetrySink`] so publish cycles never wait on them.

mod async_sink;
mod filter;
mod sinks;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

pub use async_sink::{
    AsyncTelemetrySink, AsyncTelemetrySinkConfig, QueueFullPolicy, ShutdownBehavior,
};
pub use filter::{FilteringSink, TelemetryNameFilter};
pub use sinks::{GraphiteSink, JsonLogSink, DEFAULT_GRAPHITE_PORT};

use crate::error::TelemetryError;
use crate::publish::WorkRecordCollectionProcessor;
use crate::work::{NO_NAME, WorkRecord, WorkRecordCollection};

const NAME_ATTR: &str = "name";
const CREATED_AT_ATTR: &str = "createdAt";

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TelemetryValue {
    /// Numeric values are the ones time-series sinks can store.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, TelemetryValue::Text(_))
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Int(value) => write!(f, "{value}"),
            TelemetryValue::Float(value) => write!(f, "{value}"),
            TelemetryValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<u32> for TelemetryValue {
    fn from(value: u32) -> Self {
        TelemetryValue::Int(i64::from(value))
    }
}

impl From<u64> for TelemetryValue {
    fn from(value: u64) -> Self {
        TelemetryValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<i64> for TelemetryValue {
    fn from(value: i64) -> Self {
        TelemetryValue::Int(value)
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        TelemetryValue::Float(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        TelemetryValue::Text(value.to_string())
    }
}

/// A named set of attributes captured at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryInfo {
    name: String,
    created_at: u64,
    attributes: BTreeMap<String, TelemetryValue>,
}

impl TelemetryInfo {
    /// `created_at` is in milliseconds since the Unix epoch.
    pub fn new(name: impl Into<String>, created_at: u64) -> Self {
        Self {
            name: name.into(),
            created_at,
            attributes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<TelemetryValue>,
    ) -> Result<(), TelemetryError> {
        let key = key.into();
        if key == NAME_ATTR || key == CREATED_AT_ATTR {
            return Err(TelemetryError::ReservedAttribute(key));
        }
        self.attributes.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.attributes.get(key)
    }

    /// Attributes sorted by key.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &TelemetryValue)> {
        self.attributes.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Builds the telemetry for one work record of `source_name`.
    pub fn from_work_record(source_name: &str, created_at: u64, record: &WorkRecord) -> Self {
        let name = if record.work_name == NO_NAME {
            source_name.to_string()
        } else {
            format!("{source_name}.{}", record.work_name)
        };
        let attributes: BTreeMap<String, TelemetryValue> = BTreeMap::from([
            ("okCount".to_string(), record.ok_count.into()),
            ("okDuration".to_string(), record.ok_duration.into()),
            ("okAvgDuration".to_string(), record.ok_avg_duration().into()),
            ("errorCount".to_string(), record.error_count.into()),
            ("errorDuration".to_string(), record.error_duration.into()),
            (
                "errorAvgDuration".to_string(),
                record.error_avg_duration().into(),
            ),
        ]);
        Self {
            name,
            created_at,
            attributes,
        }
    }
}

impl Serialize for TelemetryInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + 2))?;
        map.serialize_entry(NAME_ATTR, &self.name)?;
        map.serialize_entry(CREATED_AT_ATTR, &self.created_at)?;
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Destination for telemetry.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, info: &TelemetryInfo);
}

/// Publishes every work record of each rolled collection to the sinks.
pub struct WorkRecordTelemetryProcessor {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl WorkRecordTelemetryProcessor {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl WorkRecordCollectionProcessor for WorkRecordTelemetryProcessor {
    async fn process(&self, timestamp: u64, collection: &WorkRecordCollection) {
        for record in collection.work_records() {
            let info = TelemetryInfo::from_work_record(collection.source_name(), timestamp, &record);
            for sink in &self.sinks {
                sink.publish(&info).await;
            }
        }
    }
}
