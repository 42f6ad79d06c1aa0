// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! svcmon - work telemetry publisher
//!
//! Runs a work publisher with JSON-log and (optionally) Graphite sinks
//! behind a telemetry queue, and a heartbeat component whose work records
//! are published every cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use svcmon_core::config::Config;
use svcmon_core::intervene::{InterventionListener, LoggingInterventionListener};
use svcmon_core::lifecycle::{Service, ServiceLifecycle};
use svcmon_core::publish::{WorkPublishService, WorkPublishServiceConfig, WorkPublisher};
use svcmon_core::telemetry::{
    AsyncTelemetrySink, AsyncTelemetrySinkConfig, FilteringSink, GraphiteSink, JsonLogSink,
    TelemetryNameFilter, TelemetrySink, WorkRecordTelemetryProcessor,
};
use svcmon_core::work::MonitoredWork;
use svcmon_core::ServiceError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Records one `heartbeat` work entry per second.
struct Heartbeat {
    lifecycle: ServiceLifecycle,
}

#[async_trait]
impl Service for Heartbeat {
    fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }

    async fn on_start(&self) -> Result<(), ServiceError> {
        let monitor = Arc::clone(self.work_monitor());
        self.lifecycle
            .spawn_task("heartbeat", move |shutdown| async move {
                let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,

                        _ = ticker.tick() => {
                            let beat = MonitoredWork::new(&monitor, "heartbeat")
                                .map_err(ServiceError::from)
                                .and_then(|work| work.run_blocking(|| Ok(())));
                            if let Err(e) = beat {
                                warn!(error = %e, "Failed to record heartbeat");
                            }
                        }
                    }
                }
            })
            .await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "svcmon=info,svcmon_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        source = %config.source_name,
        publish_periodicity_secs = config.publish_periodicity.as_secs(),
        graphite_host = %config.graphite_host,
        graphite_port = config.graphite_port,
        "Starting svcmon"
    );

    // Telemetry sinks
    let mut sinks: Vec<Arc<dyn TelemetrySink>> = vec![Arc::new(JsonLogSink)];
    let graphite = if config.graphite_enabled() {
        let graphite = Arc::new(GraphiteSink::new(
            config.graphite_host.clone(),
            config.graphite_port,
            config.reconnect_periodicity,
        )?);
        graphite.start()?;
        sinks.push(graphite.clone());
        Some(graphite)
    } else {
        None
    };

    let filter = TelemetryNameFilter::parse(&config.telemetry_filter);
    if !filter.is_empty() {
        sinks = sinks
            .into_iter()
            .map(|sink| Arc::new(FilteringSink::new(filter.clone(), sink)) as Arc<dyn TelemetrySink>)
            .collect();
    }

    let interventions: Vec<Arc<dyn InterventionListener>> =
        vec![Arc::new(LoggingInterventionListener::new())];

    // Publish cycles hand telemetry to the queue, never to the sinks directly
    let telemetry_queue = Arc::new(AsyncTelemetrySink::new(
        sinks,
        AsyncTelemetrySinkConfig {
            max_capacity: config.telemetry_queue_capacity,
            ..AsyncTelemetrySinkConfig::default()
        },
    )?);
    telemetry_queue
        .lifecycle()
        .set_intervention_listeners(interventions.clone());
    telemetry_queue.start().await?;

    let publisher = Arc::new(WorkPublishService::new(WorkPublishServiceConfig {
        publish_periodicity: config.publish_periodicity,
        enabled: config.publish_enabled,
    })?);
    publisher
        .lifecycle()
        .set_intervention_listeners(interventions.clone());
    publisher.set_processors(vec![Arc::new(WorkRecordTelemetryProcessor::new(vec![
        telemetry_queue.clone(),
    ]))]);

    let heartbeat = Heartbeat {
        lifecycle: ServiceLifecycle::new(config.source_name.clone()),
    };
    heartbeat
        .lifecycle()
        .set_intervention_listeners(interventions);
    heartbeat
        .lifecycle()
        .set_work_publishers(vec![publisher.clone() as Arc<dyn WorkPublisher>])
        .await?;
    heartbeat.start().await?;

    info!("svcmon ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    heartbeat.stop(config.stop_grace_period).await?;
    publisher.stop(config.stop_grace_period).await?;
    telemetry_queue.stop(config.stop_grace_period).await?;
    if let Some(graphite) = graphite {
        graphite.stop().await;
    }

    info!("svcmon shut down");

    Ok(())
}
