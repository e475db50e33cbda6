//! Relay orchestrator - wires sources, fan-out and sink writers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::RelayBlueprint;
use ingestion::{
    IngestionMetrics, PollAgent, PollAgentConfig, StreamClient, StreamClientConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{RelayStats, TaskGroup};
use crate::error::{CliError, Result};

/// Which sources a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// One websocket client subscribed to every stream datasource
    Stream,
    /// One poll agent per poll datasource
    Poll,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
        }
    }

    /// Number of datasources this mode would run
    pub fn source_count(self, blueprint: &RelayBlueprint) -> usize {
        match self {
            Self::Stream => blueprint.stream_sources().count(),
            Self::Poll => blueprint.poll_sources().count(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Validated configuration, CLI overrides applied
    pub blueprint: RelayBlueprint,

    pub mode: RelayMode,

    /// Backoff between websocket sessions
    pub reconnect_delay: Duration,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main relay orchestrator
pub struct Relay {
    config: RelayConfig,
}

impl Relay {
    /// Create a new relay with the given configuration
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Run until `cancel` fires, then stop every task and collect statistics
    #[instrument(name = "relay_run", skip_all, fields(mode = self.config.mode.as_str()))]
    pub async fn run(self, cancel: CancellationToken) -> Result<RelayStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;
        let mode = self.config.mode;

        if blueprint.mist.api_key.is_empty() {
            return Err(CliError::MissingApiKey);
        }
        if mode.source_count(blueprint) == 0 {
            return Err(CliError::NoSources {
                mode: mode.as_str(),
            });
        }

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let dispatcher = dispatcher::create_dispatcher(blueprint, cancel.clone()).await?;
        let sink_metrics = dispatcher.sink_metrics();
        let source_metrics = Arc::new(IngestionMetrics::new());

        let mut tasks = TaskGroup::new(cancel.clone());
        let started = match mode {
            RelayMode::Stream => self.spawn_stream(&dispatcher, &source_metrics, &mut tasks),
            RelayMode::Poll => self.spawn_pollers(&dispatcher, &source_metrics, &mut tasks),
        };
        let active_sources = tasks.len();

        // Sources are joined before writers so no fan-out outlives its queues
        for (name, handle) in dispatcher.into_tasks() {
            tasks.adopt(format!("sink:{name}"), handle);
        }

        if let Err(e) = started {
            tasks.shutdown().await;
            return Err(e);
        }

        info!(
            sources = active_sources,
            sinks = sink_metrics.len(),
            "Relay running"
        );
        cancel.cancelled().await;
        info!("Shutdown requested, stopping relay");

        let panicked = tasks.shutdown().await;
        if !panicked.is_empty() {
            warn!(tasks = ?panicked, "Some tasks panicked");
            return Err(CliError::shutdown(format!(
                "tasks panicked: {}",
                panicked.join(", ")
            )));
        }

        Ok(RelayStats {
            duration: start_time.elapsed(),
            sources: source_metrics.snapshot(),
            active_sources,
            sinks: sink_metrics
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
                .collect(),
        })
    }

    fn spawn_stream(
        &self,
        dispatcher: &dispatcher::Dispatcher,
        metrics: &Arc<IngestionMetrics>,
        tasks: &mut TaskGroup,
    ) -> Result<()> {
        let blueprint = &self.config.blueprint;
        let subscriptions: Vec<String> = blueprint
            .stream_sources()
            .map(|ds| ds.stream.clone())
            .collect();

        let config = StreamClientConfig::new(
            &blueprint.mist.endpoint,
            &blueprint.mist.api_key,
            subscriptions,
        )
        .with_reconnect_delay(self.config.reconnect_delay);
        let client = StreamClient::new(config, dispatcher.fanout(Arc::clone(metrics)))?;

        info!(url = %client.url(), "Starting stream client");
        tasks.spawn("stream", move |cancel| client.run(cancel));
        Ok(())
    }

    fn spawn_pollers(
        &self,
        dispatcher: &dispatcher::Dispatcher,
        metrics: &Arc<IngestionMetrics>,
        tasks: &mut TaskGroup,
    ) -> Result<()> {
        let blueprint = &self.config.blueprint;
        for ds in blueprint.poll_sources() {
            let config = PollAgentConfig {
                endpoint: blueprint.mist.endpoint.clone(),
                api_key: blueprint.mist.api_key.clone(),
                uri: ds.stream.clone(),
                layout: ds.layout,
                interval: Duration::from_secs(ds.interval_secs),
                unique_key: ds.unique_key.clone(),
                watch_keys: ds.watch_keys.clone(),
            };
            let agent = PollAgent::new(config, dispatcher.fanout(Arc::clone(metrics)))?;

            info!(url = %agent.url(), interval_secs = ds.interval_secs, "Starting poll agent");
            tasks.spawn(format!("poll:{}", ds.stream), move |cancel| agent.run(cancel));
        }
        Ok(())
    }
}
