//! Dispatcher - builds one queue and one writer per configured sink

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use contracts::{Record, RelayBlueprint, RouteTable, SinkConfig, SinkDriver};
use ingestion::{downstream_queue, DownstreamQueue, FanOut, IngestionMetrics};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::sinks::{FileSink, InfluxSink, LogSink};

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<'a> {
    blueprint: &'a RelayBlueprint,
    cancel: CancellationToken,
}

impl<'a> DispatcherBuilder<'a> {
    /// Create a new DispatcherBuilder
    pub fn new(blueprint: &'a RelayBlueprint, cancel: CancellationToken) -> Self {
        Self { blueprint, cancel }
    }

    /// Build every sink and start its writer
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(sink_count = self.blueprint.sinks.len())
    )]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.blueprint.sinks.len());
        let mut queues = Vec::with_capacity(self.blueprint.sinks.len());

        for sink_config in &self.blueprint.sinks {
            let routes = self.blueprint.route_table(sink_config.kind)?;
            let (queue, rx) = downstream_queue(
                sink_config.name.as_str(),
                sink_config.queue_capacity,
                sink_config.overflow,
            );
            let handle = create_sink_handle(sink_config, routes, rx, self.cancel.clone()).await?;
            handles.push(handle);
            queues.push(queue);
        }

        info!(sinks = handles.len(), "Dispatcher started");
        Ok(Dispatcher { handles, queues })
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config, routes, rx, cancel),
    fields(sink = %config.name, kind = ?config.kind, driver = ?config.driver)
)]
async fn create_sink_handle(
    config: &SinkConfig,
    routes: RouteTable,
    rx: async_channel::Receiver<Record>,
    cancel: CancellationToken,
) -> Result<SinkHandle, DispatcherError> {
    if !config.driver.supports(config.kind) {
        return Err(DispatcherError::sink_creation(
            &config.name,
            format!("driver {:?} cannot serve {:?} sinks", config.driver, config.kind),
        ));
    }

    match config.driver {
        SinkDriver::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, routes, rx, cancel))
        }
        SinkDriver::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, routes, rx, cancel))
        }
        SinkDriver::Influx => {
            let sink = InfluxSink::from_params(&config.name, &config.params)?;
            Ok(SinkHandle::spawn(sink, routes, rx, cancel))
        }
        #[cfg(feature = "kafka")]
        SinkDriver::Kafka => {
            let sink = crate::sinks::KafkaSink::from_params(&config.name, &config.params)?;
            Ok(SinkHandle::spawn(sink, routes, rx, cancel))
        }
        #[cfg(not(feature = "kafka"))]
        SinkDriver::Kafka => Err(DispatcherError::sink_creation(
            &config.name,
            "kafka driver requires building with the `kafka` feature",
        )),
    }
}

/// Running sink writers plus the sending half of their queues
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    queues: Vec<DownstreamQueue>,
}

impl Dispatcher {
    /// Create a dispatcher from already running handles (for testing)
    pub fn with_handles(handles: Vec<SinkHandle>, queues: Vec<DownstreamQueue>) -> Self {
        Self { handles, queues }
    }

    /// Fan-out stage feeding every sink queue, for one source
    pub fn fanout(&self, metrics: Arc<IngestionMetrics>) -> FanOut {
        FanOut::with_queues(self.queues.clone(), metrics)
    }

    pub fn sink_count(&self) -> usize {
        self.handles.len()
    }

    /// Shared metrics handles, readable after the writers are gone
    pub fn sink_metrics(&self) -> Vec<(String, Arc<SinkMetrics>)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect()
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Release the queues and hand the writer tasks to the caller.
    ///
    /// Writers stop on cancellation, or once every fan-out holding a queue
    /// clone is gone and the queue is drained.
    pub fn into_tasks(self) -> Vec<(String, JoinHandle<()>)> {
        drop(self.queues);
        self.handles.into_iter().map(SinkHandle::into_task).collect()
    }

    /// Release the queues and wait for every writer to stop
    #[instrument(name = "dispatcher_join", skip(self))]
    pub async fn join(self) {
        drop(self.queues);
        for handle in self.handles {
            handle.join().await;
        }
        info!("Dispatcher shutdown complete");
    }
}

/// Convenience function to create a dispatcher from a blueprint
pub async fn create_dispatcher(
    blueprint: &RelayBlueprint,
    cancel: CancellationToken,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(blueprint, cancel).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, DataLayout, DataSourceConfig, MetricField, MetricType, MistConfig,
        OverflowPolicy, PubsubRouteConfig, SinkKind, SourceKind, TsdbRouteConfig,
    };
    use std::collections::{BTreeMap, HashMap};

    fn sink(name: &str, kind: SinkKind, driver: SinkDriver) -> SinkConfig {
        SinkConfig {
            name: name.into(),
            kind,
            driver,
            queue_capacity: 16,
            overflow: OverflowPolicy::Block,
            params: HashMap::new(),
        }
    }

    fn blueprint(sinks: Vec<SinkConfig>) -> RelayBlueprint {
        RelayBlueprint {
            version: ConfigVersion::V1,
            mist: MistConfig {
                endpoint: "api.mist.com".into(),
                api_key: "secret".into(),
            },
            sinks,
            datasources: vec![DataSourceConfig {
                stream: "/sites/s1/stats/clients".into(),
                source: SourceKind::Stream,
                layout: DataLayout::StatsClient,
                interval_secs: 0,
                unique_key: None,
                watch_keys: vec![],
                tsdb: Some(TsdbRouteConfig {
                    table: "clients".into(),
                    keys: vec!["mac".into()],
                    metrics: vec![MetricField::new("rssi", MetricType::Double)],
                }),
                pubsub: Some(PubsubRouteConfig {
                    topic: "mist-clients".into(),
                    headers: BTreeMap::new(),
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_dispatcher_fanout_to_all_sinks() {
        let blueprint = blueprint(vec![
            sink("tsdb", SinkKind::Tsdb, SinkDriver::Log),
            sink("pubsub", SinkKind::Pubsub, SinkDriver::Log),
        ]);
        let cancel = CancellationToken::new();
        let dispatcher = create_dispatcher(&blueprint, cancel.clone()).await.unwrap();
        assert_eq!(dispatcher.sink_count(), 2);

        let fanout = dispatcher.fanout(Arc::new(IngestionMetrics::new()));
        for _ in 0..3 {
            let record = Record::new("/sites/s1/stats/clients", r#"{"mac":"aa","rssi":-60}"#);
            assert!(fanout.publish(record, &cancel).await);
        }
        drop(fanout);

        let handles_metrics = dispatcher.metrics();
        assert_eq!(handles_metrics.len(), 2);

        for (name, task) in dispatcher.into_tasks() {
            task.await.unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[tokio::test]
    async fn test_driver_kind_mismatch_rejected() {
        let blueprint = blueprint(vec![sink("bad", SinkKind::Pubsub, SinkDriver::Influx)]);
        let result = create_dispatcher(&blueprint, CancellationToken::new()).await;
        assert!(matches!(result, Err(DispatcherError::SinkCreation { .. })));
    }

    #[tokio::test]
    async fn test_influx_without_params_rejected() {
        let blueprint = blueprint(vec![sink("tsdb", SinkKind::Tsdb, SinkDriver::Influx)]);
        let result = create_dispatcher(&blueprint, CancellationToken::new()).await;
        assert!(matches!(result, Err(DispatcherError::InvalidParam { .. })));
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn test_kafka_needs_feature() {
        let blueprint = blueprint(vec![sink("bus", SinkKind::Pubsub, SinkDriver::Kafka)]);
        let result = create_dispatcher(&blueprint, CancellationToken::new()).await;
        assert!(matches!(result, Err(DispatcherError::SinkCreation { .. })));
    }
}
