//! BatchedWriter - drains one downstream queue into one sink
//!
//! Per record: resolve the route by stream name, then either map the payload
//! to rows and write them in batches of [`BATCH_SIZE`], or publish the payload
//! verbatim. A failed write gets exactly one reconnect and one retry.

use std::sync::Arc;
use std::time::Instant;

use async_channel::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use contracts::{ContractError, DataSink, JsonPayload, Record, Route, RouteTable, Row};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;
use crate::rows::entry_rows;

/// Rows per `write_rows` call
pub const BATCH_SIZE: usize = 100;

/// Consumes records for one sink
pub struct BatchedWriter<S> {
    sink: S,
    name: String,
    routes: RouteTable,
    metrics: Arc<SinkMetrics>,
}

impl<S: DataSink> BatchedWriter<S> {
    pub fn new(sink: S, routes: RouteTable) -> Self {
        Self::with_metrics(sink, routes, Arc::new(SinkMetrics::new()))
    }

    pub fn with_metrics(sink: S, routes: RouteTable, metrics: Arc<SinkMetrics>) -> Self {
        let name = sink.name().to_string();
        Self {
            sink,
            name,
            routes,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Write one record through its route
    #[instrument(
        name = "writer_process",
        skip(self, record),
        fields(sink = %self.name, stream = %record.origin, bytes = record.len())
    )]
    pub async fn process(&mut self, record: &Record) -> Result<(), DispatcherError> {
        let Some(route) = self.routes.get(&record.origin).cloned() else {
            self.metrics.inc_unrouted_count();
            observability::metrics::record_unrouted(&self.name, &record.origin);
            return Err(DispatcherError::UnknownRoute {
                sink: self.name.clone(),
                stream: record.origin.to_string(),
            });
        };

        match route.mode {
            contracts::WriteMode::Raw => self.publish(&route, record).await,
            contracts::WriteMode::Rows => self.write_structured(&route, record).await,
        }
    }

    async fn write_structured(
        &mut self,
        route: &Route,
        record: &Record,
    ) -> Result<(), DispatcherError> {
        let entries = JsonPayload::entries(&record.origin, &record.payload)?;
        let time = record.received_at_secs();

        let mut batch: Vec<Row> = Vec::with_capacity(BATCH_SIZE);
        for entry in &entries {
            let Some(mapped) = entry_rows(route, entry, time) else {
                self.metrics.add_skipped(1);
                warn!(
                    sink = %self.name,
                    stream = %route.stream,
                    keys = ?route.dimensions,
                    "Entry has none of the dimension keys, skipped"
                );
                continue;
            };
            if mapped.skipped_metrics > 0 {
                self.metrics.add_skipped(mapped.skipped_metrics as u64);
                trace!(
                    sink = %self.name,
                    skipped = mapped.skipped_metrics,
                    "Metrics absent or not coercible"
                );
            }

            for row in mapped.rows {
                batch.push(row);
                if batch.len() == BATCH_SIZE {
                    self.flush(&route.destination, &batch).await?;
                    batch.clear();
                }
            }
        }

        if !batch.is_empty() {
            self.flush(&route.destination, &batch).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, destination: &str, rows: &[Row]) -> Result<(), DispatcherError> {
        let started = Instant::now();
        let result = match self.sink.write_rows(destination, rows).await {
            Ok(()) => Ok(()),
            Err(e) => match self.reconnect_after(destination, e).await {
                Ok(()) => self.sink.write_rows(destination, rows).await,
                Err(e) => Err(e),
            },
        };
        self.settle(destination, rows.len(), started, result)
    }

    async fn publish(&mut self, route: &Route, record: &Record) -> Result<(), DispatcherError> {
        let started = Instant::now();
        let destination = route.destination.as_str();
        let result = match self
            .sink
            .write_raw(destination, &route.headers, &record.payload)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => match self.reconnect_after(destination, e).await {
                Ok(()) => {
                    self.sink
                        .write_raw(destination, &route.headers, &record.payload)
                        .await
                }
                Err(e) => Err(e),
            },
        };
        self.settle(destination, 0, started, result)
    }

    async fn reconnect_after(
        &mut self,
        destination: &str,
        cause: ContractError,
    ) -> Result<(), ContractError> {
        warn!(
            sink = %self.name,
            destination,
            error = %cause,
            "Write failed, reconnecting before retry"
        );
        self.metrics.inc_retry_count();
        observability::metrics::record_sink_retry(&self.name);
        self.sink.reconnect().await
    }

    fn settle(
        &self,
        destination: &str,
        rows: usize,
        started: Instant,
        result: Result<(), ContractError>,
    ) -> Result<(), DispatcherError> {
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(()) => {
                self.metrics.record_write(rows, latency_ms);
                observability::metrics::record_sink_write(&self.name, rows, latency_ms, true);
                trace!(sink = %self.name, destination, rows, latency_ms, "Write committed");
                Ok(())
            }
            Err(source) => {
                self.metrics.inc_failure_count();
                observability::metrics::record_sink_write(&self.name, rows, latency_ms, false);
                Err(DispatcherError::RetryExhausted {
                    sink: self.name.clone(),
                    destination: destination.to_string(),
                    source,
                })
            }
        }
    }

    /// Consume the queue until shutdown or until every sender is gone,
    /// then close the sink.
    #[instrument(name = "writer_run", skip_all, fields(sink = %self.name))]
    pub async fn run(mut self, rx: Receiver<Record>, cancel: CancellationToken) {
        debug!(sink = %self.name, routes = self.routes.len(), "Writer started");

        loop {
            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(record) => record,
                    Err(_) => {
                        debug!(sink = %self.name, "Queue closed");
                        break;
                    }
                },
            };

            self.metrics.inc_record_count();
            self.metrics.set_queue_len(rx.len());
            observability::metrics::record_queue_depth(&self.name, rx.len());

            match self.process(&record).await {
                Ok(()) => {}
                Err(e @ DispatcherError::UnknownRoute { .. }) => {
                    warn!(sink = %self.name, error = %e, "Record dropped");
                }
                Err(e) => {
                    error!(sink = %self.name, stream = %record.origin, error = %e, "Record lost");
                }
            }
        }

        if let Err(e) = self.sink.close().await {
            error!(sink = %self.name, error = %e, "Close failed on shutdown");
        }
        info!(
            sink = %self.name,
            records = self.metrics.record_count(),
            writes = self.metrics.write_count(),
            failures = self.metrics.failure_count(),
            "Writer stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{DataLayout, MetricField, MetricType};
    use serde_json::json;
    use std::sync::Mutex;

    /// What the mock sink saw
    #[derive(Debug, Default)]
    struct Calls {
        row_batches: Vec<(String, usize)>,
        raw: Vec<(String, Vec<(String, String)>, Bytes)>,
        attempts: usize,
        reconnects: usize,
        closed: usize,
    }

    /// Mock sink failing its first `fail_first` writes
    struct MockSink {
        calls: Arc<Mutex<Calls>>,
        fail_first: usize,
        fail_reconnect: bool,
    }

    impl MockSink {
        fn new(fail_first: usize) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let sink = Self {
                calls: Arc::clone(&calls),
                fail_first,
                fail_reconnect: false,
            };
            (sink, calls)
        }

        fn attempt(&mut self) -> Result<(), ContractError> {
            let mut calls = self.calls.lock().unwrap();
            calls.attempts += 1;
            if calls.attempts <= self.fail_first {
                return Err(ContractError::sink_write("mock", "mock failure"));
            }
            Ok(())
        }
    }

    impl DataSink for MockSink {
        fn name(&self) -> &str {
            "mock"
        }

        async fn write_rows(
            &mut self,
            destination: &str,
            rows: &[Row],
        ) -> Result<(), ContractError> {
            self.attempt()?;
            self.calls
                .lock()
                .unwrap()
                .row_batches
                .push((destination.to_string(), rows.len()));
            Ok(())
        }

        async fn write_raw(
            &mut self,
            destination: &str,
            headers: &[(String, String)],
            payload: &Bytes,
        ) -> Result<(), ContractError> {
            self.attempt()?;
            self.calls.lock().unwrap().raw.push((
                destination.to_string(),
                headers.to_vec(),
                payload.clone(),
            ));
            Ok(())
        }

        async fn reconnect(&mut self) -> Result<(), ContractError> {
            self.calls.lock().unwrap().reconnects += 1;
            if self.fail_reconnect {
                return Err(ContractError::sink_connection("mock", "refused"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.calls.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    const MAPS: &str = "/api/v1/sites/s1/maps";
    const TOPIC_STREAM: &str = "/sites/s1/stats/clients";

    fn routes() -> RouteTable {
        RouteTable::new([
            Route::rows(
                MAPS,
                DataLayout::Maps,
                "maps",
                vec!["id".into()],
                vec![MetricField::new("width", MetricType::Double)],
            ),
            Route::raw(
                TOPIC_STREAM,
                DataLayout::StatsClient,
                "clients",
                vec![("source".into(), "mist".into())],
            ),
        ])
        .unwrap()
    }

    fn entries(n: usize) -> Record {
        let body: Vec<_> = (0..n).map(|i| json!({"id": format!("m{i}"), "width": i})).collect();
        Record::new(MAPS, serde_json::to_vec(&body).unwrap())
    }

    #[tokio::test]
    async fn test_exactly_one_batch_at_limit() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        writer.process(&entries(100)).await.unwrap();
        assert_eq!(calls.lock().unwrap().row_batches, vec![("maps".to_string(), 100)]);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_before_remainder() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        writer.process(&entries(101)).await.unwrap();
        assert_eq!(
            calls.lock().unwrap().row_batches,
            vec![("maps".to_string(), 100), ("maps".to_string(), 1)]
        );
        assert_eq!(writer.metrics().row_count(), 101);
    }

    #[tokio::test]
    async fn test_remainder_only() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        writer.process(&entries(42)).await.unwrap();
        assert_eq!(calls.lock().unwrap().row_batches, vec![("maps".to_string(), 42)]);
    }

    #[tokio::test]
    async fn test_failure_then_retry_succeeds() {
        let (sink, calls) = MockSink::new(1);
        let mut writer = BatchedWriter::new(sink, routes());

        writer.process(&entries(3)).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.reconnects, 1);
        assert_eq!(calls.attempts, 2);
        assert_eq!(calls.row_batches, vec![("maps".to_string(), 3)]);
        assert_eq!(writer.metrics().retry_count(), 1);
        assert_eq!(writer.metrics().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_failure_propagates_once() {
        let (sink, calls) = MockSink::new(usize::MAX);
        let mut writer = BatchedWriter::new(sink, routes());

        let err = writer.process(&entries(3)).await.unwrap_err();
        assert!(matches!(err, DispatcherError::RetryExhausted { .. }));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.reconnects, 1);
        assert_eq!(calls.attempts, 2);
        assert!(calls.row_batches.is_empty());
        assert_eq!(writer.metrics().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_skips_retry() {
        let (mut sink, calls) = MockSink::new(1);
        sink.fail_reconnect = true;
        let mut writer = BatchedWriter::new(sink, routes());

        let err = writer.process(&entries(1)).await.unwrap_err();
        assert!(matches!(err, DispatcherError::RetryExhausted { .. }));
        assert_eq!(calls.lock().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_raw_route_publishes_payload_with_headers() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        let record = Record::new(TOPIC_STREAM, r#"{"mac":"aa"}"#);
        writer.process(&record).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.raw.len(), 1);
        assert_eq!(calls.raw[0].0, "clients");
        assert_eq!(calls.raw[0].1, vec![("source".to_string(), "mist".to_string())]);
        assert_eq!(calls.raw[0].2, Bytes::from_static(br#"{"mac":"aa"}"#));
    }

    #[tokio::test]
    async fn test_raw_retry_after_failure() {
        let (sink, calls) = MockSink::new(1);
        let mut writer = BatchedWriter::new(sink, routes());

        writer
            .process(&Record::new(TOPIC_STREAM, "x"))
            .await
            .unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.reconnects, 1);
        assert_eq!(calls.raw.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_reported() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        let err = writer
            .process(&Record::new("/sites/s1/unknown", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::UnknownRoute { .. }));
        assert_eq!(writer.metrics().unrouted_count(), 1);
        assert_eq!(calls.lock().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_data_error() {
        let (sink, _calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        let err = writer.process(&Record::new(MAPS, "not json")).await.unwrap_err();
        assert!(matches!(err, DispatcherError::Contract(_)));
    }

    #[tokio::test]
    async fn test_entry_without_dimensions_skipped() {
        let (sink, calls) = MockSink::new(0);
        let mut writer = BatchedWriter::new(sink, routes());

        let body = json!([{"width": 1}, {"id": "m1", "width": 2}]);
        writer
            .process(&Record::new(MAPS, body.to_string()))
            .await
            .unwrap();
        assert_eq!(calls.lock().unwrap().row_batches, vec![("maps".to_string(), 1)]);
        assert_eq!(writer.metrics().skipped_count(), 1);
    }

    #[tokio::test]
    async fn test_run_continues_after_unknown_stream_and_closes_sink() {
        let (sink, calls) = MockSink::new(0);
        let writer = BatchedWriter::new(sink, routes());
        let metrics = Arc::clone(writer.metrics());
        let (tx, rx) = async_channel::bounded(8);
        let cancel = CancellationToken::new();

        tx.send(Record::new("/nowhere", "{}")).await.unwrap();
        tx.send(entries(2)).await.unwrap();
        drop(tx);

        writer.run(rx, cancel).await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.row_batches, vec![("maps".to_string(), 2)]);
        assert_eq!(calls.closed, 1);
        assert_eq!(metrics.record_count(), 2);
        assert_eq!(metrics.unrouted_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (sink, calls) = MockSink::new(0);
        let writer = BatchedWriter::new(sink, routes());
        let (_tx, rx) = async_channel::bounded::<Record>(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(writer.run(rx, cancel.clone()));
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(calls.lock().unwrap().closed, 1);
    }
}
