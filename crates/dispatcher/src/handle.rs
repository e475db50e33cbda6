//! SinkHandle - owns the writer task of one sink

use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use contracts::{DataSink, Record, RouteTable};

use crate::metrics::SinkMetrics;
use crate::writer::BatchedWriter;

/// Handle to a running sink writer
pub struct SinkHandle {
    /// Sink name
    name: String,
    /// Shared metrics
    metrics: Arc<SinkMetrics>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn a writer that drains `rx` into `sink`
    pub fn spawn<S: DataSink + Send + 'static>(
        sink: S,
        routes: RouteTable,
        rx: Receiver<Record>,
        cancel: CancellationToken,
    ) -> Self {
        let writer = BatchedWriter::new(sink, routes);
        let name = writer.name().to_string();
        let metrics = Arc::clone(writer.metrics());

        let worker_handle = tokio::spawn(writer.run(rx, cancel));

        Self {
            name,
            metrics,
            worker_handle,
        }
    }

    /// Get sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.worker_handle.is_finished()
    }

    /// Split into name and task, for a caller that joins tasks itself
    pub fn into_task(self) -> (String, JoinHandle<()>) {
        (self.name, self.worker_handle)
    }

    /// Wait for the writer to stop (after cancellation or queue close)
    #[instrument(name = "sink_handle_join", skip(self), fields(sink = %self.name))]
    pub async fn join(self) {
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Writer task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}
