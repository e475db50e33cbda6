//! LogSink - logs row batches and payload summaries via tracing

use bytes::Bytes;
use contracts::{ContractError, DataSink, Row};
use tracing::{debug, info, instrument};

/// Sink that logs what it would have written, for dry runs and debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write_rows",
        skip(self, rows),
        fields(sink = %self.name, rows = rows.len())
    )]
    async fn write_rows(&mut self, destination: &str, rows: &[Row]) -> Result<(), ContractError> {
        info!(sink = %self.name, destination, rows = rows.len(), "Row batch received");
        for row in rows {
            debug!(
                sink = %self.name,
                destination,
                measure = %row.measure,
                value = %row.value,
                dimensions = ?row.dimensions,
                time = row.time,
                "Row"
            );
        }
        Ok(())
    }

    #[instrument(
        name = "log_sink_write_raw",
        skip(self, headers, payload),
        fields(sink = %self.name, bytes = payload.len())
    )]
    async fn write_raw(
        &mut self,
        destination: &str,
        headers: &[(String, String)],
        payload: &Bytes,
    ) -> Result<(), ContractError> {
        info!(
            sink = %self.name,
            destination,
            headers = headers.len(),
            bytes = payload.len(),
            "Payload received"
        );
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), ContractError> {
        // Nothing to reconnect for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
