//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for Sinks.

use bytes::Bytes;

use crate::{ContractError, Row};

/// Data output trait
///
/// All sink drivers must implement this trait. A driver only supports one
/// of the two write paths in practice; the other is a logged no-op.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one batch of rows to a table
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write_rows(&mut self, destination: &str, rows: &[Row]) -> Result<(), ContractError>;

    /// Publish an opaque payload to a topic
    async fn write_raw(
        &mut self,
        destination: &str,
        headers: &[(String, String)],
        payload: &Bytes,
    ) -> Result<(), ContractError>;

    /// Drop and re-establish the underlying connection
    async fn reconnect(&mut self) -> Result<(), ContractError>;

    /// Close sink. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<(), ContractError>;
}
