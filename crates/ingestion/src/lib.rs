//! # Ingestion
//!
//! Telemetry ingestion module.
//!
//! Responsibilities:
//! - Keep a websocket session to the streaming API alive ([`StreamClient`])
//! - Poll REST resources and suppress unchanged snapshots ([`PollAgent`], [`decide`])
//! - Replicate every accepted record to each sink queue ([`FanOut`])
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{downstream_queue, FanOut, IngestionMetrics, StreamClient, StreamClientConfig};
//!
//! let (queue, rx) = downstream_queue("tsdb", 128, OverflowPolicy::Block);
//! let mut fanout = FanOut::new(Arc::new(IngestionMetrics::new()));
//! fanout.register(queue);
//!
//! let config = StreamClientConfig::new("api.mist.com", api_key, streams);
//! let client = StreamClient::new(config, fanout)?;
//! tokio::spawn(client.run(cancel.clone()));
//! while let Ok(record) = rx.recv().await {
//!     // hand the record to a writer
//! }
//! ```

mod config;
mod diff;
mod error;
mod fanout;
mod poll;
mod protocol;
mod stream;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot};
pub use diff::{decide, Decision, Snapshot};
pub use error::{IngestionError, Result};
pub use fanout::{downstream_queue, Delivery, DownstreamQueue, FanOut};
pub use poll::{PollAgent, PollAgentConfig, PollOutcome};
pub use protocol::{poll_url, stream_url, FrameEvent, StreamFrame, SubscribeRequest};
pub use stream::{ConnectionState, StreamClient, StreamClientConfig, RECONNECT_DELAY};
