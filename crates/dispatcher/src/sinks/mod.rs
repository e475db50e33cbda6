//! Sink implementations
//!
//! Contains LogSink, FileSink, InfluxSink and, with the `kafka` feature,
//! KafkaSink.

mod file;
mod influx;
#[cfg(feature = "kafka")]
mod kafka;
mod log;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::influx::{line_protocol, InfluxSink, InfluxSinkConfig};
#[cfg(feature = "kafka")]
pub use self::kafka::{KafkaSink, KafkaSinkConfig};
pub use self::log::LogSink;
