//! # Dispatcher
//!
//! 数据写出模块。
//!
//! 负责：
//! - 每个 sink 一个有界队列和一个 writer 任务
//! - 按路由把记录映射为行，按批写入；或原样发布
//! - 写入失败时重连并重试一次，失败不影响其他 sink

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod rows;
pub mod sinks;
pub mod writer;

pub use contracts::{DataSink, Record};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use rows::{entry_rows, EntryRows};
pub use sinks::{FileSink, InfluxSink, LogSink};
#[cfg(feature = "kafka")]
pub use sinks::KafkaSink;
pub use writer::{BatchedWriter, BATCH_SIZE};
