//! Record - the unit every source emits and every sink consumes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One accepted unit of telemetry.
///
/// Cloning is cheap: the origin and payload are reference counted, so the
/// fan-out stage hands the same bytes to every downstream queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Logical stream the record belongs to (websocket channel or poll URI)
    pub origin: Arc<str>,
    /// Opaque payload, usually a JSON document
    pub payload: Bytes,
    /// Wall-clock time the source accepted the record
    pub received_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(origin: impl Into<Arc<str>>, payload: impl Into<Bytes>) -> Self {
        Self {
            origin: origin.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Receive time in whole seconds since the epoch
    pub fn received_at_secs(&self) -> i64 {
        self.received_at.timestamp()
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
