//! Fan-out of accepted records to every downstream queue.

use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use contracts::{OverflowPolicy, Record};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::IngestionMetrics;

/// Create a bounded queue for one sink: the sending side for the fan-out and
/// the receiving side for the sink's writer.
pub fn downstream_queue(
    name: impl Into<Arc<str>>,
    capacity: usize,
    policy: OverflowPolicy,
) -> (DownstreamQueue, Receiver<Record>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (DownstreamQueue::new(name, tx, policy), rx)
}

/// Sending side of one sink's queue
#[derive(Debug, Clone)]
pub struct DownstreamQueue {
    name: Arc<str>,
    tx: Sender<Record>,
    policy: OverflowPolicy,
}

/// Result of delivering one record to one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Delivered after evicting the oldest queued record
    DisplacedOldest,
    /// Rejected because the queue was full
    DroppedNewest,
    /// The reader side is gone
    Closed,
    /// Shutdown arrived while waiting for space
    Cancelled,
}

impl DownstreamQueue {
    pub fn new(name: impl Into<Arc<str>>, tx: Sender<Record>, policy: OverflowPolicy) -> Self {
        Self {
            name: name.into(),
            tx,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Push one record according to the queue's overflow policy
    pub async fn deliver(&self, record: Record, cancel: &CancellationToken) -> Delivery {
        match self.policy {
            OverflowPolicy::Block => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Delivery::Cancelled,
                    res = self.tx.send(record) => match res {
                        Ok(()) => Delivery::Delivered,
                        Err(_) => Delivery::Closed,
                    },
                }
            }
            OverflowPolicy::DropNewest => match self.tx.try_send(record) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => Delivery::DroppedNewest,
                Err(TrySendError::Closed(_)) => Delivery::Closed,
            },
            OverflowPolicy::DropOldest => match self.tx.force_send(record) {
                Ok(None) => Delivery::Delivered,
                Ok(Some(_evicted)) => Delivery::DisplacedOldest,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

/// Replicates each record to every registered queue, in registration order
#[derive(Debug)]
pub struct FanOut {
    queues: Vec<DownstreamQueue>,
    metrics: Arc<IngestionMetrics>,
}

impl FanOut {
    pub fn new(metrics: Arc<IngestionMetrics>) -> Self {
        Self {
            queues: Vec::new(),
            metrics,
        }
    }

    pub fn with_queues(queues: Vec<DownstreamQueue>, metrics: Arc<IngestionMetrics>) -> Self {
        Self { queues, metrics }
    }

    pub fn register(&mut self, queue: DownstreamQueue) {
        self.queues.push(queue);
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    /// Deliver `record` to every queue.
    ///
    /// Returns `false` when shutdown interrupted a blocked delivery; queues
    /// after the interrupted one do not receive the record.
    pub async fn publish(&self, record: Record, cancel: &CancellationToken) -> bool {
        self.metrics.record_published();

        for queue in &self.queues {
            match queue.deliver(record.clone(), cancel).await {
                Delivery::Delivered => {
                    trace!(queue = queue.name(), origin = %record.origin, "record queued");
                }
                Delivery::DisplacedOldest | Delivery::DroppedNewest => {
                    self.metrics.record_dropped();
                    observability::metrics::record_fanout_dropped(queue.name());
                    warn!(
                        queue = queue.name(),
                        policy = ?queue.policy(),
                        origin = %record.origin,
                        "queue full, record dropped"
                    );
                }
                Delivery::Closed => {
                    warn!(queue = queue.name(), "queue reader is gone, record not delivered");
                }
                Delivery::Cancelled => return false,
            }
        }
        true
    }
}
