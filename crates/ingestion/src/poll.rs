//! Poll-and-diff agent.
//!
//! Fetches one URI on a fixed interval, runs the body through [`decide`]
//! and republishes the whole body when anything watched has changed. Raw
//! layouts skip change detection and republish every successful poll.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{DataLayout, JsonPayload, Record};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::diff::{decide, Snapshot};
use crate::error::{IngestionError, Result};
use crate::fanout::FanOut;
use crate::protocol::{auth_header, poll_url};

/// Poll agent configuration
#[derive(Debug, Clone)]
pub struct PollAgentConfig {
    /// API host, with or without an http(s) scheme
    pub endpoint: String,
    pub api_key: String,
    /// Path appended to the endpoint; also the origin of emitted records
    pub uri: String,
    pub layout: DataLayout,
    pub interval: Duration,
    pub unique_key: Option<String>,
    pub watch_keys: Vec<String>,
}

/// What one poll cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    Unchanged,
    /// Request or decode failed; the cycle was skipped
    Failed,
    /// Shutdown interrupted the cycle
    Cancelled,
}

impl PollOutcome {
    fn as_label(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

pub struct PollAgent {
    config: PollAgentConfig,
    url: String,
    client: reqwest::Client,
    fanout: FanOut,
    metrics: Arc<IngestionMetrics>,
    snapshot: Snapshot<JsonPayload>,
}

impl PollAgent {
    /// Create an agent. Fails when the interval is zero, the layout cannot be
    /// polled, or an array layout has no unique key.
    pub fn new(config: PollAgentConfig, fanout: FanOut) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(IngestionError::invalid_config(
                format!("{}.interval", config.uri),
                "interval must be > 0",
            ));
        }
        if !config.layout.is_pollable() {
            return Err(IngestionError::invalid_config(
                format!("{}.layout", config.uri),
                format!("layout '{}' cannot be polled", config.layout),
            ));
        }
        if config.layout.requires_unique_key()
            && config.unique_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(IngestionError::invalid_config(
                format!("{}.unique_key", config.uri),
                format!("layout '{}' requires a unique key", config.layout),
            ));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| IngestionError::invalid_config("http_client", e.to_string()))?;
        let url = poll_url(&config.endpoint, &config.uri);
        let metrics = Arc::clone(fanout.metrics());

        Ok(Self {
            config,
            url,
            client,
            fanout,
            metrics,
            snapshot: Snapshot::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of entries remembered from the last published poll
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    /// Poll immediately, then once per interval, until `cancel` fires
    #[instrument(
        name = "poll_agent_run",
        skip(self, cancel),
        fields(uri = %self.config.uri, interval_secs = self.config.interval.as_secs())
    )]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(url = %self.url, layout = %self.config.layout, "poll agent started");

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.poll_once(&cancel).await == PollOutcome::Cancelled {
                break;
            }
        }

        info!("poll agent stopped");
    }

    /// Run a single poll cycle
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> PollOutcome {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            res = self.fetch() => res,
        };

        let outcome = match fetched {
            Ok(body) => {
                self.metrics.record_poll_cycle();
                self.metrics.record_received();
                self.process(body, cancel).await
            }
            Err(e) => {
                self.metrics.record_poll_failure();
                warn!(uri = %self.config.uri, error = %e, "poll skipped");
                PollOutcome::Failed
            }
        };

        observability::metrics::record_poll_cycle(&self.config.uri, outcome.as_label());
        outcome
    }

    async fn fetch(&self) -> Result<Bytes> {
        let request_err = |message: String| IngestionError::Request {
            uri: self.config.uri.clone(),
            message,
        };

        debug!(url = %self.url, "GET");
        let response = self
            .client
            .get(&self.url)
            .header(AUTHORIZATION, auth_header(&self.config.api_key))
            .send()
            .await
            .map_err(|e| request_err(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(IngestionError::Status {
                uri: self.config.uri.clone(),
                status: response.status().as_u16(),
            });
        }

        response.bytes().await.map_err(|e| request_err(e.to_string()))
    }

    async fn process(&mut self, body: Bytes, cancel: &CancellationToken) -> PollOutcome {
        if !self.config.layout.is_raw() {
            match self.evaluate(&body) {
                Ok(Some(snapshot)) => {
                    if !self.emit(body, cancel).await {
                        return PollOutcome::Cancelled;
                    }
                    self.snapshot = snapshot;
                    return PollOutcome::Published;
                }
                Ok(None) => {
                    debug!(uri = %self.config.uri, "no change, nothing published");
                    return PollOutcome::Unchanged;
                }
                Err(e) => {
                    self.metrics.record_parse_error();
                    warn!(uri = %self.config.uri, error = %e, "response body not usable");
                    return PollOutcome::Failed;
                }
            }
        }

        if self.emit(body, cancel).await {
            PollOutcome::Published
        } else {
            PollOutcome::Cancelled
        }
    }

    /// Returns the snapshot to keep when the body must be republished
    fn evaluate(&self, body: &[u8]) -> Result<Option<Snapshot<JsonPayload>>> {
        let entries = if self.config.layout.requires_unique_key() {
            JsonPayload::array_entries(&self.config.uri, body)?
        } else {
            JsonPayload::entries(&self.config.uri, body)?
        };
        let unique_key = self.config.unique_key.as_deref().unwrap_or_default();
        let decision = decide(&self.snapshot, &entries, unique_key, &self.config.watch_keys);

        debug!(
            entries = entries.len(),
            added = decision.added,
            changed = decision.changed,
            removed = decision.removed,
            skipped = decision.skipped,
            "snapshot compared"
        );

        Ok(decision.need_publish.then_some(decision.snapshot))
    }

    async fn emit(&self, body: Bytes, cancel: &CancellationToken) -> bool {
        info!(uri = %self.config.uri, bytes = body.len(), "publishing snapshot");
        let record = Record::new(self.config.uri.as_str(), body);
        self.fanout.publish(record, cancel).await
    }
}
