//! KafkaSink - publishes raw payloads to Kafka topics
//!
//! Each payload becomes one message on the route's topic, carrying the
//! route's static headers. Row batches are not supported and are dropped
//! with a log line.

use bytes::Bytes;
use contracts::{ContractError, DataSink, Row};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatcherError;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FLUSH_WAIT_SECS: u64 = 10;

/// Params consumed by the sink itself; everything else goes to librdkafka
const RESERVED_PARAMS: &[&str] = &[
    "bootstrap_servers",
    "client_id",
    "client_id_use_hostname",
    "async",
    "flush_wait_seconds",
];

/// Configuration for KafkaSink
#[derive(Debug, Clone)]
pub struct KafkaSinkConfig {
    pub client: ClientConfig,
    /// Do not wait for delivery reports
    pub fire_and_forget: bool,
    /// Upper bound for flushing outstanding messages on close
    pub flush_wait: Duration,
}

impl KafkaSinkConfig {
    /// Create config from params map.
    ///
    /// `bootstrap_servers` is required. The client id is `client_id`, or the
    /// machine hostname when `client_id_use_hostname = "true"`. Keys prefixed
    /// with `client.` are passed to the producer without the prefix, any other
    /// unknown key is passed as is.
    pub fn from_params(
        sink: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let servers = params
            .get("bootstrap_servers")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DispatcherError::invalid_param(sink, "bootstrap_servers", "required"))?;

        let flag = |key: &str| -> Result<bool, DispatcherError> {
            params.get(key).map_or(Ok(false), |v| {
                v.parse()
                    .map_err(|_| DispatcherError::invalid_param(sink, key, "expected true or false"))
            })
        };

        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", servers);

        let client_id = if flag("client_id_use_hostname")? {
            Some(hostname().ok_or_else(|| {
                DispatcherError::invalid_param(
                    sink,
                    "client_id_use_hostname",
                    "hostname could not be determined",
                )
            })?)
        } else {
            params.get("client_id").filter(|v| !v.is_empty()).cloned()
        };
        if let Some(id) = client_id {
            client.set("client.id", id);
        }

        for (key, value) in params {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            let key = key.strip_prefix("client.").unwrap_or(key);
            client.set(key, value);
        }

        let flush_wait = match params.get("flush_wait_seconds") {
            Some(v) => v.parse().map_err(|_| {
                DispatcherError::invalid_param(sink, "flush_wait_seconds", "expected seconds")
            })?,
            None => DEFAULT_FLUSH_WAIT_SECS,
        };

        Ok(Self {
            client,
            fire_and_forget: flag("async")?,
            flush_wait: Duration::from_secs(flush_wait),
        })
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Sink that publishes to Kafka
pub struct KafkaSink {
    name: String,
    config: KafkaSinkConfig,
    producer: FutureProducer,
    closed: bool,
}

impl KafkaSink {
    pub fn new(name: impl Into<String>, config: KafkaSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let producer = create_producer(&name, &config.client)?;
        info!(sink = %name, "Kafka producer created");
        Ok(Self {
            name,
            config,
            producer,
            closed: false,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let config = KafkaSinkConfig::from_params(&name, params)?;
        Ok(Self::new(name, config)?)
    }

    async fn flush_outstanding(&self) -> Result<(), ContractError> {
        let producer = self.producer.clone();
        let wait = self.config.flush_wait;
        tokio::task::spawn_blocking(move || producer.flush(wait))
            .await
            .map_err(|e| ContractError::sink_connection(&self.name, e.to_string()))?
            .map_err(|e| ContractError::sink_write(&self.name, format!("flush: {e}")))
    }
}

fn create_producer(name: &str, client: &ClientConfig) -> Result<FutureProducer, ContractError> {
    debug!(sink = %name, "rdkafka configuration: {:?}", client);
    client
        .create()
        .map_err(|e| ContractError::sink_connection(name, e.to_string()))
}

fn owned_headers(headers: &[(String, String)]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

impl DataSink for KafkaSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_rows(&mut self, destination: &str, rows: &[Row]) -> Result<(), ContractError> {
        warn!(
            sink = %self.name,
            destination,
            rows = rows.len(),
            "Pub/sub sink cannot store rows, dropped"
        );
        Ok(())
    }

    #[instrument(
        name = "kafka_sink_write_raw",
        skip(self, headers, payload),
        fields(sink = %self.name, bytes = payload.len())
    )]
    async fn write_raw(
        &mut self,
        destination: &str,
        headers: &[(String, String)],
        payload: &Bytes,
    ) -> Result<(), ContractError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(destination)
            .payload(payload.as_ref())
            .headers(owned_headers(headers));

        if self.config.fire_and_forget {
            return self
                .producer
                .send_result(record)
                .map(|_delivery| ())
                .map_err(|(e, _)| ContractError::sink_write(&self.name, e.to_string()));
        }

        self.producer
            .send(record, QUEUE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| ContractError::sink_write(&self.name, format!("{destination}: {e}")))
    }

    async fn reconnect(&mut self) -> Result<(), ContractError> {
        if let Err(e) = self.flush_outstanding().await {
            warn!(sink = %self.name, error = %e, "Flush before reconnect failed");
        }
        self.producer = create_producer(&self.name, &self.config.client)?;
        self.closed = false;
        Ok(())
    }

    #[instrument(name = "kafka_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.flush_outstanding().await?;
        info!(sink = %self.name, "KafkaSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bootstrap_servers_required() {
        let result = KafkaSinkConfig::from_params("pubsub", &HashMap::new());
        assert!(matches!(result, Err(DispatcherError::InvalidParam { .. })));
    }

    #[test]
    fn test_client_options() {
        let config = KafkaSinkConfig::from_params(
            "pubsub",
            &params(&[
                ("bootstrap_servers", "k1:9092,k2:9092"),
                ("client_id", "relay-1"),
                ("async", "true"),
                ("flush_wait_seconds", "3"),
                ("client.compression.codec", "lz4"),
                ("linger.ms", "20"),
            ]),
        )
        .unwrap();

        assert_eq!(config.client.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(config.client.get("client.id"), Some("relay-1"));
        assert_eq!(config.client.get("compression.codec"), Some("lz4"));
        assert_eq!(config.client.get("linger.ms"), Some("20"));
        assert_eq!(config.client.get("async"), None);
        assert!(config.fire_and_forget);
        assert_eq!(config.flush_wait, Duration::from_secs(3));
    }

    #[test]
    fn test_no_client_id_is_fine() {
        let config =
            KafkaSinkConfig::from_params("pubsub", &params(&[("bootstrap_servers", "k:9092")]))
                .unwrap();
        assert_eq!(config.client.get("client.id"), None);
        assert!(!config.fire_and_forget);
    }

    #[test]
    fn test_bad_flag_rejected() {
        let result = KafkaSinkConfig::from_params(
            "pubsub",
            &params(&[("bootstrap_servers", "k:9092"), ("async", "maybe")]),
        );
        assert!(matches!(result, Err(DispatcherError::InvalidParam { .. })));
    }
}
