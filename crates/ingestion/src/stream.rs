//! Streaming ingestion client.
//!
//! Keeps one authenticated websocket session alive, subscribes every
//! configured stream, and feeds `data` frames to the fan-out stage. Any
//! session failure leads to a fixed back-off and a fresh connection;
//! only shutdown ends the client.

use std::sync::Arc;
use std::time::Duration;

use contracts::Record;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::error::{IngestionError, Result};
use crate::fanout::FanOut;
use crate::protocol::{auth_header, stream_url, FrameEvent, StreamFrame, SubscribeRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fixed delay between a lost session and the next connection attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Streaming client configuration
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// API host, or a full `ws://` / `wss://` URL
    pub endpoint: String,
    pub api_key: String,
    /// Channels to subscribe after every connect
    pub subscriptions: Vec<String>,
    pub reconnect_delay: Duration,
}

impl StreamClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        subscriptions: Vec<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            subscriptions,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Session state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    BackingOff,
    Closing,
    Terminated,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Websocket client for the Mist streaming API
pub struct StreamClient {
    config: StreamClientConfig,
    url: String,
    fanout: FanOut,
    metrics: Arc<IngestionMetrics>,
    state: ConnectionState,
}

impl StreamClient {
    /// Create a client. Fails on a missing credential, endpoint, or
    /// subscription set.
    pub fn new(config: StreamClientConfig, fanout: FanOut) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(IngestionError::invalid_config(
                "endpoint",
                "endpoint must not be empty",
            ));
        }
        if config.api_key.is_empty() {
            return Err(IngestionError::invalid_config(
                "api_key",
                "api key must not be empty",
            ));
        }
        if config.subscriptions.is_empty() {
            return Err(IngestionError::invalid_config(
                "subscriptions",
                "no streams to subscribe",
            ));
        }

        let url = stream_url(&config.endpoint);
        let metrics = Arc::clone(fanout.metrics());
        Ok(Self {
            config,
            url,
            fanout,
            metrics,
            state: ConnectionState::Disconnected,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until `cancel` fires. Transient failures never end the loop.
    #[instrument(
        name = "stream_client_run",
        skip(self, cancel),
        fields(url = %self.url, streams = self.config.subscriptions.len())
    )]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("stream client started");

        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.connect() => res,
            };

            match connected {
                Ok(ws) => match self.session(ws, &cancel).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => {
                        warn!(reason = %reason, "stream session lost");
                    }
                },
                Err(e) => warn!(error = %e, "failed to connect"),
            }

            self.set_state(ConnectionState::BackingOff);
            self.metrics.record_reconnect();
            observability::metrics::record_stream_reconnect(&self.url);
            info!(
                delay_secs = self.config.reconnect_delay.as_secs_f64(),
                "reconnecting after back-off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Terminated);
        info!("stream client stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "connection state");
            self.state = state;
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let connect_err = |message: String| IngestionError::Connect {
            url: self.url.clone(),
            message,
        };

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        let token = HeaderValue::from_str(&auth_header(&self.config.api_key))
            .map_err(|e| connect_err(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, token);

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        info!(url = %self.url, "websocket connected");
        Ok(ws)
    }

    async fn session(&mut self, ws: WsStream, cancel: &CancellationToken) -> SessionEnd {
        let (mut write, read) = ws.split();

        self.set_state(ConnectionState::Subscribing);
        self.subscribe(&mut write).await;

        let (tx, mut rx) = mpsc::channel(1);
        let reader = spawn_reader(read, tx, Arc::clone(&self.metrics));
        self.set_state(ConnectionState::Streaming);

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Shutdown,
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if !self.handle_frame(frame, cancel).await {
                            break SessionEnd::Shutdown;
                        }
                    }
                    None => break SessionEnd::Lost("read task ended".into()),
                },
            }
        };

        if end == SessionEnd::Shutdown {
            self.set_state(ConnectionState::Closing);
            if let Err(e) = write.send(Message::Close(None)).await {
                debug!(error = %e, "close frame not sent");
            }
        }
        reader.abort();
        if let Err(e) = write.close().await {
            debug!(error = %e, "websocket close failed");
        }
        end
    }

    async fn subscribe(&self, write: &mut SplitSink<WsStream, Message>) {
        for stream in &self.config.subscriptions {
            if let Err(e) = send_subscribe(write, stream).await {
                warn!(error = %e, "subscribe request failed");
            } else {
                debug!(stream = %stream, "subscribe request sent");
            }
        }
    }

    /// Returns `false` when shutdown interrupted delivery
    async fn handle_frame(&self, frame: StreamFrame, cancel: &CancellationToken) -> bool {
        match frame.kind() {
            FrameEvent::Subscribed => {
                info!(channel = %frame.channel, "subscription confirmed");
            }
            FrameEvent::SubscribeFailed => {
                warn!(channel = %frame.channel, detail = %frame.detail, "subscription failed");
            }
            FrameEvent::Data => {
                self.metrics.record_received();
                observability::metrics::record_record_received(&frame.channel, "stream");
                debug!(channel = %frame.channel, bytes = frame.data.len(), "data frame");
                let record = Record::new(frame.channel, frame.data);
                return self.fanout.publish(record, cancel).await;
            }
            FrameEvent::Unknown => {
                info!(event = %frame.event, "event not handled, ignored");
            }
        }
        true
    }
}

async fn send_subscribe(write: &mut SplitSink<WsStream, Message>, stream: &str) -> Result<()> {
    let subscribe_err = |message: String| IngestionError::Subscribe {
        stream: stream.to_string(),
        message,
    };
    let body = serde_json::to_string(&SubscribeRequest { subscribe: stream })
        .map_err(|e| subscribe_err(e.to_string()))?;
    write
        .send(Message::text(body))
        .await
        .map_err(|e| subscribe_err(e.to_string()))
}

/// Reads the socket and hands decoded frames to the control loop. Dropping
/// `tx` on exit tells the control loop the session is gone.
fn spawn_reader(
    mut read: SplitStream<WsStream>,
    tx: mpsc::Sender<StreamFrame>,
    metrics: Arc<IngestionMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    break;
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    info!(frame = ?frame, "server closed the connection");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => {
                    metrics.record_parse_error();
                    warn!(len = other.len(), "non-text message skipped");
                    continue;
                }
            };

            match serde_json::from_str::<StreamFrame>(text.as_str()) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    metrics.record_parse_error();
                    warn!(error = %e, "malformed frame skipped");
                }
            }
        }
    })
}
