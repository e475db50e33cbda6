//! Mist wire protocol: websocket frames, subscribe requests and URL building.

use serde::{Deserialize, Serialize};

/// Path of the streaming endpoint on the API host
pub const STREAM_PATH: &str = "/api-ws/v1/stream";

/// One frame pushed by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamFrame {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub channel: String,
    /// JSON document encoded as a string
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub detail: String,
}

/// What a frame asks the client to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    Subscribed,
    SubscribeFailed,
    Data,
    Unknown,
}

impl StreamFrame {
    pub fn kind(&self) -> FrameEvent {
        match self.event.as_str() {
            "channel_subscribed" => FrameEvent::Subscribed,
            "subscribe_failed" => FrameEvent::SubscribeFailed,
            "data" => FrameEvent::Data,
            _ => FrameEvent::Unknown,
        }
    }
}

/// Subscribe request sent once per stream after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    pub subscribe: &'a str,
}

/// Value of the `Authorization` header
pub fn auth_header(api_key: &str) -> String {
    format!("token {api_key}")
}

/// Websocket URL for an API host.
///
/// A host without a scheme gets `wss://` and the stream path. A value that
/// already starts with `ws://` or `wss://` is taken as the full URL.
pub fn stream_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{}{}", endpoint.trim_end_matches('/'), STREAM_PATH)
    }
}

/// HTTP URL for a poll URI on an API host
pub fn poll_url(endpoint: &str, uri: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}{uri}")
    } else {
        format!("https://{base}{uri}")
    }
}
