//! Ingestion 错误类型

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 数据源构造参数不合法
    #[error("invalid source config at '{field}': {message}")]
    InvalidConfig {
        /// 字段
        field: String,
        /// 错误消息
        message: String,
    },

    /// websocket 连接失败
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// 目标地址
        url: String,
        /// 错误消息
        message: String,
    },

    /// 订阅请求发送失败
    #[error("failed to subscribe to {stream}: {message}")]
    Subscribe {
        /// 频道
        stream: String,
        /// 错误消息
        message: String,
    },

    /// 轮询请求失败 (网络或读取 body)
    #[error("request to {uri} failed: {message}")]
    Request {
        /// 轮询 URI
        uri: String,
        /// 错误消息
        message: String,
    },

    /// 轮询响应状态码非 2xx
    #[error("request to {uri} returned status {status}")]
    Status {
        /// 轮询 URI
        uri: String,
        /// HTTP 状态码
        status: u16,
    },

    /// 下游队列已关闭
    #[error("downstream queue {queue} is closed")]
    QueueClosed {
        /// 队列名
        queue: String,
    },

    /// 负载解析失败
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),
}

impl IngestionError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
