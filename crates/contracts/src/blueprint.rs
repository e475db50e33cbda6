//! RelayBlueprint - Config Loader 输出
//!
//! 描述完整的中继配置：Mist 连接、数据源、sink 以及每个数据源的路由。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use validator::Validate;

use crate::{ContractError, DataLayout, MetricField, Route, RouteTable};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的中继配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelayBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// Mist 云端连接
    #[validate(nested)]
    pub mist: MistConfig,

    /// 输出 sink 列表
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,

    /// 数据源列表 (websocket 频道或轮询 URI)
    #[serde(default)]
    #[validate(nested)]
    pub datasources: Vec<DataSourceConfig>,
}

/// Mist 连接配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MistConfig {
    /// API 主机 (e.g., "api.mist.com")，可带 scheme
    #[validate(length(min = 1, message = "endpoint must not be empty"))]
    pub endpoint: String,

    /// API token，可由命令行或环境变量覆盖
    #[serde(default)]
    pub api_key: String,
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink 名称
    #[validate(length(min = 1, message = "sink name must not be empty"))]
    pub name: String,

    /// Sink 种类 (结构化时序库 / 原始消息)
    pub kind: SinkKind,

    /// 驱动
    pub driver: SinkDriver,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1, message = "queue_capacity must be > 0"))]
    pub queue_capacity: usize,

    /// 队列满时的策略
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// 驱动特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    128
}

/// Sink 种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// 结构化行写入 (时序数据库)
    Tsdb,
    /// 原始负载发布 (消息总线)
    Pubsub,
}

/// Sink 驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkDriver {
    /// 日志输出
    Log,
    /// 文件输出 (JSON lines)
    File,
    /// InfluxDB v2 line protocol
    Influx,
    /// Kafka producer
    Kafka,
}

impl SinkDriver {
    /// 驱动是否支持该 sink 种类
    pub fn supports(self, kind: SinkKind) -> bool {
        match self {
            Self::Log | Self::File => true,
            Self::Influx => kind == SinkKind::Tsdb,
            Self::Kafka => kind == SinkKind::Pubsub,
        }
    }
}

/// 背压策略 (队列满时)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 等待队列有空位
    #[default]
    Block,
    /// 丢弃最新的记录
    DropNewest,
    /// 丢弃最旧的记录
    DropOldest,
}

/// 数据源获取方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// websocket 订阅
    #[default]
    Stream,
    /// HTTP 轮询
    Poll,
}

/// 数据源配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DataSourceConfig {
    /// 频道名或轮询 URI
    #[validate(length(min = 1, message = "stream must not be empty"))]
    pub stream: String,

    /// 获取方式
    #[serde(default)]
    pub source: SourceKind,

    /// 负载布局
    pub layout: DataLayout,

    /// 轮询间隔 (秒)，仅轮询数据源使用
    #[serde(default)]
    pub interval_secs: u64,

    /// 条目唯一键，数组布局必填
    #[serde(default)]
    pub unique_key: Option<String>,

    /// 变化检测字段
    #[serde(default)]
    pub watch_keys: Vec<String>,

    /// 时序库路由
    #[serde(default)]
    #[validate(nested)]
    pub tsdb: Option<TsdbRouteConfig>,

    /// 消息总线路由
    #[serde(default)]
    #[validate(nested)]
    pub pubsub: Option<PubsubRouteConfig>,
}

/// 时序库路由
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TsdbRouteConfig {
    #[validate(length(min = 1, message = "table must not be empty"))]
    pub table: String,

    /// 维度字段
    #[serde(default)]
    pub keys: Vec<String>,

    /// 度量字段
    #[serde(default)]
    pub metrics: Vec<MetricField>,
}

/// 消息总线路由
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PubsubRouteConfig {
    #[validate(length(min = 1, message = "topic must not be empty"))]
    pub topic: String,

    /// 附加到每条消息的静态头
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RelayBlueprint {
    /// 为指定 sink 种类构建路由
    ///
    /// 没有对应路由段的数据源不产生路由，其记录会被 writer 丢弃。
    pub fn routes_for(&self, kind: SinkKind) -> Vec<Route> {
        self.datasources
            .iter()
            .filter_map(|ds| match kind {
                SinkKind::Tsdb => ds.tsdb.as_ref().map(|tsdb| {
                    Route::rows(
                        &ds.stream,
                        ds.layout,
                        &tsdb.table,
                        tsdb.keys.clone(),
                        tsdb.metrics.clone(),
                    )
                }),
                SinkKind::Pubsub => ds.pubsub.as_ref().map(|pubsub| {
                    Route::raw(
                        &ds.stream,
                        ds.layout,
                        &pubsub.topic,
                        pubsub
                            .headers
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    )
                }),
            })
            .collect()
    }

    /// 构建不可变路由表
    pub fn route_table(&self, kind: SinkKind) -> Result<RouteTable, ContractError> {
        RouteTable::new(self.routes_for(kind))
    }

    /// websocket 订阅的数据源
    pub fn stream_sources(&self) -> impl Iterator<Item = &DataSourceConfig> {
        self.datasources
            .iter()
            .filter(|ds| ds.source == SourceKind::Stream)
    }

    /// 轮询的数据源
    pub fn poll_sources(&self) -> impl Iterator<Item = &DataSourceConfig> {
        self.datasources
            .iter()
            .filter(|ds| ds.source == SourceKind::Poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricType, WriteMode};

    fn sample_blueprint() -> RelayBlueprint {
        RelayBlueprint {
            version: ConfigVersion::V1,
            mist: MistConfig {
                endpoint: "api.mist.com".into(),
                api_key: "secret".into(),
            },
            sinks: vec![],
            datasources: vec![
                DataSourceConfig {
                    stream: "/sites/s1/stats/clients".into(),
                    source: SourceKind::Stream,
                    layout: DataLayout::StatsClient,
                    interval_secs: 0,
                    unique_key: None,
                    watch_keys: vec![],
                    tsdb: Some(TsdbRouteConfig {
                        table: "clients".into(),
                        keys: vec!["mac".into()],
                        metrics: vec![MetricField::new("rssi", MetricType::Bigint)],
                    }),
                    pubsub: Some(PubsubRouteConfig {
                        topic: "mist.clients".into(),
                        headers: BTreeMap::from([("site".into(), "s1".into())]),
                    }),
                },
                DataSourceConfig {
                    stream: "/api/v1/sites/s1/zones".into(),
                    source: SourceKind::Poll,
                    layout: DataLayout::Zones,
                    interval_secs: 30,
                    unique_key: Some("id".into()),
                    watch_keys: vec!["name".into()],
                    tsdb: None,
                    pubsub: Some(PubsubRouteConfig {
                        topic: "mist.zones".into(),
                        headers: BTreeMap::new(),
                    }),
                },
            ],
        }
    }

    #[test]
    fn test_routes_for_each_kind() {
        let bp = sample_blueprint();

        let tsdb = bp.routes_for(SinkKind::Tsdb);
        assert_eq!(tsdb.len(), 1);
        assert_eq!(tsdb[0].destination, "clients");
        assert_eq!(tsdb[0].mode, WriteMode::Rows);

        let pubsub = bp.routes_for(SinkKind::Pubsub);
        assert_eq!(pubsub.len(), 2);
        assert!(pubsub.iter().all(|r| r.mode == WriteMode::Raw));
        assert_eq!(pubsub[0].headers, vec![("site".into(), "s1".into())]);
    }

    #[test]
    fn test_source_partition() {
        let bp = sample_blueprint();
        assert_eq!(bp.stream_sources().count(), 1);
        assert_eq!(bp.poll_sources().count(), 1);
    }

    #[test]
    fn test_derive_validation_catches_empty_fields() {
        let mut bp = sample_blueprint();
        assert!(bp.validate().is_ok());
        bp.mist.endpoint.clear();
        assert!(bp.validate().is_err());
    }

    #[test]
    fn test_driver_kind_support() {
        assert!(SinkDriver::Influx.supports(SinkKind::Tsdb));
        assert!(!SinkDriver::Influx.supports(SinkKind::Pubsub));
        assert!(SinkDriver::Kafka.supports(SinkKind::Pubsub));
        assert!(SinkDriver::File.supports(SinkKind::Pubsub));
    }
}
