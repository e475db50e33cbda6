//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置 -> 路由表的契约测试
//! - 轮询 / websocket 来源到 sink 文件的端到端测试（本地 mock 服务）

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{SinkKind, WriteMode};

    const CONFIG: &str = r#"
[mist]
endpoint = "api.mist.com"
api_key = "k"

[[sinks]]
name = "tsdb"
kind = "tsdb"
driver = "log"

[[sinks]]
name = "bus"
kind = "pubsub"
driver = "log"
overflow = "drop_oldest"

[[datasources]]
stream = "/sites/s1/stats/clients"
layout = "stats_client"

[datasources.tsdb]
table = "clients"
keys = ["mac", "site_id"]
metrics = [{ name = "rssi" }, { name = "channel", type = "bigint" }]

[datasources.pubsub]
topic = "mist.clients"
headers = { source = "mist" }

[[datasources]]
stream = "/api/v1/sites/s1/maps"
source = "poll"
layout = "maps"
interval_secs = 60
unique_key = "id"
watch_keys = ["name", "width"]

[datasources.pubsub]
topic = "mist.maps"
"#;

    #[test]
    fn test_config_to_route_tables() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();

        let tsdb = blueprint.route_table(SinkKind::Tsdb).unwrap();
        assert_eq!(tsdb.len(), 1);
        let clients = tsdb.get("/sites/s1/stats/clients").unwrap();
        assert_eq!(clients.mode, WriteMode::Rows);
        assert_eq!(clients.metrics.len(), 2);

        let pubsub = blueprint.route_table(SinkKind::Pubsub).unwrap();
        assert_eq!(pubsub.len(), 2);
        let maps = pubsub.get("/api/v1/sites/s1/maps").unwrap();
        assert_eq!(maps.mode, WriteMode::Raw);
        assert_eq!(
            pubsub.get("/sites/s1/stats/clients").unwrap().headers,
            vec![("source".to_string(), "mist".to_string())]
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&blueprint).unwrap();
        let again = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(again.datasources.len(), 2);
        assert_eq!(again.sinks[1].overflow, blueprint.sinks[1].overflow);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ConfigVersion, DataLayout, DataSourceConfig, MetricField, MetricType, MistConfig,
        OverflowPolicy, PubsubRouteConfig, RelayBlueprint, Row, SinkConfig, SinkDriver,
        SinkKind, SourceKind, TsdbRouteConfig,
    };
    use dispatcher::create_dispatcher;
    use futures_util::{SinkExt, StreamExt};
    use ingestion::{
        IngestionMetrics, PollAgent, PollAgentConfig, PollOutcome, StreamClient,
        StreamClientConfig,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_util::sync::CancellationToken;

    const MAPS: &str = "/api/v1/sites/s1/maps";
    const CLIENTS: &str = "/sites/s1/stats/clients";

    fn file_sink(name: &str, kind: SinkKind, dir: &std::path::Path) -> SinkConfig {
        SinkConfig {
            name: name.into(),
            kind,
            driver: SinkDriver::File,
            queue_capacity: 16,
            overflow: OverflowPolicy::Block,
            params: HashMap::from([(
                "base_path".to_string(),
                dir.join(name).display().to_string(),
            )]),
        }
    }

    fn blueprint(endpoint: String, dir: &std::path::Path) -> RelayBlueprint {
        RelayBlueprint {
            version: ConfigVersion::V1,
            mist: MistConfig {
                endpoint,
                api_key: "secret".into(),
            },
            sinks: vec![
                file_sink("tsdb", SinkKind::Tsdb, dir),
                file_sink("bus", SinkKind::Pubsub, dir),
            ],
            datasources: vec![
                DataSourceConfig {
                    stream: MAPS.into(),
                    source: SourceKind::Poll,
                    layout: DataLayout::Maps,
                    interval_secs: 60,
                    unique_key: Some("id".into()),
                    watch_keys: vec!["width".into()],
                    tsdb: Some(TsdbRouteConfig {
                        table: "maps".into(),
                        keys: vec!["id".into()],
                        metrics: vec![
                            MetricField::new("width", MetricType::Bigint),
                            MetricField::new("name", MetricType::Varchar),
                        ],
                    }),
                    pubsub: Some(PubsubRouteConfig {
                        topic: "mist.maps".into(),
                        headers: BTreeMap::new(),
                    }),
                },
                DataSourceConfig {
                    stream: CLIENTS.into(),
                    source: SourceKind::Stream,
                    layout: DataLayout::StatsClient,
                    interval_secs: 0,
                    unique_key: None,
                    watch_keys: vec![],
                    tsdb: Some(TsdbRouteConfig {
                        table: "clients".into(),
                        keys: vec!["mac".into()],
                        metrics: vec![MetricField::new("rssi", MetricType::Double)],
                    }),
                    pubsub: None,
                },
            ],
        }
    }

    fn read_rows(path: std::path::PathBuf) -> Vec<Row> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    async fn join_writers(dispatcher: dispatcher::Dispatcher) {
        for (name, task) in dispatcher.into_tasks() {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap_or_else(|_| panic!("writer {name} did not stop"))
                .unwrap();
        }
    }

    /// End-to-end test: PollAgent -> FanOut -> BatchedWriter -> FileSink
    ///
    /// 验证完整的数据流：
    /// 1. 未变化的快照不再发布
    /// 2. 结构化 sink 每个条目每个度量一行
    /// 3. 原始 sink 按原样写出整个响应体
    #[tokio::test]
    async fn test_e2e_poll_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let blueprint = blueprint(server.url(), dir.path());

        let cancel = CancellationToken::new();
        let dispatcher = create_dispatcher(&blueprint, cancel.clone()).await.unwrap();
        let metrics = Arc::new(IngestionMetrics::new());

        let ds = blueprint.poll_sources().next().unwrap();
        let mut agent = PollAgent::new(
            PollAgentConfig {
                endpoint: blueprint.mist.endpoint.clone(),
                api_key: blueprint.mist.api_key.clone(),
                uri: ds.stream.clone(),
                layout: ds.layout,
                interval: Duration::from_secs(ds.interval_secs),
                unique_key: ds.unique_key.clone(),
                watch_keys: ds.watch_keys.clone(),
            },
            dispatcher.fanout(Arc::clone(&metrics)),
        )
        .unwrap();

        let first = r#"[{"id":"m1","width":800,"name":"HQ"},{"id":"m2","width":400}]"#;
        let second = r#"[{"id":"m1","width":800,"name":"HQ renamed"},{"id":"m2","width":400}]"#;
        let third = r#"[{"id":"m1","width":1024,"name":"HQ"}]"#;
        let expected = [
            PollOutcome::Published,
            PollOutcome::Unchanged,
            PollOutcome::Published,
        ];

        for (body, want) in [first, second, third].into_iter().zip(expected) {
            let mock = server
                .mock("GET", MAPS)
                .match_header("authorization", "token secret")
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;
            assert_eq!(agent.poll_once(&cancel).await, want);
            mock.remove_async().await;
        }

        drop(agent);
        join_writers(dispatcher).await;

        // first poll: m1 width+name, m2 width; third poll: m1 width+name
        let rows = read_rows(dir.path().join("tsdb").join("maps.jsonl"));
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.dimensions[0].0 == "id"));
        assert_eq!(rows.iter().filter(|r| r.measure == "name").count(), 2);

        let raw = std::fs::read_to_string(dir.path().join("bus").join("mist.maps.jsonl")).unwrap();
        assert_eq!(raw, format!("{first}\n{third}\n"));
        assert_eq!(metrics.snapshot().records_published, 2);
    }

    /// End-to-end test: websocket server -> StreamClient -> writers
    #[tokio::test]
    async fn test_e2e_stream_pipeline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _subscribe = ws.next().await.unwrap().unwrap();

            let frames = [
                (CLIENTS, r#"{"mac":"aa","rssi":-61.5}"#),
                ("/sites/s1/stats/devices", r#"{"mac":"ap1"}"#),
                (CLIENTS, r#"{"mac":"bb","rssi":-70}"#),
            ];
            for (channel, data) in frames {
                let frame = serde_json::json!({"event": "data", "channel": channel, "data": data});
                ws.send(Message::text(frame.to_string())).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        let dir = tempfile::tempdir().unwrap();
        let blueprint = blueprint(url, dir.path());
        let cancel = CancellationToken::new();
        let dispatcher = create_dispatcher(&blueprint, cancel.clone()).await.unwrap();
        let sink_metrics = dispatcher.sink_metrics();
        let metrics = Arc::new(IngestionMetrics::new());

        let subscriptions = blueprint.stream_sources().map(|ds| ds.stream.clone()).collect();
        let client = StreamClient::new(
            StreamClientConfig::new(&blueprint.mist.endpoint, &blueprint.mist.api_key, subscriptions),
            dispatcher.fanout(Arc::clone(&metrics)),
        )
        .unwrap();
        let client_task = tokio::spawn(client.run(cancel.clone()));

        // wait until both writers have handled all three records
        let tsdb = Arc::clone(&sink_metrics[0].1);
        let bus = Arc::clone(&sink_metrics[1].1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while tsdb.record_count() < 3 || bus.record_count() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        client_task.await.unwrap();
        join_writers(dispatcher).await;
        server.abort();

        let rows = read_rows(dir.path().join("tsdb").join("clients.jsonl"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].dimensions, vec![("mac".to_string(), "aa".to_string())]);
        assert_eq!(rows[1].dimensions, vec![("mac".to_string(), "bb".to_string())]);
        assert_eq!(tsdb.unrouted_count(), 1);

        // the clients stream has no pubsub route
        assert_eq!(bus.unrouted_count(), 3);
        assert_eq!(bus.write_count(), 0);
    }
}
