//! 中继指标记录模块
//!
//! 通过 `metrics` facade 记录计数器/直方图，由 Prometheus exporter 导出。
//! 未安装 recorder 时所有调用均为空操作。

use metrics::{counter, gauge, histogram};

/// 记录来源接收到一条记录
pub fn record_record_received(stream: &str, source: &'static str) {
    counter!(
        "mist_relay_records_received_total",
        "stream" => stream.to_string(),
        "source" => source
    )
    .increment(1);
}

/// 记录 fan-out 因队列满而丢弃
pub fn record_fanout_dropped(queue: &str) {
    counter!(
        "mist_relay_fanout_dropped_total",
        "queue" => queue.to_string()
    )
    .increment(1);
}

/// 记录一次轮询结果 (published / unchanged / failed / cancelled)
pub fn record_poll_cycle(uri: &str, outcome: &'static str) {
    counter!(
        "mist_relay_poll_cycles_total",
        "uri" => uri.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// 记录 websocket 重连
pub fn record_stream_reconnect(url: &str) {
    counter!(
        "mist_relay_stream_reconnects_total",
        "url" => url.to_string()
    )
    .increment(1);
}

/// 记录一次 sink 写入 (一个批次或一条原始负载)
pub fn record_sink_write(sink: &str, rows: usize, latency_ms: f64, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mist_relay_sink_writes_total",
        "sink" => sink.to_string(),
        "status" => status
    )
    .increment(1);
    if success && rows > 0 {
        counter!("mist_relay_sink_rows_total", "sink" => sink.to_string()).increment(rows as u64);
    }
    histogram!("mist_relay_sink_write_latency_ms", "sink" => sink.to_string()).record(latency_ms);
}

/// 记录写入失败后的重连重试
pub fn record_sink_retry(sink: &str) {
    counter!("mist_relay_sink_retries_total", "sink" => sink.to_string()).increment(1);
}

/// 记录无路由而被丢弃的记录
pub fn record_unrouted(sink: &str, stream: &str) {
    counter!(
        "mist_relay_unrouted_records_total",
        "sink" => sink.to_string(),
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// 记录 sink 队列深度
pub fn record_queue_depth(sink: &str, depth: usize) {
    gauge!("mist_relay_queue_depth", "sink" => sink.to_string()).set(depth as f64);
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
