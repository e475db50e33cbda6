//! Relay statistics printed on exit.

use std::time::Duration;

use dispatcher::MetricsSnapshot as SinkSnapshot;
use ingestion::MetricsSnapshot as SourceSnapshot;

/// Statistics from a relay run
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Total duration of the run
    pub duration: Duration,

    /// Counters summed over every source
    pub sources: SourceSnapshot,

    /// Number of sources that were running
    pub active_sources: usize,

    /// Per-sink counters
    pub sinks: Vec<(String, SinkSnapshot)>,
}

impl RelayStats {
    /// Records accepted per second
    pub fn records_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.sources.records_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of queue deliveries dropped by overflow policies, in percent
    pub fn drop_rate(&self) -> f64 {
        let deliveries = self.sources.records_published * self.sinks.len().max(1) as u64;
        if deliveries > 0 {
            (self.sources.records_dropped as f64 / deliveries as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Relay Statistics                        ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Records received: {}", self.sources.records_received);
        println!("   ├─ Records published: {}", self.sources.records_published);
        println!("   ├─ Records/s: {:.2}", self.records_per_sec());
        println!("   ├─ Active sources: {}", self.active_sources);
        println!("   └─ Active sinks: {}", self.sinks.len());

        println!("\n📈 Sources");
        println!(
            "   ├─ Dropped deliveries: {} ({:.2}%)",
            self.sources.records_dropped,
            self.drop_rate()
        );
        println!("   ├─ Parse errors: {}", self.sources.parse_errors);
        println!("   ├─ Stream reconnects: {}", self.sources.reconnects);
        println!("   ├─ Poll cycles: {}", self.sources.poll_cycles);
        println!("   └─ Poll failures: {}", self.sources.poll_failures);

        if !self.sinks.is_empty() {
            println!("\n📦 Sinks");
            for (name, sink) in &self.sinks {
                println!(
                    "   ├─ {}: {} records, {} writes, {} rows, {} retries, {} failures, {} unrouted",
                    name,
                    sink.record_count,
                    sink.write_count,
                    sink.row_count,
                    sink.retry_count,
                    sink.failure_count,
                    sink.unrouted_count
                );
            }
        }

        println!();
    }
}
