//! Prometheus exposition of the latest generated values.
//!
//! The exporter keeps one gauge per (entity, metric) and overwrites it on
//! every accepted batch, so a scrape always sees the most recent tick. It also
//! carries the generator's own counters (ticks, rows written, dropped batches)
//! and a tick duration histogram.
//!
//! # Example
//!
//! ```rust
//! use synth_metrics::exporter::MetricsExporter;
//!
//! let exporter = MetricsExporter::new();
//! exporter.record_tick(std::time::Duration::from_millis(40));
//!
//! let output = exporter.encode();
//! assert!(output.contains("synthgen_ticks_total 1"));
//! ```

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::error::Result;
use crate::sample::{ApplicationSample, BusinessSample, SampleBatch, ServerSample};
use crate::sink::SampleSink;

type FloatGauge = Gauge<f64, AtomicU64>;

/// Label set for server metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServerLabels {
    /// Server host name.
    pub server: String,
}

/// Label set for per-application metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AppLabels {
    /// Application name.
    pub app: String,
}

/// Label set for request counts split by outcome.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Application name.
    pub app: String,
    /// `200` for successful requests, `500` for errors.
    pub status: String,
}

/// Label set for business metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChannelLabels {
    /// Business channel.
    pub channel: String,
}

/// Label set for per-table writer counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TableLabels {
    /// Relational table name.
    pub table: String,
}

#[derive(Clone, Default)]
struct ServerGauges {
    cpu: Family<ServerLabels, FloatGauge>,
    memory: Family<ServerLabels, FloatGauge>,
    disk: Family<ServerLabels, FloatGauge>,
    network_in: Family<ServerLabels, FloatGauge>,
    network_out: Family<ServerLabels, FloatGauge>,
}

#[derive(Clone, Default)]
struct ApplicationGauges {
    requests: Family<RequestLabels, FloatGauge>,
    response_time: Family<AppLabels, FloatGauge>,
    active_users: Family<AppLabels, FloatGauge>,
}

#[derive(Clone, Default)]
struct BusinessGauges {
    revenue: Family<ChannelLabels, FloatGauge>,
    transactions: Family<ChannelLabels, FloatGauge>,
    conversion_rate: Family<ChannelLabels, FloatGauge>,
}

#[derive(Clone)]
struct SelfMetrics {
    ticks: Counter,
    rows_written: Family<TableLabels, Counter>,
    batches_dropped: Family<TableLabels, Counter>,
    tick_duration_seconds: Histogram,
}

/// Current-value store served on `/metrics`.
///
/// Shared between the live driver (writer) and the HTTP server (reader)
/// through an `Arc`; every gauge is internally atomic so no outer lock is
/// held across an update.
pub struct MetricsExporter {
    registry: RwLock<Registry>,
    servers: ServerGauges,
    applications: ApplicationGauges,
    business: BusinessGauges,
    own: SelfMetrics,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("ticks", &self.own.ticks.get())
            .finish_non_exhaustive()
    }
}

impl Default for MetricsExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsExporter {
    /// Creates an exporter with every series registered and no values set.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let servers = ServerGauges::default();
        registry.register("system_cpu_usage", "CPU usage percentage", servers.cpu.clone());
        registry.register(
            "system_memory_usage",
            "Memory usage percentage",
            servers.memory.clone(),
        );
        registry.register("system_disk_usage", "Disk usage percentage", servers.disk.clone());
        registry.register(
            "system_network_in",
            "Inbound network throughput in KB/s",
            servers.network_in.clone(),
        );
        registry.register(
            "system_network_out",
            "Outbound network throughput in KB/s",
            servers.network_out.clone(),
        );

        let applications = ApplicationGauges::default();
        registry.register(
            "http_requests_total",
            "HTTP requests in the last interval by status",
            applications.requests.clone(),
        );
        registry.register(
            "http_response_time_ms",
            "HTTP response time in milliseconds",
            applications.response_time.clone(),
        );
        registry.register(
            "active_users",
            "Concurrently active users",
            applications.active_users.clone(),
        );

        let business = BusinessGauges::default();
        registry.register("business_revenue", "Revenue", business.revenue.clone());
        registry.register(
            "business_transactions",
            "Completed transactions",
            business.transactions.clone(),
        );
        registry.register(
            "business_conversion_rate",
            "Conversion rate as a fraction",
            business.conversion_rate.clone(),
        );

        // 1ms to ~16s
        let own = SelfMetrics {
            ticks: Counter::default(),
            rows_written: Family::default(),
            batches_dropped: Family::default(),
            tick_duration_seconds: Histogram::new(exponential_buckets(0.001, 2.0, 15)),
        };
        registry.register("synthgen_ticks", "Live ticks completed", own.ticks.clone());
        registry.register(
            "synthgen_rows_written",
            "Rows written to the relational store",
            own.rows_written.clone(),
        );
        registry.register(
            "synthgen_batches_dropped",
            "Batches dropped after exhausting write retries",
            own.batches_dropped.clone(),
        );
        registry.register(
            "synthgen_tick_duration_seconds",
            "Wall time spent in one live tick",
            own.tick_duration_seconds.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            servers,
            applications,
            business,
            own,
        }
    }

    /// Overwrites the current values with the samples in `batch`.
    pub fn upsert(&self, batch: &SampleBatch) {
        match batch {
            SampleBatch::Server(samples) => samples.iter().for_each(|s| self.set_server(s)),
            SampleBatch::Application(samples) => {
                samples.iter().for_each(|s| self.set_application(s));
            }
            SampleBatch::Business(samples) => samples.iter().for_each(|s| self.set_business(s)),
        }
    }

    fn set_server(&self, sample: &ServerSample) {
        let labels = ServerLabels {
            server: sample.server_name.clone(),
        };
        let g = &self.servers;
        g.cpu.get_or_create(&labels).set(sample.cpu_usage);
        g.memory.get_or_create(&labels).set(sample.memory_usage);
        g.disk.get_or_create(&labels).set(sample.disk_usage);
        g.network_in.get_or_create(&labels).set(sample.network_in);
        g.network_out.get_or_create(&labels).set(sample.network_out);
    }

    fn set_application(&self, sample: &ApplicationSample) {
        let g = &self.applications;
        let status = |code: &str| RequestLabels {
            app: sample.app_name.clone(),
            status: code.to_string(),
        };
        g.requests
            .get_or_create(&status("200"))
            .set((sample.request_count - sample.error_count) as f64);
        g.requests
            .get_or_create(&status("500"))
            .set(sample.error_count as f64);

        let labels = AppLabels {
            app: sample.app_name.clone(),
        };
        g.response_time.get_or_create(&labels).set(sample.response_time);
        g.active_users
            .get_or_create(&labels)
            .set(sample.active_users as f64);
    }

    fn set_business(&self, sample: &BusinessSample) {
        let labels = ChannelLabels {
            channel: sample.metric_type.clone(),
        };
        let g = &self.business;
        g.revenue.get_or_create(&labels).set(sample.revenue);
        g.transactions
            .get_or_create(&labels)
            .set(sample.transactions as f64);
        g.conversion_rate
            .get_or_create(&labels)
            .set(sample.conversion_rate);
    }

    /// Records a completed live tick.
    pub fn record_tick(&self, elapsed: Duration) {
        self.own.ticks.inc();
        self.own.tick_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Records rows committed to a relational table.
    pub fn record_rows_written(&self, table: &str, rows: usize) {
        self.own
            .rows_written
            .get_or_create(&TableLabels {
                table: table.to_string(),
            })
            .inc_by(rows as u64);
    }

    /// Records a batch dropped after its retries were exhausted.
    pub fn record_batch_dropped(&self, table: &str) {
        self.own
            .batches_dropped
            .get_or_create(&TableLabels {
                table: table.to_string(),
            })
            .inc();
    }

    /// Number of live ticks recorded so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.own.ticks.get()
    }

    /// Current CPU gauge for a server, if it has been set.
    #[must_use]
    pub fn server_cpu(&self, server: &str) -> Option<f64> {
        let labels = ServerLabels {
            server: server.to_string(),
        };
        self.servers.cpu.get(&labels).map(|g| g.get())
    }

    /// Encodes every series in Prometheus text format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode prometheus metrics");
            return String::new();
        }
        buffer
    }

    /// Content-Type of [`encode`](Self::encode) output.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

impl SampleSink for MetricsExporter {
    fn name(&self) -> &'static str {
        "exporter"
    }

    fn accept(&self, batch: &SampleBatch) -> Result<usize> {
        self.upsert(batch);
        Ok(batch.len())
    }
}
