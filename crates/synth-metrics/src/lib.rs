//! Synthetic infrastructure, application and business metrics.
//!
//! `synth-metrics` fabricates realistic-looking observability data so a
//! Grafana stack backed by Prometheus and PostgreSQL/TimescaleDB has something
//! to display. Values follow a daily business-hours cycle with random noise and
//! occasional spikes, and are written to two sinks:
//!
//! - **Exporter**: latest value per (entity, metric), scraped from `/metrics`
//! - **Relational store**: one row per sample, one transaction per batch
//!
//! A one-shot [`BackfillDriver`] fills a historical window before the
//! [`LiveDriver`] starts ticking in real time.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use synth_metrics::{
//!     EntityCatalog, MemorySink, MetricModel, ModelConfig, SampleGenerator, SampleSink,
//! };
//!
//! let model = MetricModel::from_config(&ModelConfig::default()).unwrap();
//! let mut generator = SampleGenerator::new(model, EntityCatalog::default(), Some(42));
//!
//! let sink = Arc::new(MemorySink::new());
//! for batch in generator.generate(chrono::Utc::now()) {
//!     sink.accept(&batch).unwrap();
//! }
//! assert_eq!(sink.row_count("server_metrics"), 5);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backfill;
pub mod config;
pub mod entity;
pub mod error;
pub mod exporter;
pub mod live;
pub mod model;
pub mod probes;
pub mod relational;
pub mod retry;
pub mod sample;
pub mod schema;
pub mod server;
pub mod sink;
pub mod writer;

// Re-export main types at crate root
pub use backfill::{BackfillDriver, BackfillReport};
pub use config::{
    BackfillConfig, DatabaseConfig, EntitiesConfig, ExporterConfig, GeneratorConfig, LiveConfig,
    ModelConfig, ProbesConfig,
};
pub use entity::{Entity, EntityCatalog, EntityKind};
pub use error::{GeneratorError, Result};
pub use exporter::MetricsExporter;
pub use live::{LiveDriver, TickReport};
pub use model::{MetricModel, SampleGenerator, SeasonalProfile, SpikeProfile};
pub use probes::{MonitoringEvent, ProbeBatch, ProbeSimulator};
pub use relational::PostgresSink;
pub use retry::RetryPolicy;
pub use sample::{ApplicationSample, BusinessSample, Sample, SampleBatch, ServerSample};
pub use sink::{MemorySink, RelationalSink, SampleSink};
pub use writer::{BatchWriter, Payload, WriteOutcome};
