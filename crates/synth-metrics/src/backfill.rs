//! One-shot historical backfill.
//!
//! Produces one sample per entity for every timestamp `now - H + k*I`,
//! `k in 0..H*3600/I`, and writes them to the relational sink only. Samples
//! for several consecutive timestamps are merged into one batch per entity
//! kind. There is no checkpoint: a restart writes the window again.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info};

use crate::config::BackfillConfig;
use crate::entity::EntityKind;
use crate::model::SampleGenerator;
use crate::sample::SampleBatch;
use crate::writer::{BatchWriter, Payload};

/// Summary of a completed backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Historical timestamps covered.
    pub timestamps: u64,
    /// Samples generated across all entities.
    pub samples: usize,
    /// Rows committed to the relational sink.
    pub rows_written: usize,
    /// Batches dropped after exhausting retries.
    pub batches_dropped: usize,
}

/// Drives the historical backfill.
#[derive(Debug, Clone)]
pub struct BackfillDriver {
    hours: u64,
    interval: Duration,
    batch_timestamps: usize,
    enabled: bool,
    writer: BatchWriter,
}

impl BackfillDriver {
    /// Creates a driver from configuration.
    #[must_use]
    pub fn new(config: &BackfillConfig, writer: BatchWriter) -> Self {
        Self {
            hours: config.hours,
            interval: config.interval(),
            batch_timestamps: config.batch_timestamps.max(1),
            enabled: config.enabled,
            writer,
        }
    }

    /// Number of timestamps a run will cover.
    #[must_use]
    pub fn timestamp_count(&self) -> u64 {
        if !self.enabled || self.interval.is_zero() {
            return 0;
        }
        self.hours.saturating_mul(3600) / self.interval.as_secs()
    }

    /// The `k`-th historical timestamp before `now`, or `None` if it falls
    /// outside the representable time range.
    #[must_use]
    pub fn timestamp_at(&self, now: DateTime<Utc>, k: u64) -> Option<DateTime<Utc>> {
        let window = TimeDelta::try_hours(i64::try_from(self.hours).ok()?)?;
        let offset = k.checked_mul(self.interval.as_secs())?;
        let offset = TimeDelta::try_seconds(i64::try_from(offset).ok()?)?;
        now.checked_sub_signed(window)?.checked_add_signed(offset)
    }

    /// Generates and writes the whole window ending at `now` (exclusive).
    pub async fn run(&self, generator: &mut SampleGenerator, now: DateTime<Utc>) -> BackfillReport {
        let total = self.timestamp_count();
        let mut report = BackfillReport::default();
        if total == 0 {
            info!("backfill skipped");
            return report;
        }

        info!(
            hours = self.hours,
            interval_secs = self.interval.as_secs(),
            timestamps = total,
            entities = generator.catalog().len(),
            sink = self.writer.sink_name(),
            "starting backfill"
        );

        let per_hour = (3600 / self.interval.as_secs()).max(1);
        let mut pending = Self::empty_batches();
        let mut pending_timestamps = 0;

        for k in 0..total {
            let Some(at) = self.timestamp_at(now, k) else {
                error!(hours = self.hours, k, "backfill timestamp out of range, stopping");
                break;
            };
            for batch in generator.generate(at) {
                report.samples += batch.len();
                let kind = batch.kind();
                if let Some(slot) = pending.iter_mut().find(|b| b.kind() == kind) {
                    if let Err(e) = slot.append(batch) {
                        error!(error = %e, "backfill batch assembly failed");
                    }
                }
            }
            pending_timestamps += 1;
            report.timestamps += 1;

            if pending_timestamps == self.batch_timestamps || k + 1 == total {
                self.flush(std::mem::replace(&mut pending, Self::empty_batches()), &mut report)
                    .await;
                pending_timestamps = 0;
            }

            if (k + 1) % per_hour == 0 {
                info!(
                    hour = (k + 1) / per_hour,
                    of = self.hours,
                    at = %at,
                    rows_written = report.rows_written,
                    "backfill progress"
                );
            }
        }

        info!(
            timestamps = report.timestamps,
            samples = report.samples,
            rows_written = report.rows_written,
            batches_dropped = report.batches_dropped,
            "backfill complete"
        );
        report
    }

    fn empty_batches() -> Vec<SampleBatch> {
        EntityKind::ALL.iter().map(|&k| SampleBatch::empty(k)).collect()
    }

    async fn flush(&self, batches: Vec<SampleBatch>, report: &mut BackfillReport) {
        for batch in batches {
            let outcome = self.writer.write(Payload::Samples(batch)).await;
            report.rows_written += outcome.rows();
            if outcome.is_dropped() {
                report.batches_dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::entity::EntityCatalog;
    use crate::model::MetricModel;
    use crate::retry::RetryPolicy;
    use crate::sink::{MemorySink, RelationalSink};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Arc;
    use test_case::test_case;

    fn generator() -> SampleGenerator {
        let model = MetricModel::from_config(&ModelConfig::default()).unwrap();
        SampleGenerator::new(model, EntityCatalog::default(), Some(11))
    }

    fn driver(hours: u64, interval_secs: u64, sink: &Arc<MemorySink>) -> BackfillDriver {
        let config = BackfillConfig {
            enabled: true,
            hours,
            interval_secs,
            batch_timestamps: 7,
        };
        let sink: Arc<dyn RelationalSink> = sink.clone();
        BackfillDriver::new(&config, BatchWriter::new(sink, RetryPolicy::no_retry()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test_case(24, 60 => 1440 ; "default window")]
    #[test_case(2, 300 => 24 ; "five minute interval")]
    #[test_case(0, 60 => 0 ; "empty window")]
    fn timestamp_count(hours: u64, interval: u64) -> u64 {
        driver(hours, interval, &Arc::new(MemorySink::new())).timestamp_count()
    }

    #[test]
    fn timestamps_start_at_window_and_exclude_now() {
        let d = driver(2, 60, &Arc::new(MemorySink::new()));
        assert_eq!(d.timestamp_at(now(), 0), Some(now() - TimeDelta::hours(2)));
        let last = d.timestamp_at(now(), d.timestamp_count() - 1);
        assert_eq!(last, Some(now() - TimeDelta::seconds(60)));
    }

    #[test_case(10_000_000_000 ; "beyond the calendar")]
    #[test_case(u64::MAX ; "beyond a signed delta")]
    fn out_of_range_timestamps_are_none(hours: u64) {
        let d = driver(hours, 3600, &Arc::new(MemorySink::new()));
        assert!(d.timestamp_count() > 0);
        assert_eq!(d.timestamp_at(now(), 0), None);
        assert_eq!(d.timestamp_at(now(), u64::MAX), None);
    }

    #[tokio::test]
    async fn out_of_range_window_stops_without_writing() {
        let sink = Arc::new(MemorySink::new());
        let report = driver(10_000_000_000, 3600, &sink)
            .run(&mut generator(), now())
            .await;

        assert_eq!(report.timestamps, 0);
        assert_eq!(sink.total_rows(), 0);
    }

    #[tokio::test]
    async fn one_sample_per_entity_per_timestamp() {
        let sink = Arc::new(MemorySink::new());
        let d = driver(2, 60, &sink);
        let mut generator = generator();

        let report = d.run(&mut generator, now()).await;
        assert_eq!(report.timestamps, 120);
        assert_eq!(report.samples, 120 * generator.catalog().len());
        assert_eq!(report.rows_written, report.samples);
        assert_eq!(report.batches_dropped, 0);

        let mut per_server: HashMap<String, usize> = HashMap::new();
        for row in sink.rows("server_metrics") {
            let name = row["server_name"].as_str().unwrap().to_string();
            *per_server.entry(name).or_default() += 1;
        }
        assert_eq!(per_server.len(), 5);
        assert!(per_server.values().all(|&n| n == 120));
        assert_eq!(sink.row_count("application_metrics"), 120 * 5);
        assert_eq!(sink.row_count("business_metrics"), 120);
        assert_eq!(sink.row_count("http_checks"), 0);
    }

    #[tokio::test]
    async fn disabled_backfill_writes_nothing() {
        let sink = Arc::new(MemorySink::new());
        let config = BackfillConfig {
            enabled: false,
            ..BackfillConfig::default()
        };
        let writer = BatchWriter::new(sink.clone(), RetryPolicy::no_retry());
        let report = BackfillDriver::new(&config, writer)
            .run(&mut generator(), now())
            .await;

        assert_eq!(report, BackfillReport::default());
        assert_eq!(sink.total_rows(), 0);
    }

    #[tokio::test]
    async fn failed_batches_are_dropped_and_counted() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(2);
        let d = driver(1, 600, &sink);

        let report = d.run(&mut generator(), now()).await;
        assert_eq!(report.timestamps, 6);
        assert_eq!(report.batches_dropped, 2);
        assert!(report.rows_written < report.samples);
        assert_eq!(sink.total_rows(), report.rows_written);
    }
}
