//! Retried relational writes off the async runtime.
//!
//! Sinks are synchronous, so each attempt runs on the blocking pool. A batch
//! that still fails after the policy's attempts is logged and dropped; the
//! caller carries on with the next one.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{GeneratorError, Result};
use crate::exporter::MetricsExporter;
use crate::probes::ProbeBatch;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::sample::SampleBatch;
use crate::sink::RelationalSink;

/// Label used for probe results in logs and counters.
pub const PROBES_LABEL: &str = "probes";

/// Data handed to a relational sink in one transaction.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Samples of one entity kind.
    Samples(SampleBatch),
    /// One tick of probe results.
    Probes(ProbeBatch),
}

impl Payload {
    /// Table (or table group) the payload targets.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Samples(batch) => batch.table(),
            Self::Probes(_) => PROBES_LABEL,
        }
    }

    /// Number of rows in the payload.
    #[must_use]
    pub fn rows(&self) -> usize {
        match self {
            Self::Samples(batch) => batch.len(),
            Self::Probes(batch) => batch.len(),
        }
    }

    fn write_to(&self, sink: &dyn RelationalSink) -> Result<usize> {
        match self {
            Self::Samples(batch) => sink.accept(batch),
            Self::Probes(batch) => sink.accept_probes(batch),
        }
    }
}

/// What happened to one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Committed, with the number of rows written.
    Written(usize),
    /// Dropped after the given number of failed attempts.
    Dropped {
        /// Attempts made.
        attempts: u32,
    },
}

impl WriteOutcome {
    /// Rows committed, zero if dropped.
    #[must_use]
    pub const fn rows(self) -> usize {
        match self {
            Self::Written(rows) => rows,
            Self::Dropped { .. } => 0,
        }
    }

    /// Returns `true` if the payload was dropped.
    #[must_use]
    pub const fn is_dropped(self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

/// Writes payloads to a relational sink with bounded retries.
#[derive(Clone)]
pub struct BatchWriter {
    sink: Arc<dyn RelationalSink>,
    policy: RetryPolicy,
    exporter: Option<Arc<MetricsExporter>>,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("sink", &self.sink.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BatchWriter {
    /// Creates a writer for `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn RelationalSink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            exporter: None,
        }
    }

    /// Counts written rows and dropped batches on `exporter`.
    #[must_use]
    pub fn with_exporter(mut self, exporter: Arc<MetricsExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Name of the underlying sink.
    #[must_use]
    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Writes one payload, retrying per the policy, and never fails.
    pub async fn write(&self, payload: Payload) -> WriteOutcome {
        if payload.rows() == 0 {
            return WriteOutcome::Written(0);
        }

        let label = payload.label();
        let rows = payload.rows();
        let payload = Arc::new(payload);

        let result = retry_with_backoff(
            &self.policy,
            || {
                let sink = Arc::clone(&self.sink);
                let payload = Arc::clone(&payload);
                async move {
                    tokio::task::spawn_blocking(move || payload.write_to(sink.as_ref()))
                        .await
                        .map_err(GeneratorError::from)
                        .and_then(|r| r)
                }
            },
            |attempt, e: &GeneratorError| {
                debug!(table = label, attempt, error = %e, "write attempt failed");
            },
        )
        .await;

        match result {
            Ok(written) => {
                if let Some(exporter) = &self.exporter {
                    exporter.record_rows_written(label, written);
                }
                WriteOutcome::Written(written)
            }
            Err(exhausted) => {
                warn!(
                    table = label,
                    rows,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "dropping batch after failed writes"
                );
                if let Some(exporter) = &self.exporter {
                    exporter.record_batch_dropped(label);
                }
                WriteOutcome::Dropped {
                    attempts: exhausted.attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::sample::BusinessSample;
    use crate::sink::MemorySink;
    use chrono::Utc;
    use std::time::Duration;

    fn business_batch() -> SampleBatch {
        SampleBatch::Business(vec![BusinessSample {
            time: Utc::now(),
            metric_type: "sales".to_string(),
            revenue: 4200.0,
            transactions: 90,
            conversion_rate: 0.04,
        }])
    }

    fn writer(sink: &Arc<MemorySink>, attempts: u32) -> BatchWriter {
        let sink: Arc<dyn RelationalSink> = Arc::clone(sink) as Arc<dyn RelationalSink>;
        BatchWriter::new(sink, RetryPolicy::fixed(Duration::from_millis(1), attempts))
    }

    #[tokio::test]
    async fn writes_through_on_success() {
        let sink = Arc::new(MemorySink::new());
        let outcome = writer(&sink, 3).write(Payload::Samples(business_batch())).await;

        assert_eq!(outcome, WriteOutcome::Written(1));
        assert_eq!(sink.row_count("business_metrics"), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(2);

        let outcome = writer(&sink, 3).write(Payload::Samples(business_batch())).await;
        assert_eq!(outcome, WriteOutcome::Written(1));
        assert_eq!(sink.row_count("business_metrics"), 1);
    }

    #[tokio::test]
    async fn drops_after_exhausting_attempts() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(5);
        let exporter = Arc::new(MetricsExporter::new());

        let outcome = writer(&sink, 3)
            .with_exporter(Arc::clone(&exporter))
            .write(Payload::Samples(business_batch()))
            .await;

        assert_eq!(outcome, WriteOutcome::Dropped { attempts: 3 });
        assert!(outcome.is_dropped());
        assert_eq!(outcome.rows(), 0);
        assert_eq!(sink.total_rows(), 0);
        assert!(
            exporter
                .encode()
                .contains("synthgen_batches_dropped_total{table=\"business_metrics\"} 1")
        );
    }

    #[tokio::test]
    async fn empty_payload_is_a_no_op() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(1);

        let outcome = writer(&sink, 1)
            .write(Payload::Samples(SampleBatch::empty(EntityKind::Server)))
            .await;
        assert_eq!(outcome, WriteOutcome::Written(0));
    }

    #[test]
    fn payload_labels() {
        assert_eq!(Payload::Samples(business_batch()).label(), "business_metrics");
        assert_eq!(Payload::Probes(ProbeBatch::default()).label(), PROBES_LABEL);
    }
}
