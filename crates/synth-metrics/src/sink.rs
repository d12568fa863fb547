//! Sink traits and the in-memory relational sink.
//!
//! Every destination for generated data implements [`SampleSink`]. Sinks that
//! also persist probe check results implement [`RelationalSink`]. Calls are
//! synchronous; async callers run relational sinks on the blocking pool.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{GeneratorError, Result};
use crate::probes::ProbeBatch;
use crate::sample::SampleBatch;

/// Destination for sample batches.
pub trait SampleSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Accepts one batch, all or nothing, and returns the number of rows taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be stored. A failed call
    /// leaves no sample of the batch behind.
    fn accept(&self, batch: &SampleBatch) -> Result<usize>;
}

/// A sink backed by the relational time-series tables.
pub trait RelationalSink: SampleSink {
    /// Stores one tick of probe results, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the results could not be stored.
    fn accept_probes(&self, batch: &ProbeBatch) -> Result<usize>;
}

/// Table names the probe results are written to.
pub const PROBE_TABLES: [&str; 5] = [
    "http_checks",
    "ping_checks",
    "dns_checks",
    "tcp_checks",
    "monitoring_events",
];

/// Records rows per table in memory.
///
/// Backs `--dry-run` and tests. Failures can be injected with
/// [`fail_next`](Self::fail_next).
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RwLock<BTreeMap<String, Vec<serde_json::Value>>>,
    failures: AtomicU32,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Rows stored in `table`.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }

    /// Rows stored across all tables.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.tables.read().values().map(Vec::len).sum()
    }

    /// A copy of the rows stored in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    fn check_failure(&self, table: &str) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(GeneratorError::WriteFailed {
                table: table.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn to_rows<T: Serialize>(table: &str, items: &[T]) -> Result<Vec<serde_json::Value>> {
        items
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| GeneratorError::WriteFailed {
                table: table.to_string(),
                reason: e.to_string(),
            })
    }
}

impl SampleSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn accept(&self, batch: &SampleBatch) -> Result<usize> {
        let table = batch.table();
        self.check_failure(table)?;

        let rows = match batch {
            SampleBatch::Server(v) => Self::to_rows(table, v)?,
            SampleBatch::Application(v) => Self::to_rows(table, v)?,
            SampleBatch::Business(v) => Self::to_rows(table, v)?,
        };
        let count = rows.len();
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(count)
    }
}

impl RelationalSink for MemorySink {
    fn accept_probes(&self, batch: &ProbeBatch) -> Result<usize> {
        self.check_failure("probes")?;

        let per_table = [
            Self::to_rows(PROBE_TABLES[0], &batch.http)?,
            Self::to_rows(PROBE_TABLES[1], &batch.ping)?,
            Self::to_rows(PROBE_TABLES[2], &batch.dns)?,
            Self::to_rows(PROBE_TABLES[3], &batch.tcp)?,
            Self::to_rows(PROBE_TABLES[4], &batch.events)?,
        ];

        let mut tables = self.tables.write();
        let mut count = 0;
        for (table, rows) in PROBE_TABLES.iter().zip(per_table) {
            count += rows.len();
            tables.entry((*table).to_string()).or_default().extend(rows);
        }
        Ok(count)
    }
}
