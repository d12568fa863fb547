//! Real-time generation loop.
//!
//! Every tick samples each entity at the current time, upserts the values into
//! the exporter, then writes one batch per entity kind (and the probe results)
//! to the relational sink. Ticks run back to back on a single task; a slow
//! tick delays the next one instead of causing a burst of catch-up ticks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::exporter::MetricsExporter;
use crate::model::SampleGenerator;
use crate::probes::ProbeSimulator;
use crate::writer::{BatchWriter, Payload};

/// Result of one live tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Samples generated.
    pub samples: usize,
    /// Probe rows generated.
    pub probe_rows: usize,
    /// Rows committed to the relational sink.
    pub rows_written: usize,
    /// Batches dropped after exhausting retries.
    pub batches_dropped: usize,
}

/// Drives the live phase.
#[derive(Debug)]
pub struct LiveDriver {
    generator: SampleGenerator,
    exporter: Arc<MetricsExporter>,
    writer: BatchWriter,
    probes: Option<ProbeSimulator>,
    period: Duration,
}

impl LiveDriver {
    /// Creates a driver ticking every `period`.
    #[must_use]
    pub fn new(
        generator: SampleGenerator,
        exporter: Arc<MetricsExporter>,
        writer: BatchWriter,
        period: Duration,
    ) -> Self {
        Self {
            generator,
            exporter,
            writer,
            probes: None,
            period,
        }
    }

    /// Emits probe results on every tick.
    #[must_use]
    pub fn with_probes(mut self, probes: ProbeSimulator) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Runs a single tick at `now`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let batches = self.generator.generate(now);
        for batch in &batches {
            self.exporter.upsert(batch);
            report.samples += batch.len();
        }

        let probe_batch = self
            .probes
            .as_ref()
            .map(|p| p.simulate(now, self.generator.rng_mut()));

        let mut payloads: Vec<Payload> = batches.into_iter().map(Payload::Samples).collect();
        if let Some(probe_batch) = probe_batch {
            report.probe_rows = probe_batch.len();
            payloads.push(Payload::Probes(probe_batch));
        }

        for payload in payloads {
            let outcome = self.writer.write(payload).await;
            report.rows_written += outcome.rows();
            if outcome.is_dropped() {
                report.batches_dropped += 1;
            }
        }

        let elapsed = started.elapsed();
        self.exporter.record_tick(elapsed);
        debug!(
            samples = report.samples,
            probe_rows = report.probe_rows,
            rows_written = report.rows_written,
            dropped = report.batches_dropped,
            elapsed_ms = elapsed.as_millis() as u64,
            "tick complete"
        );
        report
    }

    /// Runs exactly `count` ticks at the configured cadence.
    pub async fn run_ticks(&mut self, count: usize) -> Vec<TickReport> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            ticker.tick().await;
            reports.push(self.tick(Utc::now()).await);
        }
        reports
    }

    /// Ticks until `shutdown` flips to `true` and returns the number of ticks run.
    ///
    /// A tick in progress always completes before shutdown is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.period.as_secs_f64(), "live generation started");

        let mut ticks = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                    ticks += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks, "live generation stopped");
        ticks
    }
}
