//! Samples and sample batches.
//!
//! A [`Sample`] is one timestamped tuple of metric values for one entity.
//! Every kind has its own struct so a sink can never receive a tuple with a
//! missing field. A [`SampleBatch`] groups samples of a single kind and is the
//! unit handed to every sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};
use crate::error::{GeneratorError, Result};

/// Valid range for percentage metrics.
pub const PERCENT_RANGE: (f64, f64) = (0.0, 100.0);

/// Valid range for the conversion rate, expressed as a fraction.
pub const FRACTION_RANGE: (f64, f64) = (0.0, 1.0);

/// Metrics for one server at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSample {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Server host name.
    pub server_name: String,
    /// CPU usage percentage, 0-100.
    pub cpu_usage: f64,
    /// Memory usage percentage, 0-100.
    pub memory_usage: f64,
    /// Disk usage percentage, 0-100.
    pub disk_usage: f64,
    /// Inbound network throughput in KB/s.
    pub network_in: f64,
    /// Outbound network throughput in KB/s.
    pub network_out: f64,
}

/// Metrics for one application at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSample {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Application name.
    pub app_name: String,
    /// Requests served during the interval.
    pub request_count: i64,
    /// Failed requests, never more than `request_count`.
    pub error_count: i64,
    /// Mean response time in milliseconds.
    pub response_time: f64,
    /// Concurrently active users.
    pub active_users: i64,
}

/// Metrics for one business channel at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSample {
    /// Sample time.
    pub time: DateTime<Utc>,
    /// Channel name, stored as `metric_type`.
    pub metric_type: String,
    /// Revenue during the interval.
    pub revenue: f64,
    /// Completed transactions.
    pub transactions: i64,
    /// Conversion rate as a fraction, 0-1.
    pub conversion_rate: f64,
}

/// One timestamped tuple of metric values for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    /// A server sample.
    Server(ServerSample),
    /// An application sample.
    Application(ApplicationSample),
    /// A business channel sample.
    Business(BusinessSample),
}

impl Sample {
    /// The sample's timestamp.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Self::Server(s) => s.time,
            Self::Application(s) => s.time,
            Self::Business(s) => s.time,
        }
    }

    /// The entity kind this sample belongs to.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Server(_) => EntityKind::Server,
            Self::Application(_) => EntityKind::Application,
            Self::Business(_) => EntityKind::BusinessChannel,
        }
    }

    /// The entity this sample belongs to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Server(s) => Entity::Server(s.server_name.clone()),
            Self::Application(s) => Entity::Application(s.app_name.clone()),
            Self::Business(s) => Entity::BusinessChannel(s.metric_type.clone()),
        }
    }

    /// Checks every value against its declared range.
    ///
    /// Generation clamps every value, so a failure here is a defect in the
    /// model rather than a runtime condition.
    ///
    /// # Errors
    ///
    /// Returns `GeneratorError::OutOfRange` naming the first offending metric.
    pub fn check_bounds(&self) -> Result<()> {
        let entity = || self.entity().name().to_string();
        let check = |metric: &'static str, value: f64, (lo, hi): (f64, f64)| {
            if value.is_finite() && value >= lo && value <= hi {
                Ok(())
            } else {
                Err(GeneratorError::OutOfRange {
                    entity: entity(),
                    metric,
                    value,
                })
            }
        };
        let non_negative = (0.0, f64::MAX);

        match self {
            Self::Server(s) => {
                check("cpu_usage", s.cpu_usage, PERCENT_RANGE)?;
                check("memory_usage", s.memory_usage, PERCENT_RANGE)?;
                check("disk_usage", s.disk_usage, PERCENT_RANGE)?;
                check("network_in", s.network_in, non_negative)?;
                check("network_out", s.network_out, non_negative)
            }
            Self::Application(s) => {
                check("request_count", s.request_count as f64, non_negative)?;
                check(
                    "error_count",
                    s.error_count as f64,
                    (0.0, s.request_count as f64),
                )?;
                check("response_time", s.response_time, non_negative)?;
                check("active_users", s.active_users as f64, non_negative)
            }
            Self::Business(s) => {
                check("revenue", s.revenue, non_negative)?;
                check("transactions", s.transactions as f64, non_negative)?;
                check("conversion_rate", s.conversion_rate, FRACTION_RANGE)
            }
        }
    }
}

/// A homogeneous batch of samples of one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "samples", rename_all = "snake_case")]
pub enum SampleBatch {
    /// Server samples, written to `server_metrics`.
    Server(Vec<ServerSample>),
    /// Application samples, written to `application_metrics`.
    Application(Vec<ApplicationSample>),
    /// Business samples, written to `business_metrics`.
    Business(Vec<BusinessSample>),
}

impl SampleBatch {
    /// Creates an empty batch for the given kind.
    #[must_use]
    pub const fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Server => Self::Server(Vec::new()),
            EntityKind::Application => Self::Application(Vec::new()),
            EntityKind::BusinessChannel => Self::Business(Vec::new()),
        }
    }

    /// The entity kind of every sample in the batch.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Server(_) => EntityKind::Server,
            Self::Application(_) => EntityKind::Application,
            Self::Business(_) => EntityKind::BusinessChannel,
        }
    }

    /// The relational table this batch targets.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.kind().table()
    }

    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Server(v) => v.len(),
            Self::Application(v) => v.len(),
            Self::Business(v) => v.len(),
        }
    }

    /// Returns `true` if the batch holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample's kind differs from the batch's kind;
    /// the batch is left unchanged.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        match (self, sample) {
            (Self::Server(v), Sample::Server(s)) => v.push(s),
            (Self::Application(v), Sample::Application(s)) => v.push(s),
            (Self::Business(v), Sample::Business(s)) => v.push(s),
            (batch, sample) => {
                return Err(GeneratorError::KindMismatch {
                    sample: sample.kind(),
                    batch: batch.kind(),
                });
            }
        }
        Ok(())
    }

    /// Moves every sample of `other` into this batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batches hold different kinds.
    pub fn append(&mut self, other: Self) -> Result<()> {
        match (self, other) {
            (Self::Server(v), Self::Server(mut o)) => v.append(&mut o),
            (Self::Application(v), Self::Application(mut o)) => v.append(&mut o),
            (Self::Business(v), Self::Business(mut o)) => v.append(&mut o),
            (batch, other) => {
                return Err(GeneratorError::KindMismatch {
                    sample: other.kind(),
                    batch: batch.kind(),
                });
            }
        }
        Ok(())
    }

    /// Returns the batch's samples as [`Sample`] values.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        match self {
            Self::Server(v) => v.iter().cloned().map(Sample::Server).collect(),
            Self::Application(v) => v.iter().cloned().map(Sample::Application).collect(),
            Self::Business(v) => v.iter().cloned().map(Sample::Business).collect(),
        }
    }
}
