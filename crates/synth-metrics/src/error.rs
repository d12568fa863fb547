//! Error types for the synth-metrics crate.

use thiserror::Error;

use crate::entity::EntityKind;

/// Errors that can occur while generating or writing synthetic data.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration was rejected.
        reason: String,
    },

    /// The relational store could not be reached.
    #[error("connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The last error observed.
        reason: String,
    },

    /// A statement against the relational store failed.
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),

    /// No pooled connection could be checked out.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema bootstrap failed.
    #[error("schema error on {table}: {reason}")]
    Schema {
        /// The table being created.
        table: String,
        /// The reason creation failed.
        reason: String,
    },

    /// A sink rejected a batch.
    #[error("write to {table} failed: {reason}")]
    WriteFailed {
        /// The target table.
        table: String,
        /// The reason the write failed.
        reason: String,
    },

    /// The metrics endpoint could not bind its listening address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// A generated value fell outside its declared range.
    #[error("{metric} out of range for {entity}: {value}")]
    OutOfRange {
        /// The entity the sample belongs to.
        entity: String,
        /// The offending metric.
        metric: &'static str,
        /// The generated value.
        value: f64,
    },

    /// A sample was added to a batch of a different kind.
    #[error("cannot add {sample} sample to {batch} batch")]
    KindMismatch {
        /// Kind of the rejected sample.
        sample: EntityKind,
        /// Kind of the batch.
        batch: EntityKind,
    },

    /// A blocking write task panicked or was cancelled.
    #[error("write task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Reading or writing a file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeneratorError {
    /// Convenience constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for generator operations.
pub type Result<T> = std::result::Result<T, GeneratorError>;
