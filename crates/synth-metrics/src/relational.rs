//! PostgreSQL / TimescaleDB sink.
//!
//! Rows go through a small r2d2 pool. Every batch is one transaction, so a
//! failed write leaves nothing behind and can be retried as a whole.
//! Parameters carry explicit casts so the inserts work whether a column was
//! declared as a float, integer or numeric type.

use std::time::Duration;

use postgres::Transaction;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use r2d2_postgres::postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{GeneratorError, Result};
use crate::probes::ProbeBatch;
use crate::retry::retry_with_backoff;
use crate::sample::{ApplicationSample, BusinessSample, SampleBatch, ServerSample};
use crate::schema::{self, SchemaReport};
use crate::sink::{RelationalSink, SampleSink};

type Manager = PostgresConnectionManager<NoTls>;

const INSERT_SERVER: &str = "INSERT INTO server_metrics \
    (time, server_name, cpu_usage, memory_usage, disk_usage, network_in, network_out) \
    VALUES ($1::timestamptz, $2::text, $3::float8, $4::float8, $5::float8, $6::float8, $7::float8)";

const INSERT_APPLICATION: &str = "INSERT INTO application_metrics \
    (time, app_name, request_count, error_count, response_time, active_users) \
    VALUES ($1::timestamptz, $2::text, $3::int8, $4::int8, $5::float8, $6::int8)";

const INSERT_BUSINESS: &str = "INSERT INTO business_metrics \
    (time, metric_type, revenue, transactions, conversion_rate) \
    VALUES ($1::timestamptz, $2::text, $3::float8, $4::int8, $5::float8)";

const INSERT_HTTP: &str = "INSERT INTO http_checks \
    (time, check_name, target_url, probe_name, status_code, response_time_ms, success, \
     ssl_expiry_days, dns_time_ms, connect_time_ms, error_message) \
    VALUES ($1::timestamptz, $2::text, $3::text, $4::text, $5::int4, $6::float8, $7::bool, \
     $8::int4, $9::float8, $10::float8, $11::text)";

const INSERT_PING: &str = "INSERT INTO ping_checks \
    (time, check_name, target_host, probe_name, latency_ms, packet_loss, success, error_message) \
    VALUES ($1::timestamptz, $2::text, $3::text, $4::text, $5::float8, $6::float8, $7::bool, $8::text)";

const INSERT_DNS: &str = "INSERT INTO dns_checks \
    (time, check_name, target_domain, probe_name, resolution_time_ms, success, resolved_ips, error_message) \
    VALUES ($1::timestamptz, $2::text, $3::text, $4::text, $5::float8, $6::bool, $7::text[], $8::text)";

const INSERT_TCP: &str = "INSERT INTO tcp_checks \
    (time, check_name, target_host, target_port, probe_name, connect_time_ms, success, error_message) \
    VALUES ($1::timestamptz, $2::text, $3::text, $4::int4, $5::text, $6::float8, $7::bool, $8::text)";

const INSERT_EVENT: &str = "INSERT INTO monitoring_events \
    (time, event_type, severity, check_name, probe_name, message, details, resolved) \
    VALUES ($1::timestamptz, $2::text, $3::text, $4::text, $5::text, $6::text, $7::jsonb, $8::bool)";

/// Pooled PostgreSQL sink.
#[derive(Clone)]
pub struct PostgresSink {
    pool: Pool<Manager>,
    endpoint: String,
}

impl std::fmt::Debug for PostgresSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("PostgresSink")
            .field("endpoint", &self.endpoint)
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

impl PostgresSink {
    /// Builds the pool without opening any connection.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = PostgresConnectionManager::new(config.pg_config()?, NoTls);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.connect_delay_secs.max(1)))
            .build_unchecked(manager);

        Ok(Self {
            pool,
            endpoint: config.endpoint(),
        })
    }

    /// Builds the pool and waits until the database answers.
    ///
    /// Retries per [`DatabaseConfig::connect_policy`]; once the attempts are
    /// used up this returns [`GeneratorError::ConnectionFailed`].
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let sink = Self::new(config)?;
        let policy = config.connect_policy();
        info!(endpoint = %sink.endpoint, attempts = policy.max_attempts, "connecting to database");

        retry_with_backoff(
            &policy,
            || {
                let sink = sink.clone();
                async move {
                    tokio::task::spawn_blocking(move || sink.ping())
                        .await
                        .map_err(GeneratorError::from)
                        .and_then(|r| r)
                }
            },
            |attempt, e: &GeneratorError| {
                warn!(attempt, max = policy.max_attempts, error = %e, "database not reachable");
            },
        )
        .await
        .map_err(|exhausted| GeneratorError::ConnectionFailed {
            attempts: exhausted.attempts,
            reason: exhausted.last_error.to_string(),
        })?;

        info!(endpoint = %sink.endpoint, "database connected");
        Ok(sink)
    }

    /// Runs `SELECT 1` on a pooled connection.
    pub fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        conn.simple_query("SELECT 1")?;
        Ok(())
    }

    /// Creates the tables the generator writes to.
    pub fn create_schema(&self) -> Result<SchemaReport> {
        let mut conn = self.conn()?;
        schema::bootstrap(&mut *conn)
    }

    /// Target description without credentials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn conn(&self) -> Result<PooledConnection<Manager>> {
        Ok(self.pool.get()?)
    }

    fn insert_servers(tx: &mut Transaction<'_>, samples: &[ServerSample]) -> Result<()> {
        let stmt = tx.prepare(INSERT_SERVER)?;
        for s in samples {
            tx.execute(
                &stmt,
                &[
                    &s.time,
                    &s.server_name,
                    &s.cpu_usage,
                    &s.memory_usage,
                    &s.disk_usage,
                    &s.network_in,
                    &s.network_out,
                ],
            )?;
        }
        Ok(())
    }

    fn insert_applications(tx: &mut Transaction<'_>, samples: &[ApplicationSample]) -> Result<()> {
        let stmt = tx.prepare(INSERT_APPLICATION)?;
        for s in samples {
            tx.execute(
                &stmt,
                &[
                    &s.time,
                    &s.app_name,
                    &s.request_count,
                    &s.error_count,
                    &s.response_time,
                    &s.active_users,
                ],
            )?;
        }
        Ok(())
    }

    fn insert_business(tx: &mut Transaction<'_>, samples: &[BusinessSample]) -> Result<()> {
        let stmt = tx.prepare(INSERT_BUSINESS)?;
        for s in samples {
            tx.execute(
                &stmt,
                &[
                    &s.time,
                    &s.metric_type,
                    &s.revenue,
                    &s.transactions,
                    &s.conversion_rate,
                ],
            )?;
        }
        Ok(())
    }

    fn insert_probes(tx: &mut Transaction<'_>, batch: &ProbeBatch) -> Result<()> {
        let stmt = tx.prepare(INSERT_HTTP)?;
        for r in &batch.http {
            tx.execute(
                &stmt,
                &[
                    &r.time,
                    &r.check_name,
                    &r.target_url,
                    &r.probe_name,
                    &r.status_code,
                    &r.response_time_ms,
                    &r.success,
                    &r.ssl_expiry_days,
                    &r.dns_time_ms,
                    &r.connect_time_ms,
                    &r.error_message,
                ],
            )?;
        }

        let stmt = tx.prepare(INSERT_PING)?;
        for r in &batch.ping {
            tx.execute(
                &stmt,
                &[
                    &r.time,
                    &r.check_name,
                    &r.target_host,
                    &r.probe_name,
                    &r.latency_ms,
                    &r.packet_loss,
                    &r.success,
                    &r.error_message,
                ],
            )?;
        }

        let stmt = tx.prepare(INSERT_DNS)?;
        for r in &batch.dns {
            tx.execute(
                &stmt,
                &[
                    &r.time,
                    &r.check_name,
                    &r.target_domain,
                    &r.probe_name,
                    &r.resolution_time_ms,
                    &r.success,
                    &r.resolved_ips,
                    &r.error_message,
                ],
            )?;
        }

        let stmt = tx.prepare(INSERT_TCP)?;
        for r in &batch.tcp {
            tx.execute(
                &stmt,
                &[
                    &r.time,
                    &r.check_name,
                    &r.target_host,
                    &r.target_port,
                    &r.probe_name,
                    &r.connect_time_ms,
                    &r.success,
                    &r.error_message,
                ],
            )?;
        }

        let stmt = tx.prepare(INSERT_EVENT)?;
        for e in &batch.events {
            tx.execute(
                &stmt,
                &[
                    &e.time,
                    &e.event_type,
                    &e.severity.as_str(),
                    &e.check_name,
                    &e.probe_name,
                    &e.message,
                    &e.details,
                    &e.resolved,
                ],
            )?;
        }
        Ok(())
    }
}

impl SampleSink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn accept(&self, batch: &SampleBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        match batch {
            SampleBatch::Server(v) => Self::insert_servers(&mut tx, v)?,
            SampleBatch::Application(v) => Self::insert_applications(&mut tx, v)?,
            SampleBatch::Business(v) => Self::insert_business(&mut tx, v)?,
        }
        tx.commit()?;

        debug!(table = batch.table(), rows = batch.len(), "batch committed");
        Ok(batch.len())
    }
}

impl RelationalSink for PostgresSink {
    fn accept_probes(&self, batch: &ProbeBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        Self::insert_probes(&mut tx, batch)?;
        tx.commit()?;

        debug!(rows = batch.len(), "probe results committed");
        Ok(batch.len())
    }
}
