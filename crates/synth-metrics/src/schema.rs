//! Optional schema bootstrap for the relational store.
//!
//! The tables normally exist already; this only runs when
//! `database.create_schema` is set. Hypertable conversion is attempted per
//! table and skipped with a warning when TimescaleDB is not installed.

use postgres::GenericClient;
use tracing::{info, warn};

use crate::error::{GeneratorError, Result};

/// A table the generator can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// `CREATE TABLE IF NOT EXISTS` statement.
    pub ddl: &'static str,
}

/// Every table the generator writes to, plus the generic `metrics` table.
pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "server_metrics",
        ddl: "CREATE TABLE IF NOT EXISTS server_metrics (
            time TIMESTAMPTZ NOT NULL,
            server_name TEXT NOT NULL,
            cpu_usage DOUBLE PRECISION,
            memory_usage DOUBLE PRECISION,
            disk_usage DOUBLE PRECISION,
            network_in DOUBLE PRECISION,
            network_out DOUBLE PRECISION
        )",
    },
    TableDef {
        name: "application_metrics",
        ddl: "CREATE TABLE IF NOT EXISTS application_metrics (
            time TIMESTAMPTZ NOT NULL,
            app_name TEXT NOT NULL,
            request_count BIGINT,
            error_count BIGINT,
            response_time DOUBLE PRECISION,
            active_users BIGINT
        )",
    },
    TableDef {
        name: "business_metrics",
        ddl: "CREATE TABLE IF NOT EXISTS business_metrics (
            time TIMESTAMPTZ NOT NULL,
            metric_type TEXT NOT NULL,
            revenue DOUBLE PRECISION,
            transactions BIGINT,
            conversion_rate DOUBLE PRECISION
        )",
    },
    TableDef {
        name: "metrics",
        ddl: "CREATE TABLE IF NOT EXISTS metrics (
            time TIMESTAMPTZ NOT NULL,
            metric_name TEXT NOT NULL,
            value DOUBLE PRECISION,
            tags JSONB
        )",
    },
    TableDef {
        name: "http_checks",
        ddl: "CREATE TABLE IF NOT EXISTS http_checks (
            time TIMESTAMPTZ NOT NULL,
            check_name TEXT NOT NULL,
            target_url TEXT,
            probe_name TEXT,
            status_code INTEGER,
            response_time_ms DOUBLE PRECISION,
            success BOOLEAN,
            ssl_expiry_days INTEGER,
            dns_time_ms DOUBLE PRECISION,
            connect_time_ms DOUBLE PRECISION,
            error_message TEXT
        )",
    },
    TableDef {
        name: "ping_checks",
        ddl: "CREATE TABLE IF NOT EXISTS ping_checks (
            time TIMESTAMPTZ NOT NULL,
            check_name TEXT NOT NULL,
            target_host TEXT,
            probe_name TEXT,
            latency_ms DOUBLE PRECISION,
            packet_loss DOUBLE PRECISION,
            success BOOLEAN,
            error_message TEXT
        )",
    },
    TableDef {
        name: "dns_checks",
        ddl: "CREATE TABLE IF NOT EXISTS dns_checks (
            time TIMESTAMPTZ NOT NULL,
            check_name TEXT NOT NULL,
            target_domain TEXT,
            probe_name TEXT,
            resolution_time_ms DOUBLE PRECISION,
            success BOOLEAN,
            resolved_ips TEXT[],
            error_message TEXT
        )",
    },
    TableDef {
        name: "tcp_checks",
        ddl: "CREATE TABLE IF NOT EXISTS tcp_checks (
            time TIMESTAMPTZ NOT NULL,
            check_name TEXT NOT NULL,
            target_host TEXT,
            target_port INTEGER,
            probe_name TEXT,
            connect_time_ms DOUBLE PRECISION,
            success BOOLEAN,
            error_message TEXT
        )",
    },
    TableDef {
        name: "monitoring_events",
        ddl: "CREATE TABLE IF NOT EXISTS monitoring_events (
            time TIMESTAMPTZ NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT,
            check_name TEXT,
            probe_name TEXT,
            message TEXT,
            details JSONB,
            resolved BOOLEAN DEFAULT FALSE
        )",
    },
];

/// Statement converting `table` into a hypertable partitioned on `time`.
#[must_use]
pub fn hypertable_statement(table: &str) -> String {
    format!("SELECT create_hypertable('{table}', 'time', if_not_exists => TRUE)")
}

/// Outcome of a schema bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Tables created or confirmed present.
    pub tables: usize,
    /// Tables converted to (or already) hypertables.
    pub hypertables: usize,
}

/// Creates every table in [`TABLES`] and tries to make each a hypertable.
///
/// Each hypertable attempt runs in its own transaction so a missing
/// TimescaleDB extension does not abort the table creation.
pub fn bootstrap<C: GenericClient>(client: &mut C) -> Result<SchemaReport> {
    let mut report = SchemaReport::default();

    for table in TABLES {
        client
            .batch_execute(table.ddl)
            .map_err(|e| GeneratorError::Schema {
                table: table.name.to_string(),
                reason: e.to_string(),
            })?;
        report.tables += 1;

        let mut tx = client.transaction()?;
        match tx.batch_execute(&hypertable_statement(table.name)) {
            Ok(()) => {
                tx.commit()?;
                report.hypertables += 1;
            }
            Err(e) => {
                tx.rollback()?;
                warn!(table = table.name, error = %e, "hypertable not created");
            }
        }
    }

    info!(
        tables = report.tables,
        hypertables = report.hypertables,
        "schema ready"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::sink::PROBE_TABLES;

    #[test]
    fn every_written_table_has_a_definition() {
        let names: Vec<_> = TABLES.iter().map(|t| t.name).collect();
        for kind in EntityKind::ALL {
            assert!(names.contains(&kind.table()), "{}", kind.table());
        }
        for table in PROBE_TABLES {
            assert!(names.contains(&table), "{table}");
        }
        assert!(names.contains(&"metrics"));
    }

    #[test]
    fn ddl_is_idempotent_and_names_its_table() {
        for table in TABLES {
            assert!(table.ddl.starts_with("CREATE TABLE IF NOT EXISTS"));
            assert!(table.ddl.contains(table.name));
            assert!(table.ddl.contains("time TIMESTAMPTZ NOT NULL"));
        }
    }

    #[test]
    fn hypertable_statement_is_idempotent() {
        let sql = hypertable_statement("server_metrics");
        assert_eq!(
            sql,
            "SELECT create_hypertable('server_metrics', 'time', if_not_exists => TRUE)"
        );
    }
}
