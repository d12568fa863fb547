//! Command-line interface and configuration overlay.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use synth_metrics::GeneratorConfig;

/// Default log directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "synthgen=info,synth_metrics=info";

#[derive(Debug, Parser)]
#[command(name = "synthgen")]
#[command(about = "Synthetic observability data generator")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SYNTHGEN_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Backfill history, then generate live data until interrupted
    Run {
        #[command(flatten)]
        source: ConfigArgs,

        /// Keep relational rows in memory instead of connecting to PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the default configuration as TOML
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "synthgen.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print one tick of samples as JSON
    Preview {
        #[command(flatten)]
        source: ConfigArgs,

        /// Sample time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

/// Configuration file plus flag and environment overrides.
#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(short, long, env = "SYNTHGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// PostgreSQL host
    #[arg(long, env = "POSTGRES_HOST")]
    pub postgres_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "POSTGRES_PORT")]
    pub postgres_port: Option<u16>,

    /// PostgreSQL user
    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: Option<String>,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub postgres_password: Option<String>,

    /// PostgreSQL database name
    #[arg(long, env = "POSTGRES_DB")]
    pub postgres_db: Option<String>,

    /// Comma-separated server names
    #[arg(long, env = "SERVERS", value_delimiter = ',')]
    pub servers: Vec<String>,

    /// Comma-separated application names
    #[arg(long, env = "APPLICATIONS", value_delimiter = ',')]
    pub applications: Vec<String>,

    /// Comma-separated business channel names
    #[arg(long, env = "BUSINESS_CHANNELS", value_delimiter = ',')]
    pub business_channels: Vec<String>,

    /// Hours of history to backfill (0 disables backfill)
    #[arg(long, env = "BACKFILL_HOURS")]
    pub backfill_hours: Option<u64>,

    /// Seconds between backfilled samples
    #[arg(long, env = "BACKFILL_INTERVAL_SECS")]
    pub backfill_interval_secs: Option<u64>,

    /// Seconds between live ticks
    #[arg(long, env = "TICK_INTERVAL_SECS")]
    pub tick_interval_secs: Option<u64>,

    /// Listen address for the metrics endpoint
    #[arg(long, env = "METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<SocketAddr>,

    /// Seed for reproducible output
    #[arg(long, env = "SYNTHGEN_SEED")]
    pub seed: Option<i64>,
}

impl ConfigArgs {
    /// Loads the file (or defaults), applies overrides and validates.
    pub fn load(&self) -> anyhow::Result<GeneratorConfig> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::from_file(path)?,
            None => GeneratorConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut GeneratorConfig) {
        let db = &mut config.database;
        if let Some(url) = &self.database_url {
            db.url = Some(url.clone());
        }
        if let Some(host) = &self.postgres_host {
            db.host.clone_from(host);
        }
        if let Some(port) = self.postgres_port {
            db.port = port;
        }
        if let Some(user) = &self.postgres_user {
            db.user.clone_from(user);
        }
        if let Some(password) = &self.postgres_password {
            db.password.clone_from(password);
        }
        if let Some(name) = &self.postgres_db {
            db.dbname.clone_from(name);
        }

        let entities = &mut config.entities;
        if !self.servers.is_empty() {
            entities.servers.clone_from(&self.servers);
        }
        if !self.applications.is_empty() {
            entities.applications.clone_from(&self.applications);
        }
        if !self.business_channels.is_empty() {
            entities.business_channels.clone_from(&self.business_channels);
        }

        if let Some(hours) = self.backfill_hours {
            config.backfill.hours = hours;
            config.backfill.enabled = hours > 0;
        }
        if let Some(secs) = self.backfill_interval_secs {
            config.backfill.interval_secs = secs;
        }
        if let Some(secs) = self.tick_interval_secs {
            config.live.interval_secs = secs;
        }
        if let Some(addr) = self.metrics_listen_addr {
            config.exporter.listen_addr = addr;
        }
        if self.seed.is_some() {
            config.model.seed = self.seed;
        }
    }
}

/// Writes the default configuration to `path`.
pub fn write_default_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let content = GeneratorConfig::default().to_toml()?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    Ok(())
}
