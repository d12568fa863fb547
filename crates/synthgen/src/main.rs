//! synthgen - synthetic observability data generator
//!
//! Serves the latest generated values on a Prometheus endpoint and writes
//! every sample to PostgreSQL/TimescaleDB: a historical backfill first, then
//! one tick every few seconds until interrupted.

mod cli;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use synth_metrics::server::{self, wait_for_shutdown};
use synth_metrics::{
    BackfillDriver, BatchWriter, GeneratorConfig, LiveDriver, MemorySink, MetricModel,
    MetricsExporter, PostgresSink, ProbeSimulator, RelationalSink, SampleGenerator,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, ConfigArgs, DEFAULT_LOG_DIRECTIVE, write_default_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run { source, dry_run } => {
            run(&source, dry_run).await?;
        }

        Commands::InitConfig { output, force } => {
            init_config(&output, force)?;
        }

        Commands::Preview { source, at } => {
            preview(&source, at)?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for `preview` output
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(source: &ConfigArgs, dry_run: bool) -> anyhow::Result<()> {
    let config = source.load()?;
    info!(
        servers = config.entities.servers.len(),
        applications = config.entities.applications.len(),
        channels = config.entities.business_channels.len(),
        tick_secs = config.live.interval_secs,
        dry_run,
        "starting synthgen"
    );

    let exporter = Arc::new(MetricsExporter::new());
    let listener = server::bind(config.exporter.listen_addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let server_task = tokio::spawn(server::serve(
        listener,
        Arc::clone(&exporter),
        shutdown_rx.clone(),
    ));

    let sink = tokio::select! {
        sink = connect_sink(&config, dry_run) => sink?,
        () = wait_for_shutdown(shutdown_rx.clone()) => {
            info!("shutdown requested before the database was reachable");
            return Ok(());
        }
    };
    let writer = BatchWriter::new(sink, config.database.write_policy())
        .with_exporter(Arc::clone(&exporter));

    let model = MetricModel::from_config(&config.model)?;
    let mut generator =
        SampleGenerator::new(model, config.entities.catalog()?, config.model.rng_seed());

    let backfill = BackfillDriver::new(&config.backfill, writer.clone());
    tokio::select! {
        _ = backfill.run(&mut generator, Utc::now()) => {}
        () = wait_for_shutdown(shutdown_rx.clone()) => {
            warn!("shutdown requested during backfill");
        }
    }

    if !*shutdown_rx.borrow() {
        let mut live = LiveDriver::new(
            generator,
            Arc::clone(&exporter),
            writer,
            config.live.interval(),
        );
        if config.probes.enabled {
            live = live.with_probes(ProbeSimulator::new(&config.probes.regions));
        }
        live.run(shutdown_rx.clone()).await;
    }

    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "metrics endpoint failed"),
        Err(e) => error!(error = %e, "metrics endpoint task panicked"),
    }

    info!("synthgen stopped");
    Ok(())
}

async fn connect_sink(
    config: &GeneratorConfig,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn RelationalSink>> {
    if dry_run {
        info!("dry run, relational rows are kept in memory");
        return Ok(Arc::new(MemorySink::new()));
    }

    let sink = PostgresSink::connect(&config.database).await?;
    if config.database.create_schema {
        let bootstrap = sink.clone();
        tokio::task::spawn_blocking(move || bootstrap.create_schema()).await??;
    }
    Ok(Arc::new(sink))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, initiating shutdown"),
        () = terminate => info!("received SIGTERM, initiating shutdown"),
    }
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    write_default_config(output, force)?;
    println!("Config written to {}", output.display());
    Ok(())
}

fn preview(source: &ConfigArgs, at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let config = source.load()?;
    let at = at.unwrap_or_else(Utc::now);

    let model = MetricModel::from_config(&config.model)?;
    let mut generator =
        SampleGenerator::new(model, config.entities.catalog()?, config.model.rng_seed());
    let batches = generator.generate(at);

    let probes = config
        .probes
        .enabled
        .then(|| ProbeSimulator::new(&config.probes.regions).simulate(at, generator.rng_mut()));

    let output = serde_json::json!({
        "time": at,
        "business_hours": generator.model().season().is_business_hours(at),
        "batches": batches,
        "probes": probes,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
