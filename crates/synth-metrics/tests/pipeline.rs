//! End-to-end runs of the generator against the in-memory sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use synth_metrics::{
    BackfillConfig, BackfillDriver, BatchWriter, Entity, EntityCatalog, GeneratorConfig,
    LiveDriver, MemorySink, MetricModel, MetricsExporter, ProbeSimulator, RelationalSink,
    RetryPolicy, Sample, SampleGenerator,
};

fn generator(config: &GeneratorConfig) -> SampleGenerator {
    let model = MetricModel::from_config(&config.model).unwrap();
    let catalog = config.entities.catalog().unwrap();
    SampleGenerator::new(model, catalog, Some(2024))
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn backfill_then_live() {
    let config = GeneratorConfig::from_toml(
        r#"
        [backfill]
        hours = 3
        interval_secs = 300

        [probes]
        regions = ["us-east-1", "eu-west-1"]
        "#,
    )
    .unwrap();
    config.validate().unwrap();

    let sink = Arc::new(MemorySink::new());
    let exporter = Arc::new(MetricsExporter::new());
    let dyn_sink: Arc<dyn RelationalSink> = sink.clone();
    let writer = BatchWriter::new(dyn_sink, RetryPolicy::no_retry())
        .with_exporter(Arc::clone(&exporter));

    let mut generator = generator(&config);
    let backfill = BackfillDriver::new(&config.backfill, writer.clone());
    let report = backfill.run(&mut generator, Utc::now()).await;

    assert_eq!(report.timestamps, 36);
    assert_eq!(sink.row_count("server_metrics"), 36 * 5);
    assert_eq!(sink.row_count("http_checks"), 0);
    assert_eq!(exporter.ticks(), 0);

    let mut live = LiveDriver::new(
        generator,
        Arc::clone(&exporter),
        writer,
        Duration::from_millis(5),
    )
    .with_probes(ProbeSimulator::new(&config.probes.regions));
    let ticks = live.run_ticks(2).await;

    assert_eq!(ticks.len(), 2);
    assert_eq!(sink.row_count("server_metrics"), 38 * 5);
    assert_eq!(sink.row_count("http_checks"), 2 * 4 * 2);
    assert_eq!(exporter.ticks(), 2);

    let scrape = exporter.encode();
    assert!(scrape.contains("system_cpu_usage{server=\"web-server-01\"}"));
    assert!(scrape.contains("http_requests_total{app=\"payment-service\",status=\"500\"}"));
    assert!(scrape.contains("business_revenue{channel=\"sales\"}"));
    assert!(scrape.contains("synthgen_rows_written_total{table=\"server_metrics\"} 190"));
}

#[test]
fn midday_cpu_exceeds_night_cpu() {
    let config = GeneratorConfig::default();
    let mut generator = generator(&config);
    let web01 = Entity::Server("web-server-01".to_string());

    let mut cpu_at = |hour| {
        let samples: Vec<f64> = (0..1000)
            .filter_map(|_| match generator.sample(&web01, at(hour)) {
                Sample::Server(s) => Some(s.cpu_usage),
                _ => None,
            })
            .collect();
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|v| (0.0..=100.0).contains(v)));
        samples.iter().sum::<f64>() / samples.len() as f64
    };

    let midday = cpu_at(13);
    let night = cpu_at(3);
    assert!(midday > night + 10.0, "midday {midday} night {night}");
}

#[test]
fn every_value_is_in_range_over_a_day() {
    let config = GeneratorConfig::default();
    let mut generator = generator(&config);

    for hour in 0..24 {
        for batch in generator.generate(at(hour)) {
            for sample in batch.samples() {
                sample.check_bounds().unwrap();
            }
        }
    }
}

#[test]
fn custom_catalog_drives_generation() {
    let catalog = EntityCatalog::new(&["edge-01", "edge-02"], &["checkout"], &["retail", "wholesale"])
        .unwrap();
    let model = MetricModel::from_config(&Default::default()).unwrap();
    let mut generator = SampleGenerator::new(model, catalog, Some(1));

    let batches = generator.generate(at(10));
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 1, 2]);
}

#[tokio::test]
async fn disabled_backfill_leaves_store_empty() {
    let config = GeneratorConfig {
        backfill: BackfillConfig {
            enabled: false,
            ..BackfillConfig::default()
        },
        ..GeneratorConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let dyn_sink: Arc<dyn RelationalSink> = sink.clone();

    let report = BackfillDriver::new(
        &config.backfill,
        BatchWriter::new(dyn_sink, RetryPolicy::no_retry()),
    )
    .run(&mut generator(&config), Utc::now())
    .await;

    assert_eq!(report.timestamps, 0);
    assert_eq!(sink.total_rows(), 0);
}
