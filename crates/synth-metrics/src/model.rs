//! The synthetic value model.
//!
//! Every metric is a seasonal base value plus bounded random noise, with a
//! small chance of an incident spike. [`MetricModel::sample`] is a pure
//! function of the entity, the timestamp and the random source; all state
//! (the RNG) lives in [`SampleGenerator`].

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::error;

use crate::config::ModelConfig;
use crate::entity::{Entity, EntityCatalog, EntityKind};
use crate::error::{GeneratorError, Result};
use crate::sample::{ApplicationSample, BusinessSample, Sample, SampleBatch, ServerSample};

/// Time-of-day multiplier for traffic-correlated metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalProfile {
    start_hour: u32,
    end_hour: u32,
    peak: f64,
    off_peak: f64,
    offset: FixedOffset,
}

impl SeasonalProfile {
    /// Creates a profile for the business day `start_hour..=end_hour`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hours are inverted or outside 0-23, or if the
    /// UTC offset is out of range.
    pub fn new(
        start_hour: u32,
        end_hour: u32,
        peak: f64,
        off_peak: f64,
        utc_offset_hours: i32,
    ) -> Result<Self> {
        if start_hour > end_hour || end_hour > 23 {
            return Err(GeneratorError::config(format!(
                "invalid business hours: {start_hour}..={end_hour}"
            )));
        }
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            GeneratorError::config(format!("invalid utc offset: {utc_offset_hours}h"))
        })?;
        Ok(Self {
            start_hour,
            end_hour,
            peak,
            off_peak,
            offset,
        })
    }

    /// Hour of day in the configured local time.
    #[must_use]
    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        at.with_timezone(&self.offset).hour()
    }

    /// Whether `at` falls within business hours (inclusive at both ends).
    #[must_use]
    pub fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        (self.start_hour..=self.end_hour).contains(&self.local_hour(at))
    }

    /// Multiplier applied to traffic-correlated metrics at `at`.
    #[must_use]
    pub fn factor(&self, at: DateTime<Utc>) -> f64 {
        if self.is_business_hours(at) {
            self.peak
        } else {
            self.off_peak
        }
    }
}

/// Incident spike injection. Spikes are independent per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeProfile {
    probability: f64,
    factor_min: f64,
    factor_max: f64,
}

impl SpikeProfile {
    /// Creates a spike profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the probability is outside 0-1 or the factor range
    /// is empty.
    pub fn new(probability: f64, factor_min: f64, factor_max: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(GeneratorError::config("spike probability must be within 0-1"));
        }
        if !(factor_min.is_finite() && factor_max.is_finite() && factor_min <= factor_max) {
            return Err(GeneratorError::config("spike factor range is empty"));
        }
        Ok(Self {
            probability,
            factor_min,
            factor_max,
        })
    }

    /// A profile that never spikes.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            probability: 0.0,
            factor_min: 1.0,
            factor_max: 1.0,
        }
    }

    /// Draws the spike multiplier for one sample, if any.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        if rng.gen_bool(self.probability) {
            Some(rng.gen_range(self.factor_min..=self.factor_max))
        } else {
            None
        }
    }
}

fn gauss<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std_dev * z
}

/// Produces samples for entities.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricModel {
    season: SeasonalProfile,
    spikes: SpikeProfile,
}

impl MetricModel {
    /// Creates a model from its two profiles.
    #[must_use]
    pub const fn new(season: SeasonalProfile, spikes: SpikeProfile) -> Self {
        Self { season, spikes }
    }

    /// Creates a model from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Ok(Self::new(
            SeasonalProfile::new(
                config.business_hours_start,
                config.business_hours_end,
                config.peak_multiplier,
                config.off_peak_multiplier,
                config.utc_offset_hours,
            )?,
            SpikeProfile::new(
                config.spike_probability,
                config.spike_factor_min,
                config.spike_factor_max,
            )?,
        ))
    }

    /// The seasonal profile in use.
    #[must_use]
    pub const fn season(&self) -> &SeasonalProfile {
        &self.season
    }

    /// Generates one sample for `entity` at `at`.
    pub fn sample<R: Rng + ?Sized>(&self, entity: &Entity, at: DateTime<Utc>, rng: &mut R) -> Sample {
        let season = self.season.factor(at);
        let spike = self.spikes.roll(rng);

        match entity {
            Entity::Server(name) => Sample::Server(Self::server(name, at, season, spike, rng)),
            Entity::Application(name) => {
                Sample::Application(Self::application(name, at, season, spike, rng))
            }
            Entity::BusinessChannel(name) => {
                Sample::Business(Self::business(name, at, season, spike, rng))
            }
        }
    }

    /// Generates a batch with one sample per entity of `kind` at `at`.
    pub fn batch<R: Rng + ?Sized>(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        at: DateTime<Utc>,
        rng: &mut R,
    ) -> SampleBatch {
        let mut batch = SampleBatch::empty(kind);
        for entity in entities.iter().filter(|e| e.kind() == kind) {
            let sample = self.sample(entity, at, rng);
            let checked = sample.check_bounds();
            debug_assert!(checked.is_ok(), "{checked:?}");
            if let Err(e) = checked {
                error!(error = %e, "generated sample out of range");
                continue;
            }
            let pushed = batch.push(sample);
            debug_assert!(pushed.is_ok(), "{pushed:?}");
            if let Err(e) = pushed {
                error!(error = %e, "generated sample does not match its batch");
            }
        }
        batch
    }

    fn server<R: Rng + ?Sized>(
        name: &str,
        at: DateTime<Utc>,
        season: f64,
        spike: Option<f64>,
        rng: &mut R,
    ) -> ServerSample {
        let mut cpu = rng.gen_range(20.0..60.0) * season + gauss(rng, 0.0, 10.0);
        let memory = rng.gen_range(40.0..70.0) + gauss(rng, 0.0, 5.0);
        let disk = rng.gen_range(30.0..85.0);
        let mut network_in = rng.gen_range(100.0..10_000.0) * season;
        let network_out = rng.gen_range(50.0..5_000.0) * season;

        if let Some(factor) = spike {
            cpu *= factor;
            network_in *= factor;
        }

        ServerSample {
            time: at,
            server_name: name.to_string(),
            cpu_usage: cpu.clamp(0.0, 100.0),
            memory_usage: memory.clamp(0.0, 100.0),
            disk_usage: disk,
            network_in,
            network_out,
        }
    }

    fn application<R: Rng + ?Sized>(
        name: &str,
        at: DateTime<Utc>,
        season: f64,
        spike: Option<f64>,
        rng: &mut R,
    ) -> ApplicationSample {
        let request_count = (rng.gen_range(100.0..1_000.0) * season) as i64;
        let mut error_rate = rng.gen_range(0.01..0.05);
        let mut response_time = gauss(rng, 150.0, 50.0).max(10.0);
        let active_users = (rng.gen_range(50.0..500.0) * season) as i64;

        if let Some(factor) = spike {
            error_rate *= factor;
            response_time *= factor;
        }

        let error_count = (request_count as f64 * error_rate.min(1.0)) as i64;

        ApplicationSample {
            time: at,
            app_name: name.to_string(),
            request_count,
            error_count: error_count.clamp(0, request_count),
            response_time,
            active_users,
        }
    }

    fn business<R: Rng + ?Sized>(
        name: &str,
        at: DateTime<Utc>,
        season: f64,
        spike: Option<f64>,
        rng: &mut R,
    ) -> BusinessSample {
        let mut revenue = gauss(rng, 5_000.0, 1_000.0).max(0.0) * season;
        let mut transactions = rng.gen_range(50.0..300.0) * season;
        let conversion_rate = rng.gen_range(0.02..0.08);

        if let Some(factor) = spike {
            revenue *= factor;
            transactions *= factor;
        }

        BusinessSample {
            time: at,
            metric_type: name.to_string(),
            revenue,
            transactions: transactions as i64,
            conversion_rate,
        }
    }
}

/// Owns the model, the entity catalog and the random source.
#[derive(Debug)]
pub struct SampleGenerator {
    model: MetricModel,
    catalog: EntityCatalog,
    rng: StdRng,
}

impl SampleGenerator {
    /// Creates a generator. A `seed` makes the output reproducible.
    #[must_use]
    pub fn new(model: MetricModel, catalog: EntityCatalog, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model,
            catalog,
            rng,
        }
    }

    /// The entity catalog.
    #[must_use]
    pub const fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    /// The value model.
    #[must_use]
    pub const fn model(&self) -> &MetricModel {
        &self.model
    }

    /// Mutable access to the random source, shared with the probe simulator.
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Generates one sample for a single entity.
    pub fn sample(&mut self, entity: &Entity, at: DateTime<Utc>) -> Sample {
        self.model.sample(entity, at, &mut self.rng)
    }

    /// Generates one batch per entity kind, every entity sampled at `at`.
    pub fn generate(&mut self, at: DateTime<Utc>) -> Vec<SampleBatch> {
        EntityKind::ALL
            .iter()
            .map(|&kind| {
                self.model
                    .batch(kind, self.catalog.of_kind(kind), at, &mut self.rng)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    fn default_model() -> MetricModel {
        MetricModel::from_config(&ModelConfig::default()).unwrap()
    }

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn web01() -> Entity {
        Entity::Server("web-server-01".to_string())
    }

    fn mean_cpu(model: &MetricModel, at: DateTime<Utc>, rng: &mut StdRng, n: usize) -> f64 {
        let total: f64 = (0..n)
            .map(|_| match model.sample(&web01(), at, rng) {
                Sample::Server(s) => s.cpu_usage,
                other => panic!("expected server sample, got {other:?}"),
            })
            .sum();
        total / n as f64
    }

    #[test_case(8, false ; "before opening")]
    #[test_case(9, true ; "opening hour")]
    #[test_case(13, true ; "midday")]
    #[test_case(17, true ; "closing hour inclusive")]
    #[test_case(18, false ; "evening")]
    #[test_case(3, false ; "night")]
    fn business_hours_window(hour: u32, expected: bool) {
        let model = default_model();
        assert_eq!(model.season().is_business_hours(at_hour(hour)), expected);
    }

    #[test]
    fn seasonal_factor_values() {
        let season = default_model().season().clone();
        assert!((season.factor(at_hour(13)) - 1.5).abs() < f64::EPSILON);
        assert!((season.factor(at_hour(3)) - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn utc_offset_shifts_local_hour() {
        let season = SeasonalProfile::new(9, 17, 1.5, 0.7, -5).unwrap();
        // 13:00 UTC is 08:00 at UTC-5.
        assert_eq!(season.local_hour(at_hour(13)), 8);
        assert!(!season.is_business_hours(at_hour(13)));
        assert!(season.is_business_hours(at_hour(15)));
    }

    #[test]
    fn inverted_business_day_is_rejected() {
        assert!(SeasonalProfile::new(22, 4, 2.0, 1.0, 0).is_err());
        assert!(SeasonalProfile::new(9, 24, 2.0, 1.0, 0).is_err());

        let single = SeasonalProfile::new(12, 12, 2.0, 1.0, 0).unwrap();
        assert!(single.is_business_hours(at_hour(12)));
        assert!(!single.is_business_hours(at_hour(13)));
    }

    #[test]
    fn midday_cpu_exceeds_night_cpu() {
        let model = default_model();
        let mut rng = StdRng::seed_from_u64(7);

        let day = mean_cpu(&model, at_hour(13), &mut rng, 2_000);
        let night = mean_cpu(&model, at_hour(3), &mut rng, 2_000);

        assert!(day > night, "day={day} night={night}");
        assert!((0.0..=100.0).contains(&day));
        assert!((0.0..=100.0).contains(&night));
    }

    #[test]
    fn midday_requests_exceed_night_requests() {
        let model = default_model();
        let mut rng = StdRng::seed_from_u64(11);
        let app = Entity::Application("frontend".to_string());

        let mut mean = |at: DateTime<Utc>| {
            let total: i64 = (0..1_000)
                .map(|_| match model.sample(&app, at, &mut rng) {
                    Sample::Application(s) => s.request_count,
                    other => panic!("expected application sample, got {other:?}"),
                })
                .sum();
            total as f64 / 1_000.0
        };

        let day = mean(at_hour(13));
        let night = mean(at_hour(3));
        assert!(day > night, "day={day} night={night}");
    }

    #[test]
    fn spikes_raise_cpu_when_forced() {
        let season = SeasonalProfile::new(9, 17, 1.5, 0.7, 0).unwrap();
        let calm = MetricModel::new(season.clone(), SpikeProfile::disabled());
        let stormy = MetricModel::new(season, SpikeProfile::new(1.0, 3.0, 3.0).unwrap());

        let mut rng = StdRng::seed_from_u64(3);
        let calm_mean = mean_cpu(&calm, at_hour(3), &mut rng, 500);
        let stormy_mean = mean_cpu(&stormy, at_hour(3), &mut rng, 500);
        assert!(stormy_mean > calm_mean);
    }

    #[test]
    fn spike_profile_rejects_bad_input() {
        assert!(SpikeProfile::new(-0.1, 2.0, 4.0).is_err());
        assert!(SpikeProfile::new(0.1, 4.0, 2.0).is_err());
        assert!(SpikeProfile::disabled().roll(&mut StdRng::seed_from_u64(1)).is_none());
    }

    #[test]
    fn same_seed_same_output() {
        let catalog = EntityCatalog::default();
        let mut a = SampleGenerator::new(default_model(), catalog.clone(), Some(99));
        let mut b = SampleGenerator::new(default_model(), catalog, Some(99));
        assert_eq!(a.generate(at_hour(10)), b.generate(at_hour(10)));
    }

    #[test]
    fn batch_keeps_only_the_requested_kind() {
        let model = default_model();
        let mut rng = StdRng::seed_from_u64(29);
        let mixed = [
            web01(),
            Entity::Application("checkout".to_string()),
            Entity::Server("db-server-01".to_string()),
            Entity::BusinessChannel("sales".to_string()),
        ];

        let batch = model.batch(EntityKind::Server, &mixed, at_hour(10), &mut rng);
        assert_eq!(batch.kind(), EntityKind::Server);
        assert_eq!(batch.len(), 2);
        assert!(batch.samples().iter().all(|s| s.kind() == EntityKind::Server));

        let batch = model.batch(EntityKind::BusinessChannel, &mixed, at_hour(10), &mut rng);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn generate_covers_every_entity_once() {
        let mut generator =
            SampleGenerator::new(default_model(), EntityCatalog::default(), Some(1));
        let batches = generator.generate(at_hour(12));

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].kind(), EntityKind::Server);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(batches[1].len(), 5);
        assert_eq!(batches[2].len(), 1);
        assert!(batches
            .iter()
            .flat_map(SampleBatch::samples)
            .all(|s| s.time() == at_hour(12)));
    }

    proptest! {
        #[test]
        fn every_sample_is_within_bounds(
            seed in any::<u64>(),
            hour in 0u32..24,
            spike_probability in 0.0f64..=1.0,
        ) {
            let season = SeasonalProfile::new(9, 17, 1.5, 0.7, 0).unwrap();
            let spikes = SpikeProfile::new(spike_probability, 2.0, 4.0).unwrap();
            let model = MetricModel::new(season, spikes);
            let mut rng = StdRng::seed_from_u64(seed);

            for entity in EntityCatalog::default().iter() {
                let sample = model.sample(entity, at_hour(hour), &mut rng);
                prop_assert!(sample.check_bounds().is_ok(), "{:?}", sample);
            }
        }
    }
}
