use anyhow::ensure;
use chrono::{DateTime, Duration, Utc};
use minewatchcore::model::{Coordinates, Method, NewDetection, SensorDetails, Status};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Monitored facility that synthetic detections cluster around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Site {
    fn new(name: &str, lat: f64, lng: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
        }
    }
}

/// Configuration for generating synthetic sensor detections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: u64,
    /// Detections inserted at startup.
    pub count: usize,
    pub history_days: u32,
    /// Maximum coordinate offset from the site, in degrees.
    pub jitter_deg: f64,
    pub sites: Vec<Site>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            count: 60,
            history_days: 30,
            jitter_deg: 0.05,
            sites: vec![
                Site::new("Tehran-5", 35.689, 51.389),
                Site::new("Isfahan-2", 32.654, 51.668),
                Site::new("Tabriz-3", 38.080, 46.292),
                Site::new("Mashhad-1", 36.297, 59.606),
                Site::new("Shiraz-4", 29.591, 52.584),
            ],
        }
    }
}

/// Seeded source of plausible multi-sensor detections.
#[derive(Debug)]
pub struct DetectionGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl DetectionGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        ensure!(!config.sites.is_empty(), "generator needs at least one site");
        ensure!(
            config.jitter_deg.is_finite() && config.jitter_deg >= 0.0,
            "jitter_deg must be a non-negative number"
        );
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// One detection stamped at `timestamp`.
    pub fn next_at(&mut self, timestamp: DateTime<Utc>) -> NewDetection {
        let site = self.config.sites[self.rng.gen_range(0..self.config.sites.len())].clone();
        let method = Method::ALL[self.rng.gen_range(0..Method::ALL.len())];
        let (details, strength) = self.reading(method);
        let jitter = self.config.jitter_deg;
        let coordinates = Coordinates::new(
            site.lat + self.rng.gen_range(-jitter..=jitter),
            site.lng + self.rng.gen_range(-jitter..=jitter),
        );
        let noise = self.rng.gen_range(-0.05..=0.05);
        let confidence = (0.35 + 0.6 * strength + noise).clamp(0.0, 1.0);

        NewDetection {
            location: site.name,
            method,
            timestamp,
            coordinates,
            confidence: (confidence * 100.0).round() / 100.0,
            details: Some(details),
        }
    }

    /// `count` detections spread over the history window ending at `now`,
    /// oldest first.
    pub fn history(&mut self, now: DateTime<Utc>) -> Vec<NewDetection> {
        let window_secs = i64::from(self.config.history_days) * 24 * 60 * 60;
        let mut offsets: Vec<i64> = (0..self.config.count)
            .map(|_| self.rng.gen_range(0..=window_secs))
            .collect();
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets
            .into_iter()
            .map(|offset| self.next_at(now - Duration::seconds(offset)))
            .collect()
    }

    /// Triage outcome for seeded history; most detections are still open.
    pub fn triage(&mut self) -> Status {
        match self.rng.gen_range(0..10) {
            0..=2 => Status::Confirmed,
            3 => Status::Rejected,
            _ => Status::UnderReview,
        }
    }

    /// Method-specific reading and its strength normalised to [0, 1].
    fn reading(&mut self, method: Method) -> (SensorDetails, f64) {
        let mut details = SensorDetails::default();
        let strength = match method {
            Method::PowerUsage => {
                let watts = self.rng.gen_range(800.0..12_000.0);
                details.power_watts = Some(watts);
                (watts - 800.0) / 11_200.0
            }
            Method::AcousticNoise => {
                let db = self.rng.gen_range(45.0..95.0);
                details.noise_db = Some(db);
                (db - 45.0) / 50.0
            }
            Method::RfSignal => {
                let dbm = self.rng.gen_range(-90.0..-30.0);
                details.rf_dbm = Some(dbm);
                (dbm + 90.0) / 60.0
            }
            Method::NetworkTraffic => {
                let mbps = self.rng.gen_range(0.5..50.0);
                details.network_mbps = Some(mbps);
                (mbps - 0.5) / 49.5
            }
        };
        (details, strength)
    }
}
