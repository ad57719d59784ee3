//! Offline stand-ins for the external model services, seeded for
//! reproducible runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use orcatrail_core::{clamp_unit, GeoPoint};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::{
    corpus::{InMemoryCorpus, Sighting},
    services::{
        PosteriorSamples, PredictionQuery, PredictionResponse, PredictionService, ServiceError,
        UncertaintyQuery, UncertaintyResponse, UncertaintyService,
    },
    sites::SITES,
};

/// Peak season (May to September) keeps the catalog confidence; other months are damped.
fn seasonal_factor(start: NaiveDate) -> f32 {
    if (5..=9).contains(&start.month()) {
        1.0
    } else {
        0.6
    }
}

/// Prediction model returning catalog sites inside the query bounds.
#[derive(Debug)]
pub struct SimulatedPrediction {
    rng: Mutex<SmallRng>,
    latency: Option<Duration>,
}

impl SimulatedPrediction {
    /// Creates a model seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            latency: None,
        }
    }

    /// Delays every reply.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl PredictionService for SimulatedPrediction {
    fn name(&self) -> &str {
        "simulated-prediction"
    }

    async fn predict(&self, query: &PredictionQuery) -> Result<PredictionResponse, ServiceError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let season = seasonal_factor(query.start);
        let mut hotspots = {
            let mut rng = self.rng.lock();
            SITES
                .iter()
                .filter(|site| query.bounds.contains(&site.point()))
                .map(|site| {
                    let jitter: f32 = rng.gen_range(-0.08..=0.08);
                    site.hotspot(clamp_unit(site.base_confidence * season + jitter))
                })
                .collect::<Vec<_>>()
        };
        hotspots.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(PredictionResponse {
            hotspots,
            model_version: Some("simulated-1".into()),
        })
    }
}

/// Posterior sampler drawing around each hotspot confidence.
#[derive(Debug)]
pub struct SimulatedUncertainty {
    rng: Mutex<SmallRng>,
    spread: f32,
}

impl SimulatedUncertainty {
    /// Creates a sampler seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            spread: 0.1,
        }
    }
}

#[async_trait]
impl UncertaintyService for SimulatedUncertainty {
    fn name(&self) -> &str {
        "simulated-uncertainty"
    }

    async fn sample(&self, query: &UncertaintyQuery) -> Result<UncertaintyResponse, ServiceError> {
        let mut rng = match query.sampling.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut *self.rng.lock())
                .map_err(|err| ServiceError::Transport(err.to_string()))?,
        };
        let posteriors = query
            .prediction
            .hotspots
            .iter()
            .map(|hotspot| {
                let samples = (0..query.sampling.samples)
                    .map(|_| {
                        // Mean of three uniforms: bell-shaped, bounded noise.
                        let noise: f32 = (0..3).map(|_| rng.gen_range(-1.0..=1.0_f32)).sum::<f32>() / 3.0;
                        clamp_unit(hotspot.confidence + noise * self.spread)
                    })
                    .collect();
                PosteriorSamples {
                    hotspot_id: hotspot.id.clone(),
                    samples,
                }
            })
            .collect();
        Ok(UncertaintyResponse { posteriors })
    }
}

/// Corpus with `per_site` sightings scattered within about 2 km of each catalog site.
#[must_use]
pub fn synthetic_corpus(seed: u64, per_site: usize) -> InMemoryCorpus {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut sightings = Vec::with_capacity(SITES.len() * per_site);
    for site in SITES {
        for _ in 0..per_site {
            let point = GeoPoint::new(
                site.lat + rng.gen_range(-0.015..=0.015),
                site.lon + rng.gen_range(-0.02..=0.02),
            );
            let year = rng.gen_range(2018..=2025);
            let month = rng.gen_range(5..=9);
            let day = rng.gen_range(1..=28);
            let Some(observed_on) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let behavior = if site.behaviors.is_empty() {
                None
            } else {
                Some(site.behaviors[rng.gen_range(0..site.behaviors.len())])
            };
            sightings.push(Sighting {
                point,
                observed_on,
                behavior,
                confidence: clamp_unit(site.base_confidence + rng.gen_range(0.0..=0.2)),
            });
        }
    }
    InMemoryCorpus::new(sightings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{corpus::HistoricalCorpus, services::SamplingConfig};
    use orcatrail_core::BoundingBox;

    fn query(month: u32) -> PredictionQuery {
        PredictionQuery {
            bounds: BoundingBox::around(GeoPoint::new(48.53, -123.08), 40.0),
            start: NaiveDate::from_ymd_opt(2026, month, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, month, 3).unwrap(),
            resolution_km: 1.0,
            include_uncertainty: true,
        }
    }

    #[tokio::test]
    async fn predictions_stay_inside_bounds_and_are_ranked() {
        let model = SimulatedPrediction::new(7);
        let query = query(7);
        let response = model.predict(&query).await.unwrap();
        assert!(!response.hotspots.is_empty());
        assert!(response
            .hotspots
            .iter()
            .all(|hotspot| query.bounds.contains(&hotspot.point)));
        assert!(response
            .hotspots
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));
    }

    #[tokio::test]
    async fn off_season_is_damped() {
        let summer = SimulatedPrediction::new(1).predict(&query(7)).await.unwrap();
        let winter = SimulatedPrediction::new(1).predict(&query(1)).await.unwrap();
        let best = |r: &PredictionResponse| r.hotspots[0].confidence;
        assert!(best(&winter) < best(&summer));
    }

    #[tokio::test]
    async fn seeded_sampling_is_reproducible() {
        let prediction = SimulatedPrediction::new(3).predict(&query(7)).await.unwrap();
        let request = UncertaintyQuery {
            prediction,
            sampling: SamplingConfig {
                samples: 50,
                seed: Some(11),
            },
        };
        let sampler = SimulatedUncertainty::new(0);
        let first = sampler.sample(&request).await.unwrap();
        let second = sampler.sample(&request).await.unwrap();
        assert_eq!(first, second);
        assert!(first
            .posteriors
            .iter()
            .all(|p| p.samples.len() == 50 && p.samples.iter().all(|s| (0.0..=1.0).contains(s))));
    }

    #[test]
    fn synthetic_corpus_clusters_around_sites() {
        let corpus = synthetic_corpus(5, 6);
        assert_eq!(corpus.size(), SITES.len() * 6);
        let near = corpus.near(&SITES[0].point(), 5.0);
        assert!(near.len() >= 6);
    }
}
