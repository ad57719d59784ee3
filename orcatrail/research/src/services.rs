use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use orcatrail_core::{
    BehaviorTag, BoundingBox, Constraints, GeoPoint, LocationCandidate, ViewingMode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Query sent to the prediction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionQuery {
    /// Spatial bounds.
    pub bounds: BoundingBox,
    /// First day of the window.
    pub start: NaiveDate,
    /// Last day of the window.
    pub end: NaiveDate,
    /// Grid resolution.
    pub resolution_km: f64,
    /// Ask the model to attach uncertainty metadata.
    pub include_uncertainty: bool,
}

impl PredictionQuery {
    /// Derives the query for a set of constraints.
    #[must_use]
    pub fn for_constraints(constraints: &Constraints, resolution_km: f64) -> Self {
        Self {
            bounds: constraints.region.bounds(),
            start: constraints.date_range.start,
            end: constraints.date_range.end,
            resolution_km,
            include_uncertainty: true,
        }
    }
}

/// Predicted hotspot with its site metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Stable slug.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Position.
    pub point: GeoPoint,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    /// Expected behaviours.
    #[serde(default)]
    pub behaviors: BTreeSet<BehaviorTag>,
    /// Access modes; empty means any.
    #[serde(default)]
    pub access: Vec<ViewingMode>,
    /// Sensitivity to visitors.
    #[serde(default = "default_disturbance")]
    pub disturbance_factor: f32,
    /// Step-free access.
    #[serde(default)]
    pub accessible: bool,
    /// Community partner on site.
    #[serde(default)]
    pub community_partner: bool,
    /// Interpretive programming on site.
    #[serde(default)]
    pub interpretive: bool,
}

const fn default_disturbance() -> f32 {
    0.5
}

impl Hotspot {
    /// Converts into a candidate with the given confidences.
    #[must_use]
    pub fn into_candidate(self, model_confidence: f32, historical_confidence: f32) -> LocationCandidate {
        let access = if self.access.is_empty() {
            vec![ViewingMode::Flexible]
        } else {
            self.access
        };
        LocationCandidate {
            id: self.id,
            name: self.name,
            point: self.point,
            access,
            behaviors: self.behaviors,
            model_confidence,
            historical_confidence,
            confidence: model_confidence,
            interval: None,
            sightings: 0,
            disturbance_factor: self.disturbance_factor,
            accessible: self.accessible,
            community_partner: self.community_partner,
            interpretive: self.interpretive,
        }
    }
}

/// Prediction service reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Hotspots, best first.
    pub hotspots: Vec<Hotspot>,
    /// Model identifier, when reported.
    #[serde(default)]
    pub model_version: Option<String>,
}

/// Posterior sampling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Samples per hotspot.
    pub samples: usize,
    /// Seed for reproducible draws.
    pub seed: Option<u64>,
}

/// Query sent to the uncertainty service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyQuery {
    /// Prediction to sample around.
    pub prediction: PredictionResponse,
    /// Sampling settings.
    pub sampling: SamplingConfig,
}

/// Posterior samples for one hotspot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSamples {
    /// Hotspot id.
    pub hotspot_id: String,
    /// Draws of the hotspot confidence.
    pub samples: Vec<f32>,
}

/// Uncertainty service reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyResponse {
    /// Samples per hotspot.
    pub posteriors: Vec<PosteriorSamples>,
}

impl UncertaintyResponse {
    /// Samples for a hotspot, if any were returned.
    #[must_use]
    pub fn samples_for(&self, hotspot_id: &str) -> Option<&[f32]> {
        self.posteriors
            .iter()
            .find(|posterior| posterior.hotspot_id == hotspot_id)
            .map(|posterior| posterior.samples.as_slice())
            .filter(|samples| !samples.is_empty())
    }
}

/// Errors surfaced by external services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// No reply within the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("service answered with status {0}")]
    Status(u16),
    /// Reply could not be decoded.
    #[error("invalid payload: {0}")]
    Decode(String),
    /// No endpoint configured.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The session was cancelled while waiting.
    #[error("cancelled")]
    Cancelled,
}

/// Behavioural prediction model.
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Short name used in logs and finding sources.
    fn name(&self) -> &str;

    /// Returns ranked hotspots for the query.
    async fn predict(&self, query: &PredictionQuery) -> Result<PredictionResponse, ServiceError>;
}

/// Posterior sampler around a prediction.
#[async_trait]
pub trait UncertaintyService: Send + Sync {
    /// Short name used in logs and finding sources.
    fn name(&self) -> &str;

    /// Returns posterior samples per hotspot.
    async fn sample(&self, query: &UncertaintyQuery) -> Result<UncertaintyResponse, ServiceError>;
}

/// Stand-in used when no endpoint is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineService;

#[async_trait]
impl PredictionService for OfflineService {
    fn name(&self) -> &str {
        "offline"
    }

    async fn predict(&self, _query: &PredictionQuery) -> Result<PredictionResponse, ServiceError> {
        Err(ServiceError::Unavailable("no prediction endpoint configured".into()))
    }
}

#[async_trait]
impl UncertaintyService for OfflineService {
    fn name(&self) -> &str {
        "offline"
    }

    async fn sample(&self, _query: &UncertaintyQuery) -> Result<UncertaintyResponse, ServiceError> {
        Err(ServiceError::Unavailable("no uncertainty endpoint configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hotspot_metadata_defaults() {
        let hotspot: Hotspot = serde_json::from_value(json!({
            "id": "h1",
            "name": "Somewhere",
            "point": { "lat": 48.5, "lon": -123.1 },
            "confidence": 0.8
        }))
        .unwrap();
        assert_eq!(hotspot.disturbance_factor, 0.5);
        let candidate = hotspot.into_candidate(0.8, 0.4);
        assert_eq!(candidate.access, vec![ViewingMode::Flexible]);
        assert!(candidate.reachable_by(ViewingMode::Kayak));
    }

    #[test]
    fn empty_posteriors_are_ignored() {
        let response = UncertaintyResponse {
            posteriors: vec![PosteriorSamples {
                hotspot_id: "a".into(),
                samples: Vec::new(),
            }],
        };
        assert!(response.samples_for("a").is_none());
        assert!(response.samples_for("b").is_none());
    }

    #[tokio::test]
    async fn offline_service_always_fails() {
        let query = UncertaintyQuery {
            prediction: PredictionResponse {
                hotspots: Vec::new(),
                model_version: None,
            },
            sampling: SamplingConfig {
                samples: 10,
                seed: None,
            },
        };
        assert!(matches!(
            OfflineService.sample(&query).await,
            Err(ServiceError::Unavailable(_))
        ));
    }
}
