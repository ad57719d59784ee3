use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use orcatrail_core::{
    clamp_unit, mean_confidence, AgentResult, CacheKey, CacheStore, ConfidenceInterval,
    Constraints, LocationCandidate, ResearchConfig, ResearchFinding, Telemetry,
};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    corpus::HistoricalCorpus,
    services::{
        PredictionQuery, PredictionResponse, PredictionService, SamplingConfig, ServiceError,
        UncertaintyQuery, UncertaintyResponse, UncertaintyService,
    },
    sites::fallback_candidates,
};

/// Sightings needed for full historical support.
const HISTORICAL_SUPPORT: f32 = 5.0;
/// Candidates averaged into the finding confidence.
const CONFIDENCE_TOP_N: usize = 5;

/// Errors that escape the research unit. Service failures never do; they degrade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResearchError {
    /// The session was cancelled.
    #[error("research cancelled")]
    Cancelled,
    /// Constraints cannot be researched.
    #[error("invalid research constraints: {0}")]
    InvalidConstraints(String),
}

/// Finding plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchOutcome {
    /// The finding.
    pub finding: ResearchFinding,
    /// Served from the cache.
    pub from_cache: bool,
}

/// Queries the model services, validates against history and ranks sites.
pub struct ResearchUnit {
    prediction: Arc<dyn PredictionService>,
    uncertainty: Arc<dyn UncertaintyService>,
    corpus: Arc<dyn HistoricalCorpus>,
    cache: Arc<CacheStore>,
    config: ResearchConfig,
    telemetry: Option<Telemetry>,
}

impl std::fmt::Debug for ResearchUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchUnit")
            .field("prediction", &self.prediction.name())
            .field("uncertainty", &self.uncertainty.name())
            .field("corpus", &self.corpus.size())
            .finish_non_exhaustive()
    }
}

impl ResearchUnit {
    /// Creates a research unit.
    #[must_use]
    pub fn new(
        prediction: Arc<dyn PredictionService>,
        uncertainty: Arc<dyn UncertaintyService>,
        corpus: Arc<dyn HistoricalCorpus>,
        cache: Arc<CacheStore>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            prediction,
            uncertainty,
            corpus,
            cache,
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Ranked locations for `constraints`. Never empty when the services fail.
    pub async fn research_locations(
        &self,
        constraints: &Constraints,
        cancel: &CancellationToken,
    ) -> Result<ResearchFinding, ResearchError> {
        self.research(constraints, cancel)
            .await
            .map(|outcome| outcome.finding)
    }

    /// Like [`Self::research_locations`], also reporting whether the cache answered.
    pub async fn research(
        &self,
        constraints: &Constraints,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        if !(constraints.region.radius_km.is_finite() && constraints.region.radius_km > 0.0) {
            return Err(ResearchError::InvalidConstraints(format!(
                "region radius {} km",
                constraints.region.radius_km
            )));
        }
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        let key = CacheKey::research(constraints);
        if let Some(finding) = self.cache.get(&key).and_then(AgentResult::into_research) {
            self.log(
                LogLevel::Info,
                "research.cache.hit",
                json!({ "key": key.as_str(), "candidates": finding.len() }),
            );
            return Ok(ResearchOutcome {
                finding,
                from_cache: true,
            });
        }

        let finding = match self.query_services(constraints, cancel).await {
            Ok((prediction, uncertainty)) => self.validate(constraints, prediction, &uncertainty),
            Err(ServiceError::Cancelled) => return Err(ResearchError::Cancelled),
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    "research.fallback.engaged",
                    json!({ "reason": err.to_string() }),
                );
                self.fallback(constraints)
            }
        };

        if finding.degraded {
            self.log(
                LogLevel::Debug,
                "research.cache.skipped",
                json!({ "reason": "degraded finding" }),
            );
        } else {
            self.cache
                .put(key, finding.clone().into(), self.config.cache_ttl());
        }
        self.log(
            LogLevel::Info,
            "research.completed",
            json!({
                "primary": finding.primary.len(),
                "backup": finding.backup.len(),
                "confidence": finding.confidence,
                "degraded": finding.degraded,
            }),
        );
        Ok(ResearchOutcome {
            finding,
            from_cache: false,
        })
    }

    async fn query_services(
        &self,
        constraints: &Constraints,
        cancel: &CancellationToken,
    ) -> Result<(PredictionResponse, UncertaintyResponse), ServiceError> {
        let query = PredictionQuery::for_constraints(constraints, self.config.prediction_resolution_km);
        let prediction = self
            .call(
                self.prediction.name(),
                self.config.prediction_timeout(),
                cancel,
                || self.prediction.predict(&query),
            )
            .await?;
        if prediction.hotspots.is_empty() {
            return Err(ServiceError::Decode("prediction returned no hotspots".into()));
        }
        let request = UncertaintyQuery {
            prediction,
            sampling: SamplingConfig {
                samples: self.config.uncertainty_samples,
                seed: None,
            },
        };
        let uncertainty = self
            .call(
                self.uncertainty.name(),
                self.config.uncertainty_timeout(),
                cancel,
                || self.uncertainty.sample(&request),
            )
            .await?;
        Ok((request.prediction, uncertainty))
    }

    /// Runs `op` under the timeout, retrying up to the configured count.
    async fn call<T, F, Fut>(
        &self,
        service: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let attempts = self.config.retry_attempts.saturating_add(1);
        let mut last = ServiceError::Unavailable(service.to_owned());
        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ServiceError::Cancelled),
                result = tokio::time::timeout(timeout, op()) => result,
            };
            match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => last = err,
                Err(_) => last = ServiceError::Timeout(timeout),
            }
            self.log(
                LogLevel::Warn,
                "research.service.failed",
                json!({
                    "service": service,
                    "attempt": attempt,
                    "of": attempts,
                    "error": last.to_string(),
                }),
            );
        }
        Err(last)
    }

    fn validate(
        &self,
        constraints: &Constraints,
        prediction: PredictionResponse,
        uncertainty: &UncertaintyResponse,
    ) -> ResearchFinding {
        let model_version = prediction.model_version.clone();
        let candidates = prediction
            .hotspots
            .into_iter()
            .map(|hotspot| {
                let posterior = uncertainty.samples_for(&hotspot.id).map(summarize_posterior);
                let model = posterior.map_or(clamp_unit(hotspot.confidence), |(mean, _)| mean);
                let nearby = self
                    .corpus
                    .near(&hotspot.point, self.config.validation_radius_km);
                let historical = historical_confidence(
                    &nearby.iter().map(|s| s.confidence).collect::<Vec<_>>(),
                );
                let mut candidate = hotspot.into_candidate(model, historical);
                candidate.confidence = mean_confidence(&[model, historical]);
                candidate.interval = posterior.map(|(_, interval)| interval);
                candidate.sightings = nearby.len();
                candidate
            })
            .collect::<Vec<_>>();
        let mut sources = vec![
            format!(
                "prediction:{}{}",
                self.prediction.name(),
                model_version.map(|v| format!("@{v}")).unwrap_or_default()
            ),
            format!("uncertainty:{}", self.uncertainty.name()),
        ];
        if self.corpus.size() > 0 {
            sources.push("historical-corpus".into());
        }
        self.rank(constraints, candidates, false, sources)
    }

    fn fallback(&self, constraints: &Constraints) -> ResearchFinding {
        let all = fallback_candidates(self.config.fallback_confidence);
        let suitable = all
            .iter()
            .filter(|candidate| suits(constraints, candidate))
            .cloned()
            .collect::<Vec<_>>();
        let mut candidates = if suitable.is_empty() { all } else { suitable };
        let center = constraints.region.center;
        candidates.sort_by(|a, b| {
            a.point
                .distance_km(&center)
                .total_cmp(&b.point.distance_km(&center))
        });
        let mut finding = self.rank(constraints, candidates, true, vec!["fallback".into()]);
        finding.confidence = clamp_unit(self.config.fallback_confidence);
        finding
    }

    fn rank(
        &self,
        constraints: &Constraints,
        candidates: Vec<LocationCandidate>,
        degraded: bool,
        sources: Vec<String>,
    ) -> ResearchFinding {
        let before = candidates.len();
        let mut kept = if degraded {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|candidate| {
                    constraints.region.contains(&candidate.point) && suits(constraints, candidate)
                })
                .collect::<Vec<_>>()
        };
        if kept.len() < before {
            self.log(
                LogLevel::Debug,
                "research.candidates.filtered",
                json!({ "dropped": before - kept.len() }),
            );
        }
        // Stable sort keeps the fallback distance order among equal confidences.
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let threshold = self.config.primary_threshold;
        let (primary, backup): (Vec<_>, Vec<_>) =
            kept.into_iter().partition(|c| c.confidence > threshold);
        let top = primary
            .iter()
            .chain(backup.iter())
            .take(CONFIDENCE_TOP_N)
            .map(|c| c.confidence)
            .collect::<Vec<_>>();
        ResearchFinding {
            primary,
            backup,
            confidence: mean_confidence(&top),
            degraded,
            sources,
            generated_at: Utc::now(),
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

fn suits(constraints: &Constraints, candidate: &LocationCandidate) -> bool {
    candidate.reachable_by(constraints.viewing_mode)
        && (!constraints.accessibility_required || candidate.accessible)
}

/// Mean of observer confidences scaled by how well-supported the site is; `0` without sightings.
fn historical_confidence(confidences: &[f32]) -> f32 {
    if confidences.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let support = (confidences.len() as f32 / HISTORICAL_SUPPORT).min(1.0);
    clamp_unit(mean_confidence(confidences) * support)
}

/// Posterior mean and 5th to 95th percentile interval.
fn summarize_posterior(samples: &[f32]) -> (f32, ConfidenceInterval) {
    let mut sorted = samples
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .map(clamp_unit)
        .collect::<Vec<_>>();
    if sorted.is_empty() {
        return (
            0.0,
            ConfidenceInterval {
                lower: 0.0,
                upper: 0.0,
            },
        );
    }
    sorted.sort_by(f32::total_cmp);
    let percentile = |p: f32| {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((sorted.len() - 1) as f32 * p).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    };
    let interval = ConfidenceInterval {
        lower: percentile(0.05),
        upper: percentile(0.95),
    };
    (mean_confidence(&sorted), interval)
}
