//! Analytics gathered alongside research: what the historical record says
//! about the requested region and dates.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use orcatrail_core::{clamp_unit, mean_confidence, AnalyticsSnapshot, Constraints};
use orcatrail_research::HistoricalCorpus;
use thiserror::Error;

/// Sightings needed before the snapshot is fully trusted.
const FULL_SUPPORT: f32 = 20.0;

/// Analytics could not be produced. The orchestrator substitutes an empty snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    /// Backing data could not be read.
    #[error("analytics source unavailable: {0}")]
    Unavailable(String),
}

/// Produces an [`AnalyticsSnapshot`] for a set of constraints.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    /// Source identifier used in logs.
    fn name(&self) -> &str;

    /// Summarises the data relevant to `constraints`.
    async fn gather(&self, constraints: &Constraints) -> Result<AnalyticsSnapshot, AnalyticsError>;
}

/// Summarises in-region sightings from a historical corpus.
pub struct CorpusAnalytics {
    corpus: Arc<dyn HistoricalCorpus>,
}

impl std::fmt::Debug for CorpusAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusAnalytics")
            .field("corpus", &self.corpus.size())
            .finish()
    }
}

impl CorpusAnalytics {
    /// Wraps a corpus.
    #[must_use]
    pub fn new(corpus: Arc<dyn HistoricalCorpus>) -> Self {
        Self { corpus }
    }

    /// Snapshot computed synchronously.
    #[must_use]
    pub fn summarise(&self, constraints: &Constraints) -> AnalyticsSnapshot {
        let sightings = self.corpus.in_region(&constraints.region);
        let mut behavior_counts = BTreeMap::new();
        for behavior in sightings.iter().filter_map(|s| s.behavior) {
            *behavior_counts.entry(behavior).or_insert(0) += 1;
        }
        let confidences: Vec<f32> = sightings.iter().map(|s| s.confidence).collect();
        let mean = mean_confidence(&confidences);
        let in_season = sightings
            .iter()
            .filter(|s| constraints.date_range.covers_month_of(s.observed_on))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let (in_season_share, support) = if sightings.is_empty() {
            (0.0, 0.0)
        } else {
            (
                in_season as f32 / sightings.len() as f32,
                (sightings.len() as f32 / FULL_SUPPORT).min(1.0),
            )
        };
        AnalyticsSnapshot {
            sightings_in_region: sightings.len(),
            behavior_counts,
            mean_confidence: mean,
            in_season_share,
            confidence: clamp_unit(mean * support),
            degraded: false,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl AnalyticsSource for CorpusAnalytics {
    fn name(&self) -> &str {
        "historical-corpus"
    }

    async fn gather(&self, constraints: &Constraints) -> Result<AnalyticsSnapshot, AnalyticsError> {
        Ok(self.summarise(constraints))
    }
}
