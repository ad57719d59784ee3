use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, BTreeSet},
    hash::{Hash, Hasher},
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    geo::GeoPoint,
    model::{BehaviorTag, ViewingMode},
};

/// Two-sided interval derived from posterior samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound.
    pub lower: f32,
    /// Upper bound.
    pub upper: f32,
}

impl ConfidenceInterval {
    /// Interval width.
    #[must_use]
    pub fn width(&self) -> f32 {
        (self.upper - self.lower).max(0.0)
    }
}

/// Location proposed by the research unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCandidate {
    /// Stable slug.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Position.
    pub point: GeoPoint,
    /// Ways the site can be reached.
    pub access: Vec<ViewingMode>,
    /// Behaviours typically observed there.
    pub behaviors: BTreeSet<BehaviorTag>,
    /// Confidence reported by the prediction model.
    pub model_confidence: f32,
    /// Confidence derived from nearby historical sightings.
    pub historical_confidence: f32,
    /// Combined confidence used for ranking.
    pub confidence: f32,
    /// Posterior interval, when uncertainty samples were available.
    pub interval: Option<ConfidenceInterval>,
    /// Historical sightings matched within the validation radius.
    pub sightings: usize,
    /// How sensitive animals at this site are to visitors (0 calm, 1 very sensitive).
    pub disturbance_factor: f32,
    /// Step-free access.
    pub accessible: bool,
    /// Operated with or by a local community partner.
    pub community_partner: bool,
    /// Has interpretive or educational programming.
    pub interpretive: bool,
}

impl LocationCandidate {
    /// Whether the site suits the requested mode.
    #[must_use]
    pub fn reachable_by(&self, mode: ViewingMode) -> bool {
        self.access.iter().any(|access| mode.accepts(*access))
    }
}

/// Output of the research unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    /// Candidates with combined confidence above the primary threshold, best first.
    pub primary: Vec<LocationCandidate>,
    /// Remaining candidates, best first.
    pub backup: Vec<LocationCandidate>,
    /// Overall confidence in the finding.
    pub confidence: f32,
    /// Whether the built-in fallback set was used.
    pub degraded: bool,
    /// Data sources that contributed.
    pub sources: Vec<String>,
    /// Production time.
    pub generated_at: DateTime<Utc>,
}

impl ResearchFinding {
    /// All candidates, primary tier first.
    pub fn candidates(&self) -> impl Iterator<Item = &LocationCandidate> {
        self.primary.iter().chain(self.backup.iter())
    }

    /// Total number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len() + self.backup.len()
    }

    /// Whether no candidate was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the scored candidate set, used in route cache keys.
    ///
    /// Covers the tier split, every candidate's confidence and the fallback
    /// flag, so a rescored finding never reuses a cached route.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.degraded.hash(&mut hasher);
        self.primary.len().hash(&mut hasher);
        for candidate in self.candidates() {
            candidate.id.hash(&mut hasher);
            candidate.confidence.to_bits().hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}

/// Strategy used to assemble a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Best-scoring sites first.
    HighestConfidence,
    /// Widest behaviour coverage.
    DiverseBehavior,
    /// Accessible, low-disturbance sites.
    ConservativeAccessible,
    /// Less-visited backup sites.
    Exploratory,
    /// Single nearest site used when planning degrades.
    MinimalFallback,
}

impl RouteStrategy {
    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::HighestConfidence => "highest confidence",
            Self::DiverseBehavior => "diverse behaviour coverage",
            Self::ConservativeAccessible => "conservative and accessible",
            Self::Exploratory => "exploratory",
            Self::MinimalFallback => "minimal fallback",
        }
    }
}

/// A stop on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    /// Candidate id.
    pub location_id: String,
    /// Display name.
    pub name: String,
    /// Position.
    pub point: GeoPoint,
    /// Candidate confidence.
    pub confidence: f32,
    /// Trip day (1-based).
    pub day: u32,
    /// Scheduled arrival.
    pub arrival: NaiveDateTime,
    /// Planned viewing time.
    pub viewing_minutes: u32,
    /// Disturbance score for this stop in `[0, 1]`.
    pub disturbance: f32,
}

/// One leg of a day schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleLeg {
    /// Moving between two points.
    Travel {
        /// Origin label.
        from: String,
        /// Destination label.
        to: String,
        /// Leg length.
        distance_km: f64,
        /// Departure.
        start: NaiveTime,
        /// Arrival.
        end: NaiveTime,
    },
    /// Slack between legs.
    Buffer {
        /// Start.
        start: NaiveTime,
        /// End.
        end: NaiveTime,
    },
    /// Time spent watching at a stop.
    Viewing {
        /// Candidate id.
        location_id: String,
        /// Start.
        start: NaiveTime,
        /// End.
        end: NaiveTime,
    },
}

/// Hour-by-hour plan for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    /// Trip day (1-based).
    pub day: u32,
    /// Calendar date.
    pub date: NaiveDate,
    /// Departure time.
    pub start: NaiveTime,
    /// Return time.
    pub end: NaiveTime,
    /// Ordered legs.
    pub legs: Vec<ScheduleLeg>,
}

/// Breakdown of the weighted sustainability score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SustainabilityReport {
    /// Share of the distance allowance left unused.
    pub distance_efficiency: f32,
    /// One minus the mean stop disturbance.
    pub disturbance_minimization: f32,
    /// Share of stops run with community partners.
    pub community: f32,
    /// Share of stops with interpretive programming.
    pub education: f32,
    /// Weighted total.
    pub overall: f32,
}

/// Fully timed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOption {
    /// Identifier.
    pub id: Uuid,
    /// Strategy that produced it.
    pub strategy: RouteStrategy,
    /// Ordered stops.
    pub stops: Vec<RouteStop>,
    /// Per-day schedule.
    pub schedule: Vec<DaySchedule>,
    /// Total travelled distance, including returns to the departure point.
    pub total_distance_km: f64,
    /// Mean stop confidence.
    pub estimated_success_rate: f32,
    /// Sustainability breakdown.
    pub sustainability: SustainabilityReport,
    /// Route confidence used for ranking.
    pub confidence: f32,
}

/// Condition that activates a contingency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContingencyTrigger {
    /// Wind, fog or swell unsafe on the water.
    AdverseWeather,
    /// No animals found at the planned stops.
    LowSightings,
    /// A participant needs step-free access.
    AccessibilityNeed,
}

/// Alternative plan for a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyPlan {
    /// Trigger.
    pub trigger: ContingencyTrigger,
    /// What to do.
    pub description: String,
    /// Replacement stops, best first.
    pub location_ids: Vec<String>,
    /// Timed route over the replacement stops, when one validates.
    pub route: Option<RouteOption>,
}

/// Strategy dropped during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedStrategy {
    /// Strategy.
    pub strategy: RouteStrategy,
    /// Why it was dropped.
    pub reason: String,
}

/// Output of the planning unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Valid routes, best first.
    pub routes: Vec<RouteOption>,
    /// Contingency table.
    pub contingencies: IndexMap<ContingencyTrigger, ContingencyPlan>,
    /// Strategies that failed validation.
    pub rejected: Vec<RejectedStrategy>,
    /// Overall planning confidence.
    pub confidence: f32,
    /// Whether the minimal fallback route was used.
    pub degraded: bool,
    /// Production time.
    pub generated_at: DateTime<Utc>,
}

impl RoutePlan {
    /// Highest ranked route.
    #[must_use]
    pub fn best(&self) -> Option<&RouteOption> {
        self.routes.first()
    }
}

/// Human-readable support for one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Justification {
    /// Location or route the statements refer to.
    pub subject: String,
    /// Statements, most important first.
    pub statements: Vec<String>,
    /// Confidence of the subject.
    pub confidence: f32,
}

/// Ranked alternative strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    /// Strategy label.
    pub strategy: String,
    /// One-line summary.
    pub summary: String,
    /// Confidence.
    pub confidence: f32,
}

/// Coarse likelihood bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodTier {
    /// Unlikely.
    Low,
    /// Plausible.
    Moderate,
    /// Expected.
    High,
}

/// Row of the risk table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskEntry {
    /// Condition.
    pub condition: String,
    /// Likelihood.
    pub likelihood: LikelihoodTier,
    /// Mitigation.
    pub mitigation: String,
}

/// Output of the reasoning unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningBundle {
    /// Justifications per recommendation.
    pub justifications: Vec<Justification>,
    /// Alternatives, best first.
    pub alternatives: Vec<Alternative>,
    /// Risk table, most likely first.
    pub risks: Vec<RiskEntry>,
    /// Confidence in the explanation.
    pub confidence: f32,
    /// Production time.
    pub generated_at: DateTime<Utc>,
}

/// Output of the analytics gathering step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Historical sightings inside the region.
    pub sightings_in_region: usize,
    /// Sightings per behaviour.
    pub behavior_counts: BTreeMap<BehaviorTag, usize>,
    /// Mean sighting confidence.
    pub mean_confidence: f32,
    /// Share of sightings recorded in the trip's calendar months.
    pub in_season_share: f32,
    /// Confidence in the snapshot.
    pub confidence: f32,
    /// Whether the snapshot could not be computed.
    pub degraded: bool,
    /// Production time.
    pub generated_at: DateTime<Utc>,
}

impl AnalyticsSnapshot {
    /// Empty snapshot used when analytics are unavailable.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            sightings_in_region: 0,
            behavior_counts: BTreeMap::new(),
            mean_confidence: 0.0,
            in_season_share: 0.0,
            confidence: 0.0,
            degraded: true,
            generated_at: Utc::now(),
        }
    }
}

/// Result produced by any coordination unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum AgentResult {
    /// Research unit output.
    Research(ResearchFinding),
    /// Planning unit output.
    Route(RoutePlan),
    /// Reasoning unit output.
    Reasoning(ReasoningBundle),
    /// Analytics output.
    Analytics(AnalyticsSnapshot),
}

impl AgentResult {
    /// Confidence in `[0, 1]`.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Research(finding) => finding.confidence,
            Self::Route(plan) => plan.confidence,
            Self::Reasoning(bundle) => bundle.confidence,
            Self::Analytics(snapshot) => snapshot.confidence,
        }
    }

    /// Production time.
    #[must_use]
    pub fn generated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Research(finding) => finding.generated_at,
            Self::Route(plan) => plan.generated_at,
            Self::Reasoning(bundle) => bundle.generated_at,
            Self::Analytics(snapshot) => snapshot.generated_at,
        }
    }

    /// Research finding, if this is one.
    #[must_use]
    pub fn into_research(self) -> Option<ResearchFinding> {
        match self {
            Self::Research(finding) => Some(finding),
            _ => None,
        }
    }

    /// Route plan, if this is one.
    #[must_use]
    pub fn into_route(self) -> Option<RoutePlan> {
        match self {
            Self::Route(plan) => Some(plan),
            _ => None,
        }
    }

    /// Analytics snapshot, if this is one.
    #[must_use]
    pub fn into_analytics(self) -> Option<AnalyticsSnapshot> {
        match self {
            Self::Analytics(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

impl From<ResearchFinding> for AgentResult {
    fn from(value: ResearchFinding) -> Self {
        Self::Research(value)
    }
}

impl From<RoutePlan> for AgentResult {
    fn from(value: RoutePlan) -> Self {
        Self::Route(value)
    }
}

impl From<ReasoningBundle> for AgentResult {
    fn from(value: ReasoningBundle) -> Self {
        Self::Reasoning(value)
    }
}

impl From<AnalyticsSnapshot> for AgentResult {
    fn from(value: AnalyticsSnapshot) -> Self {
        Self::Analytics(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, confidence: f32) -> LocationCandidate {
        LocationCandidate {
            id: id.into(),
            name: id.into(),
            point: GeoPoint::new(48.5, -123.1),
            access: vec![ViewingMode::Boat],
            behaviors: BTreeSet::new(),
            model_confidence: confidence,
            historical_confidence: confidence,
            confidence,
            interval: None,
            sightings: 2,
            disturbance_factor: 0.4,
            accessible: true,
            community_partner: false,
            interpretive: false,
        }
    }

    fn finding(confidences: [f32; 2], degraded: bool) -> ResearchFinding {
        ResearchFinding {
            primary: vec![candidate("lime-kiln-point", confidences[0])],
            backup: vec![candidate("cattle-point", confidences[1])],
            confidence: confidences[0],
            degraded,
            sources: vec!["prediction".into()],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn fingerprint_tracks_scores_and_fallback() {
        let base = finding([0.8, 0.5], false);
        assert_eq!(base.fingerprint(), finding([0.8, 0.5], false).fingerprint());
        assert_ne!(base.fingerprint(), finding([0.8, 0.45], false).fingerprint());
        assert_ne!(base.fingerprint(), finding([0.8, 0.5], true).fingerprint());

        let mut promoted = base.clone();
        promoted.primary.append(&mut promoted.backup);
        assert_ne!(base.fingerprint(), promoted.fingerprint());
    }
}
