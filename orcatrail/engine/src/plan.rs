use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::{map::Entry, IndexMap};
use orcatrail_core::{
    clamp_unit, combine_confidence, AnalyticsSnapshot, BehaviorTag, ContingencyPlan,
    ContingencyTrigger, GeoPoint, LocationCandidate, OrchestratorConfig, ReasoningBundle,
    ResearchFinding, RouteOption, RoutePlan, Session, SessionId, SustainabilityReport,
};
use serde::{Deserialize, Serialize};

use crate::hierarchy::LevelAnnotation;

/// Recommended location after merging every unit's view of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Candidate id of the highest-confidence contributor.
    pub location_id: String,
    /// Display name.
    pub name: String,
    /// Position.
    pub point: GeoPoint,
    /// Highest confidence among contributors.
    pub confidence: f32,
    /// Step-free access.
    pub accessible: bool,
    /// Behaviours usually observed.
    pub behaviors: BTreeSet<BehaviorTag>,
    /// Contributors, first seen first.
    pub sources: Vec<String>,
}

impl Recommendation {
    /// Recommendation contributed by a research candidate.
    #[must_use]
    pub fn from_candidate(candidate: &LocationCandidate, source: impl Into<String>) -> Self {
        Self {
            location_id: candidate.id.clone(),
            name: candidate.name.clone(),
            point: candidate.point,
            confidence: clamp_unit(candidate.confidence),
            accessible: candidate.accessible,
            behaviors: candidate.behaviors.clone(),
            sources: vec![source.into()],
        }
    }
}

/// Lowercase, punctuation replaced by spaces, whitespace collapsed.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .flat_map(|c| {
            let keep = if c.is_alphanumeric() { c } else { ' ' };
            keep.to_lowercase()
        })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Merges recommendations naming the same place, keeping the highest
/// confidence instance and the union of sources. Best first.
#[must_use]
pub fn dedup_recommendations<I>(items: I) -> Vec<Recommendation>
where
    I: IntoIterator<Item = Recommendation>,
{
    let mut merged: IndexMap<String, Recommendation> = IndexMap::new();
    for mut item in items {
        item.confidence = clamp_unit(item.confidence);
        match merged.entry(normalize_name(&item.name)) {
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let mut sources = std::mem::take(&mut existing.sources);
                for source in &item.sources {
                    if !sources.contains(source) {
                        sources.push(source.clone());
                    }
                }
                if item.confidence > existing.confidence {
                    *existing = item;
                }
                existing.sources = sources;
            }
        }
    }
    let mut recommendations: Vec<_> = merged.into_values().collect();
    recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    recommendations
}

/// Blend of the baseline and the research/planning confidence, capped when degraded.
#[must_use]
pub fn overall_confidence(
    baseline: Option<f32>,
    research: f32,
    planning: f32,
    degraded: bool,
    config: &OrchestratorConfig,
) -> f32 {
    let combined = combine_confidence(&[research, planning], &[0.5, 0.5]);
    let overall = baseline.map_or(combined, |baseline| {
        combine_confidence(
            &[baseline, combined],
            &[config.baseline_weight, config.combined_weight],
        )
    });
    if degraded {
        overall.min(clamp_unit(config.degraded_ceiling))
    } else {
        overall
    }
}

/// Unit outputs merged into a [`CombinedPlan`].
#[derive(Debug, Clone, Copy)]
pub struct PlanInputs<'a> {
    /// Session being completed.
    pub session: &'a Session,
    /// Research output.
    pub finding: &'a ResearchFinding,
    /// Planning output.
    pub plan: &'a RoutePlan,
    /// Reasoning output.
    pub reasoning: &'a ReasoningBundle,
    /// Analytics output.
    pub analytics: &'a AnalyticsSnapshot,
}

/// Final artifact of a session. Built once, never modified after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedPlan {
    /// Session.
    pub session_id: SessionId,
    /// Short prose summary.
    pub executive_summary: String,
    /// Deduplicated recommendations, best first.
    pub recommendations: Vec<Recommendation>,
    /// Ranked timed routes.
    pub routes: Vec<RouteOption>,
    /// Contingency table.
    pub contingencies: IndexMap<ContingencyTrigger, ContingencyPlan>,
    /// Sustainability metrics of the best route.
    pub sustainability: SustainabilityReport,
    /// Justifications, alternatives and risks.
    pub reasoning: ReasoningBundle,
    /// Historical analytics.
    pub analytics: AnalyticsSnapshot,
    /// Research confidence.
    pub research_confidence: f32,
    /// Planning confidence.
    pub planning_confidence: f32,
    /// Blended confidence.
    pub overall_confidence: f32,
    /// Whether research or planning ran on fallbacks.
    pub degraded: bool,
    /// Data sources behind the research.
    pub sources: Vec<String>,
    /// Per-level annotations.
    pub level_annotations: Vec<LevelAnnotation>,
    /// Assembly time.
    pub generated_at: DateTime<Utc>,
}

impl CombinedPlan {
    /// Merges unit outputs. Level annotations are attached separately.
    #[must_use]
    pub fn assemble(inputs: PlanInputs<'_>, config: &OrchestratorConfig) -> Self {
        let PlanInputs {
            session,
            finding,
            plan,
            reasoning,
            analytics,
        } = inputs;

        let from_research = finding
            .primary
            .iter()
            .map(|c| Recommendation::from_candidate(c, "research:primary"))
            .chain(
                finding
                    .backup
                    .iter()
                    .map(|c| Recommendation::from_candidate(c, "research:backup")),
            );
        let from_routes = plan.routes.iter().flat_map(move |route| {
            route.stops.iter().filter_map(move |stop| {
                finding
                    .candidates()
                    .find(|c| c.id == stop.location_id)
                    .map(|c| {
                        let mut recommendation = Recommendation::from_candidate(
                            c,
                            format!("route:{}", route.strategy.label()),
                        );
                        recommendation.confidence = clamp_unit(stop.confidence);
                        recommendation
                    })
            })
        });
        let recommendations = dedup_recommendations(from_research.chain(from_routes));

        let degraded = finding.degraded || plan.degraded;
        let overall = overall_confidence(
            session.context.baseline_confidence,
            finding.confidence,
            plan.confidence,
            degraded,
            config,
        );
        let executive_summary = summarise(session, finding, plan, overall);

        Self {
            session_id: session.id,
            executive_summary,
            recommendations,
            routes: plan.routes.clone(),
            contingencies: plan.contingencies.clone(),
            sustainability: plan
                .best()
                .map(|route| route.sustainability)
                .unwrap_or_default(),
            reasoning: reasoning.clone(),
            analytics: analytics.clone(),
            research_confidence: finding.confidence,
            planning_confidence: plan.confidence,
            overall_confidence: overall,
            degraded,
            sources: finding.sources.clone(),
            level_annotations: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Attaches the planning level annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Vec<LevelAnnotation>) -> Self {
        self.level_annotations = annotations;
        self
    }

    /// Highest ranked route.
    #[must_use]
    pub fn best_route(&self) -> Option<&RouteOption> {
        self.routes.first()
    }
}

fn summarise(session: &Session, finding: &ResearchFinding, plan: &RoutePlan, overall: f32) -> String {
    let constraints = &session.constraints;
    let days = constraints.trip_duration_days();
    let mut summary = format!(
        "{days}-day {} trip for {}",
        constraints.viewing_mode, constraints.group_size
    );
    match plan.best() {
        Some(best) => summary.push_str(&format!(
            ": {} route option(s); the best follows the {} strategy across {} stop(s) and {:.1} km.",
            plan.routes.len(),
            best.strategy.label(),
            best.stops.len(),
            best.total_distance_km
        )),
        None => summary.push_str(": no route satisfied the distance and success limits."),
    }
    summary.push_str(&format!(" Overall confidence {:.0}%.", overall * 100.0));
    if finding.degraded {
        summary.push_str(" Live predictions were unavailable, so sites come from the built-in list.");
    }
    if plan.degraded {
        summary.push_str(" Only a minimal fallback route could be built.");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recommendation(name: &str, confidence: f32, source: &str) -> Recommendation {
        Recommendation {
            location_id: normalize_name(name).replace(' ', "-"),
            name: name.into(),
            point: GeoPoint::new(48.5, -123.1),
            confidence,
            accessible: false,
            behaviors: BTreeSet::new(),
            sources: vec![source.into()],
        }
    }

    #[test]
    fn normalizes_case_punctuation_and_spacing() {
        assert_eq!(normalize_name("  Lime-Kiln   Point! "), "lime kiln point");
        assert_eq!(normalize_name("LIME KILN POINT"), "lime kiln point");
        assert_eq!(normalize_name("..."), "");
    }

    #[test]
    fn dedup_keeps_maximum_confidence() {
        let merged = dedup_recommendations([
            recommendation("Lime Kiln Point", 0.62, "research:backup"),
            recommendation("lime-kiln point", 0.91, "route:exploratory"),
            recommendation("Cattle Point", 0.7, "research:primary"),
            recommendation("LIME KILN POINT.", 0.4, "route:minimal fallback"),
        ]);
        assert_eq!(merged.len(), 2);
        let lime = &merged[0];
        assert!((lime.confidence - 0.91).abs() < f32::EPSILON);
        assert_eq!(lime.name, "lime-kiln point");
        assert_eq!(
            lime.sources,
            vec![
                "research:backup",
                "route:exploratory",
                "route:minimal fallback"
            ]
        );
        assert!((merged[1].confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn dedup_never_sums_or_leaves_range() {
        let merged = dedup_recommendations([
            recommendation("Eagle Point", 0.8, "a"),
            recommendation("Eagle Point", 0.8, "b"),
            recommendation("Turn Point", 1.7, "c"),
        ]);
        assert!((merged[1].confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(merged[0].confidence, 1.0);
    }

    #[test]
    fn overall_confidence_blends_and_caps() {
        let config = OrchestratorConfig::default();
        // No baseline: the research/planning mean.
        assert!((overall_confidence(None, 0.8, 0.6, false, &config) - 0.7).abs() < 1e-6);
        // 0.4 * 0.5 + 0.6 * 0.7
        assert!((overall_confidence(Some(0.5), 0.8, 0.6, false, &config) - 0.62).abs() < 1e-6);
        assert!((overall_confidence(Some(1.0), 0.9, 0.9, true, &config) - 0.65).abs() < 1e-6);
        assert!(overall_confidence(None, 0.3, 0.2, true, &config) < 0.65);
    }
}
