//! Level handlers backed by a finished session plan.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use orcatrail_core::{
    BehaviorTag, Constraints, ContingencyPlan, ContingencyTrigger, FeedbackKind, LikelihoodTier,
    RealtimeFeedback, RiskEntry, RouteOption, Season,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::{
    hierarchy::{
        HierarchyError, LevelAction, LevelAnnotation, LevelHandler, LevelOutcome, PlanningLevel,
    },
    plan::{normalize_name, CombinedPlan, Recommendation},
};

/// Recommendations handed to the strategic level.
const STRATEGIC_SHORTLIST: usize = 5;

/// What the level handlers know about a session.
#[derive(Debug, Clone)]
pub struct LevelBrief {
    /// Session constraints.
    pub constraints: Constraints,
    /// Deduplicated recommendations.
    pub recommendations: Vec<Recommendation>,
    /// Best route, when one exists.
    pub best_route: Option<RouteOption>,
    /// Contingency table.
    pub contingencies: IndexMap<ContingencyTrigger, ContingencyPlan>,
    /// Risk table.
    pub risks: Vec<RiskEntry>,
}

impl LevelBrief {
    /// Brief drawn from an assembled plan.
    #[must_use]
    pub fn from_plan(constraints: &Constraints, plan: &CombinedPlan) -> Self {
        Self {
            constraints: constraints.clone(),
            recommendations: plan.recommendations.clone(),
            best_route: plan.best_route().cloned(),
            contingencies: plan.contingencies.clone(),
            risks: plan.reasoning.risks.clone(),
        }
    }

    fn high_risks(&self) -> Vec<String> {
        self.risks
            .iter()
            .filter(|risk| risk.likelihood == LikelihoodTier::High)
            .map(|risk| risk.condition.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct LevelState {
    summary: Option<String>,
    updates: Vec<(PlanningLevel, Map<String, Value>)>,
}

/// Handler for one level, answering from a [`LevelBrief`].
#[derive(Debug)]
pub struct PlanLevelHandler {
    level: PlanningLevel,
    brief: Arc<LevelBrief>,
    state: Mutex<LevelState>,
}

impl PlanLevelHandler {
    /// Handler for `level`.
    #[must_use]
    pub fn new(level: PlanningLevel, brief: Arc<LevelBrief>) -> Self {
        Self {
            level,
            brief,
            state: Mutex::new(LevelState::default()),
        }
    }

    /// One handler per level sharing `brief`.
    #[must_use]
    pub fn full_set(brief: &Arc<LevelBrief>) -> Vec<Arc<dyn LevelHandler>> {
        PlanningLevel::ALL
            .into_iter()
            .map(|level| Arc::new(Self::new(level, Arc::clone(brief))) as Arc<dyn LevelHandler>)
            .collect()
    }

    fn strategic(&self) -> (String, Map<String, Value>) {
        let brief = &self.brief;
        let constraints = &brief.constraints;
        let objectives: Vec<String> = if constraints.interests.is_empty() {
            vec!["observe orcas in any behaviour".into()]
        } else {
            constraints
                .interests
                .iter()
                .map(|tag| format!("observe {}", tag.label()))
                .collect()
        };
        let shortlist: Vec<&str> = brief
            .recommendations
            .iter()
            .take(STRATEGIC_SHORTLIST)
            .map(|r| r.location_id.as_str())
            .collect();
        let days = constraints.trip_duration_days();
        let data = object(json!({
            "objectives": objectives,
            "constraints": {
                "days": days,
                "group_size": constraints.group_size,
                "viewing_mode": constraints.viewing_mode,
                "accessibility_required": constraints.accessibility_required,
                "budget": constraints.budget,
            },
            "resources": {
                "candidate_sites": brief.recommendations.len(),
                "behaviors_covered": covered_behaviors(brief),
                "route_available": brief.best_route.is_some(),
            },
            "locations": shortlist,
            "timing": {
                "start": constraints.date_range.start,
                "end": constraints.date_range.end,
                "days": days,
            },
            "conditions": { "season": Season::of(constraints.date_range.start) },
        }));
        let summary = format!(
            "{days}-day {} trip, {} candidate site(s)",
            constraints.viewing_mode,
            brief.recommendations.len()
        );
        (summary, data)
    }

    fn route(&self) -> (String, Map<String, Value>) {
        let brief = &self.brief;
        let Some(route) = &brief.best_route else {
            let data = object(json!({
                "locations": [],
                "alerts": ["no route satisfied the trip limits"],
            }));
            return ("no route available".into(), data);
        };
        let stops: Vec<&str> = route.stops.iter().map(|s| s.location_id.as_str()).collect();
        let timing: Vec<Value> = route
            .schedule
            .iter()
            .map(|day| json!({ "day": day.day, "date": day.date, "start": day.start, "end": day.end }))
            .collect();
        let summary = format!(
            "{} route over {} stop(s), {:.1} km",
            route.strategy.label(),
            route.stops.len(),
            route.total_distance_km
        );
        let data = object(json!({
            "locations": stops,
            "timing": timing,
            "logistics": {
                "viewing_mode": brief.constraints.viewing_mode,
                "distance_km": route.total_distance_km,
                "stops": route.stops.len(),
            },
            "conditions": brief.risks.iter().map(|r| r.condition.clone()).collect::<Vec<_>>(),
            "adjustments": brief.contingencies.keys().collect::<Vec<_>>(),
            "alerts": brief.high_risks(),
            "updates": [summary.clone()],
        }));
        (summary, data)
    }

    fn tactical(&self) -> (String, Map<String, Value>) {
        let brief = &self.brief;
        let adaptations: Vec<Value> = brief
            .contingencies
            .values()
            .map(|variant| json!({ "trigger": variant.trigger, "plan": variant.description }))
            .collect();
        let adjustments: Vec<Value> = self
            .state
            .lock()
            .updates
            .iter()
            .filter(|(source, _)| *source == PlanningLevel::Realtime)
            .filter_map(|(_, params)| params.get("adjustments").cloned())
            .collect();
        let summary = format!(
            "{} contingenc(ies) ready, {} field adjustment(s)",
            adaptations.len(),
            adjustments.len()
        );
        let data = object(json!({
            "conditions": brief.risks.iter().map(|r| r.condition.clone()).collect::<Vec<_>>(),
            "adaptations": adaptations,
            "adjustments": adjustments,
            "alerts": brief.high_risks(),
        }));
        (summary, data)
    }

    fn realtime(&self, feedback: &RealtimeFeedback) -> (String, Map<String, Value>) {
        let brief = &self.brief;
        let contingency = |trigger: ContingencyTrigger| brief.contingencies.get(&trigger);
        let (label, response, replacements) = match &feedback.kind {
            FeedbackKind::AdverseWeather => {
                let plan = contingency(ContingencyTrigger::AdverseWeather);
                (
                    "adverse weather".to_owned(),
                    plan.map_or_else(
                        || "Hold at the departure point until conditions improve".to_owned(),
                        |p| p.description.clone(),
                    ),
                    plan.map(|p| p.location_ids.clone()).unwrap_or_default(),
                )
            }
            FeedbackKind::LowSightings => {
                let plan = contingency(ContingencyTrigger::LowSightings);
                (
                    "low sightings".to_owned(),
                    plan.map_or_else(
                        || "Extend time at the strongest stop".to_owned(),
                        |p| p.description.clone(),
                    ),
                    plan.map(|p| p.location_ids.clone()).unwrap_or_default(),
                )
            }
            FeedbackKind::AccessibilityIssue => {
                let plan = contingency(ContingencyTrigger::AccessibilityNeed);
                (
                    "accessibility issue".to_owned(),
                    plan.map_or_else(
                        || "Switch to the nearest step-free viewpoint".to_owned(),
                        |p| p.description.clone(),
                    ),
                    plan.map(|p| p.location_ids.clone()).unwrap_or_default(),
                )
            }
            FeedbackKind::Sighting { location } => {
                let wanted = normalize_name(location);
                let known = brief.recommendations.iter().find(|r| {
                    r.location_id == *location || normalize_name(&r.name) == wanted
                });
                match known {
                    Some(site) => (
                        format!("sighting at {}", site.name),
                        format!("Redirect to {} while the animals are present", site.name),
                        vec![site.location_id.clone()],
                    ),
                    None => (
                        format!("sighting at {location}"),
                        format!("Log the sighting at {location}; it is outside the plan"),
                        Vec::new(),
                    ),
                }
            }
        };
        let data = object(json!({
            "alerts": [feedback.note],
            "updates": [label],
            "responses": [response],
            "conditions": [label],
            "adaptations": replacements,
            "adjustments": response,
        }));
        (format!("{label}: {response}"), data)
    }
}

impl LevelHandler for PlanLevelHandler {
    fn level(&self) -> PlanningLevel {
        self.level
    }

    fn handle(&self, action: &LevelAction) -> Result<LevelOutcome, HierarchyError> {
        let (summary, data) = match self.level {
            PlanningLevel::Strategic => self.strategic(),
            PlanningLevel::Route => self.route(),
            PlanningLevel::Tactical => self.tactical(),
            PlanningLevel::Realtime => {
                let feedback = action.as_feedback().ok_or_else(|| HierarchyError::InvalidAction {
                    level: self.level,
                    reason: format!("expected a feedback report, got `{}`", action.name),
                })?;
                self.realtime(&feedback)
            }
        };
        self.state.lock().summary = Some(summary.clone());
        Ok(LevelOutcome {
            level: self.level,
            action: action.name.clone(),
            summary,
            data,
            at: Utc::now(),
        })
    }

    fn handle_update(
        &self,
        source: PlanningLevel,
        params: &Map<String, Value>,
    ) -> Result<(), HierarchyError> {
        self.state.lock().updates.push((source, params.clone()));
        Ok(())
    }

    fn annotation(&self) -> LevelAnnotation {
        let state = self.state.lock();
        let mut sources = Vec::new();
        for (source, _) in &state.updates {
            if !sources.contains(source) {
                sources.push(*source);
            }
        }
        let summary = state.summary.clone().unwrap_or_else(|| {
            if state.updates.is_empty() {
                "no activity".to_owned()
            } else {
                format!("holding {} update(s)", state.updates.len())
            }
        });
        LevelAnnotation {
            level: self.level,
            horizon: self.level.horizon().to_owned(),
            summary,
            updates_received: state.updates.len(),
            sources,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn covered_behaviors(brief: &LevelBrief) -> Vec<BehaviorTag> {
    let mut tags: Vec<BehaviorTag> = brief
        .recommendations
        .iter()
        .flat_map(|r| r.behaviors.iter().copied())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyCoordinator;
    use chrono::NaiveDate;
    use orcatrail_core::{DateRange, GeoPoint, Region, ViewingMode};
    use std::collections::BTreeSet;

    fn brief() -> Arc<LevelBrief> {
        let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let mut contingencies = IndexMap::new();
        contingencies.insert(
            ContingencyTrigger::AdverseWeather,
            ContingencyPlan {
                trigger: ContingencyTrigger::AdverseWeather,
                description: "Switch to shore viewpoints".into(),
                location_ids: vec!["lime-kiln-point".into()],
                route: None,
            },
        );
        Arc::new(LevelBrief {
            constraints: Constraints {
                date_range: DateRange::new(start, start).unwrap(),
                region: Region {
                    center: GeoPoint::new(48.53, -123.08),
                    radius_km: 40.0,
                },
                group_size: 2,
                accessibility_required: false,
                budget: None,
                interests: BTreeSet::from([BehaviorTag::Foraging]),
                viewing_mode: ViewingMode::Boat,
            },
            recommendations: vec![Recommendation {
                location_id: "lime-kiln-point".into(),
                name: "Lime Kiln Point State Park".into(),
                point: GeoPoint::new(48.5159, -123.1524),
                confidence: 0.8,
                accessible: true,
                behaviors: BTreeSet::from([BehaviorTag::Foraging, BehaviorTag::Traveling]),
                sources: vec!["research:primary".into()],
            }],
            best_route: None,
            contingencies,
            risks: vec![RiskEntry {
                condition: "Fog".into(),
                likelihood: LikelihoodTier::High,
                mitigation: "Wait".into(),
            }],
        })
    }

    fn coordinator(brief: &Arc<LevelBrief>) -> HierarchyCoordinator {
        let coordinator = HierarchyCoordinator::new();
        for handler in PlanLevelHandler::full_set(brief) {
            coordinator.register(handler);
        }
        coordinator
    }

    #[test]
    fn strategic_distribution_reaches_route_and_tactical() {
        let brief = brief();
        let coordinator = coordinator(&brief);
        let propagation = coordinator
            .execute(PlanningLevel::Strategic, &LevelAction::new("distribute", Value::Null))
            .unwrap();
        assert_eq!(
            propagation.notified,
            vec![PlanningLevel::Route, PlanningLevel::Tactical]
        );
        assert_eq!(
            propagation.outcome.data["objectives"],
            json!(["observe foraging"])
        );
        assert_eq!(
            propagation.outcome.data["resources"]["behaviors_covered"],
            json!(["foraging", "traveling"])
        );
        let annotations = coordinator.annotations();
        assert_eq!(annotations.len(), 4);
        assert_eq!(annotations[1].sources, vec![PlanningLevel::Strategic]);
        assert_eq!(annotations[3].updates_received, 0);
    }

    #[test]
    fn feedback_uses_the_contingency_table() {
        let brief = brief();
        let coordinator = coordinator(&brief);
        let feedback = RealtimeFeedback::broadcast(FeedbackKind::AdverseWeather, "small craft advisory");
        let propagation = coordinator.apply_feedback(&feedback).unwrap().unwrap();
        assert_eq!(propagation.notified, vec![PlanningLevel::Tactical]);
        assert_eq!(
            propagation.outcome.data["responses"],
            json!(["Switch to shore viewpoints"])
        );

        coordinator
            .execute(PlanningLevel::Tactical, &LevelAction::new("review", Value::Null))
            .unwrap();
        let tactical = coordinator.result(PlanningLevel::Tactical).unwrap();
        assert_eq!(
            tactical.data["adjustments"],
            json!(["Switch to shore viewpoints"])
        );
    }

    #[test]
    fn sightings_match_recommendations_by_name() {
        let brief = brief();
        let coordinator = coordinator(&brief);
        let feedback = RealtimeFeedback::broadcast(
            FeedbackKind::Sighting {
                location: "lime kiln point state park".into(),
            },
            "J pod foraging",
        );
        let propagation = coordinator.apply_feedback(&feedback).unwrap().unwrap();
        assert_eq!(
            propagation.outcome.data["adaptations"],
            json!(["lime-kiln-point"])
        );
    }

    #[test]
    fn realtime_rejects_non_feedback_actions() {
        let brief = brief();
        let coordinator = coordinator(&brief);
        let err = coordinator
            .execute(PlanningLevel::Realtime, &LevelAction::new("poll", Value::Null))
            .unwrap_err();
        assert!(matches!(err, HierarchyError::InvalidAction { .. }));
    }
}
