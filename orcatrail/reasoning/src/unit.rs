use std::collections::HashSet;

use chrono::Utc;
use orcatrail_core::{
    combine_confidence, Alternative, AnalyticsSnapshot, Constraints, ContingencyTrigger,
    Justification, LocationCandidate, ReasoningBundle, ResearchFinding, RouteOption, RoutePlan,
    Telemetry,
};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;

use crate::risk::assess_risks;

/// Reasoning only fails on inconsistent input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReasoningError {
    /// Input is malformed or inconsistent.
    #[error("invalid reasoning input: {0}")]
    InvalidInput(String),
}

/// Optional session context that sharpens the explanation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasoningContext<'a> {
    /// Session constraints.
    pub constraints: Option<&'a Constraints>,
    /// Analytics gathered alongside research.
    pub analytics: Option<&'a AnalyticsSnapshot>,
}

/// Explains research and planning output.
#[derive(Debug, Default)]
pub struct ReasoningUnit {
    telemetry: Option<Telemetry>,
}

impl ReasoningUnit {
    /// Creates a reasoning unit.
    #[must_use]
    pub const fn new() -> Self {
        Self { telemetry: None }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Justifications, alternatives and risks without session context.
    pub fn explain(
        &self,
        finding: &ResearchFinding,
        plan: &RoutePlan,
    ) -> Result<ReasoningBundle, ReasoningError> {
        self.explain_in_context(finding, plan, &ReasoningContext::default())
    }

    /// Like [`Self::explain`], using constraints and analytics when present.
    pub fn explain_in_context(
        &self,
        finding: &ResearchFinding,
        plan: &RoutePlan,
        context: &ReasoningContext<'_>,
    ) -> Result<ReasoningBundle, ReasoningError> {
        validate(finding, plan)?;

        // One justification per candidate: best-route stops first, then the rest by tier.
        let mut justifications = Vec::new();
        let mut ordered: Vec<&LocationCandidate> = Vec::with_capacity(finding.len());
        let mut seen = HashSet::new();
        if let Some(best) = plan.best() {
            justifications.push(justify_route(best, plan.degraded));
            for stop in &best.stops {
                if let Some(candidate) = finding.candidates().find(|c| c.id == stop.location_id) {
                    if seen.insert(candidate.id.as_str()) {
                        ordered.push(candidate);
                    }
                }
            }
        }
        for candidate in finding.candidates() {
            if seen.insert(candidate.id.as_str()) {
                ordered.push(candidate);
            }
        }
        justifications.extend(
            ordered
                .into_iter()
                .map(|candidate| justify_location(candidate, finding.degraded, context)),
        );

        let mut alternatives: Vec<Alternative> = plan
            .routes
            .iter()
            .skip(1)
            .map(|route| Alternative {
                strategy: route.strategy.label().to_owned(),
                summary: route_summary(route),
                confidence: route.confidence,
            })
            .chain(plan.contingencies.values().filter_map(|variant| {
                variant.route.as_ref().map(|route| Alternative {
                    strategy: format!("contingency: {}", trigger_label(variant.trigger)),
                    summary: variant.description.clone(),
                    confidence: route.confidence,
                })
            }))
            .collect();
        alternatives.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let risks = assess_risks(finding, plan, context);
        let confidence = combine_confidence(&[finding.confidence, plan.confidence], &[0.5, 0.5]);
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(
                LogLevel::Info,
                "reasoning.completed",
                json!({
                    "justifications": justifications.len(),
                    "alternatives": alternatives.len(),
                    "risks": risks.len(),
                    "confidence": confidence,
                }),
            );
        }
        Ok(ReasoningBundle {
            justifications,
            alternatives,
            risks,
            confidence,
            generated_at: Utc::now(),
        })
    }
}

fn validate(finding: &ResearchFinding, plan: &RoutePlan) -> Result<(), ReasoningError> {
    let in_range = |value: f32| (0.0..=1.0).contains(&value);
    if !in_range(finding.confidence) || !in_range(plan.confidence) {
        return Err(ReasoningError::InvalidInput(format!(
            "confidence out of range (finding {}, plan {})",
            finding.confidence, plan.confidence
        )));
    }
    let known: HashSet<&str> = finding.candidates().map(|c| c.id.as_str()).collect();
    for route in &plan.routes {
        if let Some(stop) = route
            .stops
            .iter()
            .find(|stop| !known.contains(stop.location_id.as_str()))
        {
            return Err(ReasoningError::InvalidInput(format!(
                "route stop {} is not part of the finding",
                stop.location_id
            )));
        }
    }
    Ok(())
}

fn route_summary(route: &RouteOption) -> String {
    let days = route.schedule.len();
    format!(
        "{} stops over {} day{}, {:.0} km, success {:.0}%, sustainability {:.2}",
        route.stops.len(),
        days,
        if days == 1 { "" } else { "s" },
        route.total_distance_km,
        route.estimated_success_rate * 100.0,
        route.sustainability.overall
    )
}

fn justify_route(route: &RouteOption, degraded: bool) -> Justification {
    let mut statements = vec![
        format!("Built with the {} strategy", route.strategy.label()),
        route_summary(route),
    ];
    if route.sustainability.disturbance_minimization >= 0.8 {
        statements.push("Keeps disturbance to the animals low".into());
    }
    if degraded {
        statements.push("Reduced to a single stop because no fuller route passed validation".into());
    }
    Justification {
        subject: format!("Route: {}", route.strategy.label()),
        statements,
        confidence: route.confidence,
    }
}

fn justify_location(
    candidate: &LocationCandidate,
    degraded: bool,
    context: &ReasoningContext<'_>,
) -> Justification {
    let mut statements: Vec<String> = Vec::new();
    if degraded {
        statements.push("Taken from the built-in site list while live predictions were unavailable".into());
    } else {
        statements.push(format!(
            "Model confidence {:.2}, historical support {:.2}",
            candidate.model_confidence, candidate.historical_confidence
        ));
        statements.push(match candidate.sightings {
            0 => "No recorded sightings nearby; rests on the model alone".to_owned(),
            1 => "1 recorded sighting nearby".to_owned(),
            n => format!("{n} recorded sightings nearby"),
        });
        if let Some(interval) = candidate.interval {
            statements.push(format!(
                "90% of posterior draws fall between {:.2} and {:.2}",
                interval.lower, interval.upper
            ));
        }
    }
    if !candidate.behaviors.is_empty() {
        let labels: Vec<&str> = candidate.behaviors.iter().map(|b| b.label()).collect();
        statements.push(format!("Typically observed: {}", labels.join(", ")));
    }
    if let Some(constraints) = context.constraints {
        let matched: Vec<&str> = candidate
            .behaviors
            .intersection(&constraints.interests)
            .map(|b| b.label())
            .collect();
        if !matched.is_empty() {
            statements.push(format!("Matches your interest in {}", matched.join(", ")));
        }
    }
    if candidate.accessible {
        statements.push("Step-free access".into());
    }
    if candidate.community_partner {
        statements.push("Run with a local community partner".into());
    }
    if candidate.interpretive {
        statements.push("Interpretive programme on site".into());
    }
    Justification {
        subject: candidate.name.clone(),
        statements,
        confidence: candidate.confidence,
    }
}

const fn trigger_label(trigger: ContingencyTrigger) -> &'static str {
    match trigger {
        ContingencyTrigger::AdverseWeather => "adverse weather",
        ContingencyTrigger::LowSightings => "low sightings",
        ContingencyTrigger::AccessibilityNeed => "accessibility need",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use indexmap::IndexMap;
    use orcatrail_core::{
        BehaviorTag, ContingencyPlan, DateRange, GeoPoint, LikelihoodTier,
        Region, RouteStop, RouteStrategy, SustainabilityReport, ViewingMode,
    };
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn candidate(id: &str, confidence: f32, accessible: bool) -> LocationCandidate {
        LocationCandidate {
            id: id.into(),
            name: format!("Site {id}"),
            point: GeoPoint::new(48.5, -123.1),
            access: vec![ViewingMode::Boat],
            behaviors: BTreeSet::from([BehaviorTag::Foraging]),
            model_confidence: confidence,
            historical_confidence: confidence,
            confidence,
            interval: None,
            sightings: 2,
            disturbance_factor: 0.3,
            accessible,
            community_partner: true,
            interpretive: false,
        }
    }

    fn route(strategy: RouteStrategy, ids: &[&str], confidence: f32) -> RouteOption {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        RouteOption {
            id: Uuid::new_v4(),
            strategy,
            stops: ids
                .iter()
                .map(|id| RouteStop {
                    location_id: (*id).into(),
                    name: format!("Site {id}"),
                    point: GeoPoint::new(48.5, -123.1),
                    confidence,
                    day: 1,
                    arrival: date.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
                    viewing_minutes: 60,
                    disturbance: 0.3,
                })
                .collect(),
            schedule: Vec::new(),
            total_distance_km: 40.0,
            estimated_success_rate: confidence,
            sustainability: SustainabilityReport::default(),
            confidence,
        }
    }

    fn inputs(degraded: bool) -> (ResearchFinding, RoutePlan) {
        let finding = ResearchFinding {
            primary: vec![candidate("a", 0.8, false)],
            backup: vec![candidate("b", 0.6, true)],
            confidence: 0.7,
            degraded,
            sources: vec!["test".into()],
            generated_at: Utc::now(),
        };
        let mut contingencies = IndexMap::new();
        contingencies.insert(
            ContingencyTrigger::AccessibilityNeed,
            ContingencyPlan {
                trigger: ContingencyTrigger::AccessibilityNeed,
                description: "Use step-free sites: Site b".into(),
                location_ids: vec!["b".into()],
                route: Some(route(RouteStrategy::ConservativeAccessible, &["b"], 0.6)),
            },
        );
        let plan = RoutePlan {
            routes: vec![
                route(RouteStrategy::HighestConfidence, &["a", "b"], 0.7),
                route(RouteStrategy::Exploratory, &["b"], 0.55),
            ],
            contingencies,
            rejected: Vec::new(),
            confidence: 0.7,
            degraded: false,
            generated_at: Utc::now(),
        };
        (finding, plan)
    }

    #[test]
    fn justifies_candidates_outside_the_best_route() {
        let (mut finding, plan) = inputs(false);
        finding.primary.insert(0, candidate("c", 0.9, false));
        let bundle = ReasoningUnit::new().explain(&finding, &plan).unwrap();
        let subjects: Vec<_> = bundle.justifications.iter().map(|j| j.subject.as_str()).collect();
        assert_eq!(
            subjects,
            vec!["Route: highest confidence", "Site a", "Site b", "Site c"]
        );
        assert!((bundle.justifications[3].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn explains_best_route_and_its_stops() {
        let (finding, plan) = inputs(false);
        let bundle = ReasoningUnit::new().explain(&finding, &plan).unwrap();
        let subjects: Vec<_> = bundle.justifications.iter().map(|j| j.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Route: highest confidence", "Site a", "Site b"]);
        assert!(bundle.justifications[2]
            .statements
            .iter()
            .any(|s| s == "Step-free access"));
        assert_eq!(bundle.alternatives.len(), 2);
        assert!(bundle.alternatives[0].confidence >= bundle.alternatives[1].confidence);
        assert!((bundle.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn risks_are_sorted_and_use_contingencies() {
        let (finding, plan) = inputs(true);
        let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let constraints = Constraints {
            date_range: DateRange::new(start, start).unwrap(),
            region: Region {
                center: GeoPoint::new(48.53, -123.08),
                radius_km: 40.0,
            },
            group_size: 2,
            accessibility_required: true,
            budget: None,
            interests: BTreeSet::from([BehaviorTag::Foraging]),
            viewing_mode: ViewingMode::Boat,
        };
        let context = ReasoningContext {
            constraints: Some(&constraints),
            analytics: None,
        };
        let bundle = ReasoningUnit::new()
            .explain_in_context(&finding, &plan, &context)
            .unwrap();
        assert!(bundle
            .risks
            .windows(2)
            .all(|pair| pair[0].likelihood >= pair[1].likelihood));
        let access = bundle
            .risks
            .iter()
            .find(|r| r.condition.contains("step-free"))
            .unwrap();
        assert_eq!(access.likelihood, LikelihoodTier::High);
        assert_eq!(access.mitigation, "Use step-free sites: Site b");
        assert!(bundle.risks.iter().any(|r| r.condition.contains("built-in list")));
        assert!(bundle.justifications[1]
            .statements
            .iter()
            .any(|s| s.starts_with("Matches your interest")));
    }

    #[test]
    fn rejects_inconsistent_input() {
        let (finding, mut plan) = inputs(false);
        plan.routes[0].stops[0].location_id = "ghost".into();
        assert!(matches!(
            ReasoningUnit::new().explain(&finding, &plan),
            Err(ReasoningError::InvalidInput(_))
        ));
        let (mut finding, plan) = inputs(false);
        finding.confidence = 1.2;
        assert!(ReasoningUnit::new().explain(&finding, &plan).is_err());
    }

    #[test]
    fn empty_plan_still_explains_risks() {
        let (finding, mut plan) = inputs(false);
        plan.routes.clear();
        plan.confidence = 0.0;
        let bundle = ReasoningUnit::new().explain(&finding, &plan).unwrap();
        let subjects: Vec<_> = bundle.justifications.iter().map(|j| j.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Site a", "Site b"]);
        assert_eq!(bundle.risks[0].likelihood, LikelihoodTier::High);
    }
}
