use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use orcatrail_core::{
    clamp_unit, AgentResult, CacheKey, CacheStore, Constraints, LocationCandidate,
    PlanningConfig, RejectedStrategy, ResearchFinding, RouteOption, RoutePlan, RouteStrategy,
    Telemetry,
};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    contingency::contingency_table,
    error::PlanningError,
    route::RouteBuilder,
    strategy::{CandidatePool, STRATEGIES},
};

/// Plan confidence is halved when only the minimal fallback route survived.
const FALLBACK_PENALTY: f32 = 0.5;

/// Builds ranked, timed routes from a research finding.
#[derive(Debug)]
pub struct PlanningUnit {
    config: PlanningConfig,
    cache: Arc<CacheStore>,
    telemetry: Option<Telemetry>,
}

impl PlanningUnit {
    /// Creates a planning unit.
    #[must_use]
    pub fn new(config: PlanningConfig, cache: Arc<CacheStore>) -> Self {
        Self {
            config,
            cache,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Ranked routes plus contingencies. Strategy failures degrade to a single
    /// minimal route; only malformed input or configuration is an error.
    pub fn plan_routes(
        &self,
        constraints: &Constraints,
        finding: &ResearchFinding,
    ) -> Result<RoutePlan, PlanningError> {
        check_finding(finding)?;
        let builder = RouteBuilder::new(&self.config, constraints)?;
        let key = CacheKey::route(constraints, finding);
        if let Some(plan) = self.cache.get(&key).and_then(AgentResult::into_route) {
            self.log(
                LogLevel::Info,
                "planning.cache.hit",
                json!({ "key": key.as_str(), "routes": plan.routes.len() }),
            );
            return Ok(plan);
        }

        // The viewing mode is never relaxed; step-free access is, when nothing qualifies.
        let mode = constraints.viewing_mode;
        let reachable: Vec<&LocationCandidate> =
            finding.candidates().filter(|c| c.reachable_by(mode)).collect();
        let mut eligible: Vec<&LocationCandidate> = reachable
            .iter()
            .copied()
            .filter(|c| !constraints.accessibility_required || c.accessible)
            .collect();
        if eligible.is_empty() && !reachable.is_empty() {
            self.log(
                LogLevel::Warn,
                "planning.constraints.relaxed",
                json!({ "relaxed": "accessibility", "candidates": reachable.len() }),
            );
            eligible = reachable;
        } else if reachable.is_empty() && !finding.is_empty() {
            self.log(
                LogLevel::Warn,
                "planning.mode.unreachable",
                json!({ "viewing_mode": mode, "candidates": finding.len() }),
            );
        }
        let pool = CandidatePool::new(
            eligible,
            &finding.backup,
            &constraints.interests,
            builder.capacity(),
        );

        let mut routes: Vec<RouteOption> = Vec::new();
        let mut rejected = Vec::new();
        let mut seen: Vec<(BTreeSet<String>, RouteStrategy)> = Vec::new();
        for strategy in STRATEGIES {
            let selection = pool.select(strategy);
            let ids: BTreeSet<String> = selection.iter().map(|c| c.id.clone()).collect();
            let outcome = if selection.is_empty() {
                Err(PlanningError::NoCandidates)
            } else if let Some((_, earlier)) = seen.iter().find(|(set, _)| *set == ids) {
                Err(PlanningError::Duplicate(earlier.label().to_owned()))
            } else {
                seen.push((ids, strategy));
                builder.build(strategy, &selection, mode)
            };
            match outcome {
                Ok(route) => routes.push(route),
                Err(err) => self.reject(&mut rejected, strategy, &err),
            }
        }
        routes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let degraded = routes.is_empty();
        if degraded {
            let nearest = pool.eligible().iter().copied().min_by(|a, b| {
                let center = constraints.region.center;
                a.point
                    .distance_km(&center)
                    .total_cmp(&b.point.distance_km(&center))
            });
            let fallback = nearest
                .ok_or(PlanningError::NoCandidates)
                .and_then(|stop| builder.build(RouteStrategy::MinimalFallback, &[stop], mode));
            match fallback {
                Ok(route) => {
                    self.log(
                        LogLevel::Warn,
                        "planning.fallback.engaged",
                        json!({ "location": route.stops.first().map(|s| s.location_id.clone()) }),
                    );
                    routes.push(route);
                }
                Err(err) => self.reject(&mut rejected, RouteStrategy::MinimalFallback, &err),
            }
        }

        let contingencies = contingency_table(&builder, finding, routes.first());
        let confidence = routes.first().map_or(0.0, |best| {
            if degraded {
                clamp_unit(best.estimated_success_rate * FALLBACK_PENALTY)
            } else {
                best.estimated_success_rate
            }
        });
        let plan = RoutePlan {
            routes,
            contingencies,
            rejected,
            confidence,
            degraded,
            generated_at: Utc::now(),
        };
        if !degraded {
            self.cache
                .put(key, plan.clone().into(), self.config.cache_ttl());
        }
        self.log(
            LogLevel::Info,
            "planning.completed",
            json!({
                "routes": plan.routes.len(),
                "rejected": plan.rejected.len(),
                "confidence": plan.confidence,
                "degraded": plan.degraded,
            }),
        );
        Ok(plan)
    }

    fn reject(
        &self,
        rejected: &mut Vec<RejectedStrategy>,
        strategy: RouteStrategy,
        err: &PlanningError,
    ) {
        self.log(
            LogLevel::Debug,
            "planning.strategy.rejected",
            json!({ "strategy": strategy.label(), "reason": err.to_string() }),
        );
        rejected.push(RejectedStrategy {
            strategy,
            reason: err.to_string(),
        });
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

fn check_finding(finding: &ResearchFinding) -> Result<(), PlanningError> {
    for candidate in finding.candidates() {
        if !(0.0..=1.0).contains(&candidate.confidence) {
            return Err(PlanningError::InvalidFinding(format!(
                "{} has confidence {}",
                candidate.id, candidate.confidence
            )));
        }
        if !(candidate.point.lat.is_finite() && candidate.point.lon.is_finite()) {
            return Err(PlanningError::InvalidFinding(format!(
                "{} has no usable position",
                candidate.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};
    use orcatrail_core::{
        BehaviorTag, ContingencyTrigger, DateRange, GeoPoint, Region, ViewingMode,
    };
    use orcatrail_research::{fallback_candidates, SITES};
    use shared_logging::MemoryLogSink;

    fn constraints(mode: ViewingMode, days: u64) -> Constraints {
        let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        Constraints {
            date_range: DateRange::new(start, start + Days::new(days - 1)).unwrap(),
            region: Region {
                center: GeoPoint::new(48.53, -123.08),
                radius_km: 40.0,
            },
            group_size: 2,
            accessibility_required: false,
            budget: None,
            interests: BTreeSet::from([BehaviorTag::Foraging]),
            viewing_mode: mode,
        }
    }

    fn finding(candidates: Vec<LocationCandidate>, degraded: bool) -> ResearchFinding {
        let (primary, backup) = candidates.into_iter().partition(|c| c.confidence > 0.7);
        ResearchFinding {
            primary,
            backup,
            confidence: 0.6,
            degraded,
            sources: vec!["test".into()],
            generated_at: Utc::now(),
        }
    }

    fn catalog_finding() -> ResearchFinding {
        let mut candidates: Vec<_> = SITES
            .iter()
            .map(|site| {
                let mut c = site
                    .hotspot(site.base_confidence)
                    .into_candidate(site.base_confidence, site.base_confidence);
                c.sightings = 4;
                c
            })
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        finding(candidates, false)
    }

    fn unit() -> (PlanningUnit, Arc<MemoryLogSink>) {
        let sink = Arc::new(MemoryLogSink::new(128));
        let unit = PlanningUnit::new(PlanningConfig::default(), Arc::new(CacheStore::new()))
            .with_telemetry(Telemetry::builder("planning").sink(sink.clone()).build().unwrap());
        (unit, sink)
    }

    #[test]
    fn returned_routes_respect_distance_and_success_limits() {
        let (unit, _) = unit();
        for mode in [ViewingMode::Land, ViewingMode::Boat, ViewingMode::Kayak, ViewingMode::Flexible] {
            let constraints = constraints(mode, 2);
            let plan = unit.plan_routes(&constraints, &catalog_finding()).unwrap();
            let limit = PlanningConfig::default().max_daily_distance_km.get(mode) * 2.0;
            assert!(!plan.routes.is_empty(), "{mode}");
            for route in &plan.routes {
                assert!(route.total_distance_km <= limit, "{mode}: {}", route.total_distance_km);
                assert!(route.estimated_success_rate >= 0.3);
            }
            assert!(plan
                .routes
                .windows(2)
                .all(|pair| pair[0].confidence >= pair[1].confidence));
        }
    }

    #[test]
    fn degraded_boat_finding_still_yields_a_route() {
        let (unit, _) = unit();
        let plan = unit
            .plan_routes(&constraints(ViewingMode::Boat, 3), &finding(fallback_candidates(0.6), true))
            .unwrap();
        let best = plan.best().unwrap();
        assert!(best
            .stops
            .iter()
            .all(|s| ["haro-strait-west", "boundary-pass"].contains(&s.location_id.as_str())));
        assert!((plan.confidence - 0.6).abs() < 1e-6);
        assert!(plan
            .rejected
            .iter()
            .any(|r| r.strategy == RouteStrategy::ConservativeAccessible));
    }

    #[test]
    fn falls_back_to_nearest_single_stop() {
        let (unit, sink) = unit();
        let mut config = PlanningConfig::default();
        config.max_daily_distance_km.land = 12.0;
        let unit = PlanningUnit {
            config,
            cache: Arc::new(CacheStore::new()),
            telemetry: unit.telemetry,
        };
        // East Point and Lime Kiln together exceed 12 km; Lime Kiln alone does not.
        let candidates: Vec<_> = fallback_candidates(0.6)
            .into_iter()
            .filter(|c| c.id == "east-point-saturna" || c.id == "lime-kiln-point")
            .collect();
        let plan = unit
            .plan_routes(&constraints(ViewingMode::Land, 1), &finding(candidates, false))
            .unwrap();
        assert!(plan.degraded);
        assert_eq!(plan.routes.len(), 1);
        assert_eq!(plan.routes[0].strategy, RouteStrategy::MinimalFallback);
        assert_eq!(plan.routes[0].stops[0].location_id, "lime-kiln-point");
        assert!((plan.confidence - 0.3).abs() < 1e-6);
        assert_eq!(sink.find("planning.fallback.engaged").len(), 1);
    }

    #[test]
    fn nothing_plannable_gives_empty_low_confidence_plan() {
        let (unit, _) = unit();
        let plan = unit
            .plan_routes(&constraints(ViewingMode::Land, 1), &finding(Vec::new(), false))
            .unwrap();
        assert!(plan.routes.is_empty());
        assert!(plan.degraded);
        assert_eq!(plan.confidence, 0.0);
        assert_eq!(plan.contingencies.len(), 3);
    }

    #[test]
    fn never_plans_sites_the_viewing_mode_cannot_reach() {
        let (unit, sink) = unit();
        let boat_only: Vec<_> = fallback_candidates(0.6)
            .into_iter()
            .filter(|c| !c.reachable_by(ViewingMode::Kayak))
            .collect();
        assert!(!boat_only.is_empty());
        let plan = unit
            .plan_routes(&constraints(ViewingMode::Kayak, 2), &finding(boat_only, true))
            .unwrap();
        assert!(plan.routes.is_empty());
        assert!(plan.degraded);
        assert_eq!(sink.find("planning.mode.unreachable").len(), 1);
        assert!(sink.find("planning.constraints.relaxed").is_empty());
    }

    #[test]
    fn relaxes_only_step_free_access() {
        let (unit, sink) = unit();
        let mut constraints = constraints(ViewingMode::Boat, 2);
        constraints.accessibility_required = true;
        let plan = unit
            .plan_routes(&constraints, &finding(fallback_candidates(0.6), true))
            .unwrap();
        assert!(!plan.routes.is_empty());
        for route in &plan.routes {
            for stop in &route.stops {
                let site = SITES.iter().find(|s| s.id == stop.location_id).unwrap();
                assert!(site.access.iter().any(|a| ViewingMode::Boat.accepts(*a)));
            }
        }
        assert_eq!(sink.find("planning.constraints.relaxed").len(), 1);
    }

    #[test]
    fn contingency_table_covers_every_trigger() {
        let (unit, _) = unit();
        let plan = unit
            .plan_routes(&constraints(ViewingMode::Boat, 2), &catalog_finding())
            .unwrap();
        let triggers: Vec<_> = plan.contingencies.keys().copied().collect();
        assert_eq!(
            triggers,
            vec![
                ContingencyTrigger::AdverseWeather,
                ContingencyTrigger::LowSightings,
                ContingencyTrigger::AccessibilityNeed
            ]
        );
        let weather = &plan.contingencies[&ContingencyTrigger::AdverseWeather];
        assert!(!weather.location_ids.is_empty());
        assert!(weather
            .route
            .as_ref()
            .is_some_and(|r| r.stops.iter().all(|s| {
                SITES
                    .iter()
                    .find(|site| site.id == s.location_id)
                    .is_some_and(|site| site.access.contains(&ViewingMode::Land))
            })));
        let best: BTreeSet<_> = plan.best().unwrap().stops.iter().map(|s| s.location_id.clone()).collect();
        let low = &plan.contingencies[&ContingencyTrigger::LowSightings];
        assert!(low.location_ids.iter().all(|id| !best.contains(id)));
        let access = &plan.contingencies[&ContingencyTrigger::AccessibilityNeed];
        assert!(access.location_ids.contains(&"friday-harbor-whale-museum".to_string()));
    }

    #[test]
    fn plans_are_cached_per_constraints_and_finding() {
        let (unit, sink) = unit();
        let constraints = constraints(ViewingMode::Land, 2);
        let first = unit.plan_routes(&constraints, &catalog_finding()).unwrap();
        let second = unit.plan_routes(&constraints, &catalog_finding()).unwrap();
        assert_eq!(first, second);
        assert_eq!(sink.find("planning.cache.hit").len(), 1);
    }

    #[test]
    fn rejects_malformed_findings() {
        let (unit, _) = unit();
        let mut candidates = fallback_candidates(0.6);
        candidates[0].confidence = 1.7;
        let err = unit
            .plan_routes(&constraints(ViewingMode::Land, 1), &finding(candidates, false))
            .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidFinding(_)));
    }
}
