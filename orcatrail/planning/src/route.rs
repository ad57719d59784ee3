use chrono::{Days, NaiveTime};
use orcatrail_core::{
    combine_confidence, mean_confidence, Constraints, GeoPoint, LocationCandidate,
    PlanningConfig, RouteOption, RouteStop, RouteStrategy, ViewingMode,
};
use uuid::Uuid;

use crate::{
    error::PlanningError,
    schedule::{schedule_day, ScheduleParams, StopVisit},
    sustainability::{disturbance_score, effective_mode, score, StopImpact},
    tour::{loop_distance, order_stops},
};

/// Route confidence blend: estimated success, then sustainability.
const ROUTE_WEIGHTS: [f32; 2] = [0.75, 0.25];

/// Turns an unordered stop selection into a validated, timed route.
#[derive(Debug, Clone)]
pub struct RouteBuilder<'a> {
    config: &'a PlanningConfig,
    constraints: &'a Constraints,
    day_start: NaiveTime,
}

impl<'a> RouteBuilder<'a> {
    /// Creates a builder; fails when the configured day start is unusable.
    pub fn new(config: &'a PlanningConfig, constraints: &'a Constraints) -> Result<Self, PlanningError> {
        let day_start = config
            .day_start_time()
            .map_err(|err| PlanningError::InvalidConfig(format!("{err:#}")))?;
        Ok(Self {
            config,
            constraints,
            day_start,
        })
    }

    /// Constraints being planned for.
    #[must_use]
    pub const fn constraints(&self) -> &'a Constraints {
        self.constraints
    }

    /// Stops that fit into the trip.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.stops_per_day.max(1) * self.days() as usize
    }

    /// Distance allowance for the whole trip.
    #[must_use]
    pub fn distance_limit(&self, mode: ViewingMode) -> f64 {
        self.config.max_daily_distance_km.get(mode) * f64::from(self.days())
    }

    fn days(&self) -> u32 {
        self.constraints.trip_duration_days().max(1)
    }

    /// Orders, splits into days, validates and schedules `stops`.
    pub fn build(
        &self,
        strategy: RouteStrategy,
        stops: &[&LocationCandidate],
        mode: ViewingMode,
    ) -> Result<RouteOption, PlanningError> {
        if stops.is_empty() {
            return Err(PlanningError::NoCandidates);
        }
        let depot = self.constraints.region.center;
        let points: Vec<GeoPoint> = stops.iter().map(|c| c.point).collect();
        let ordered: Vec<&LocationCandidate> = order_stops(depot, &points)
            .into_iter()
            .map(|idx| stops[idx])
            .take(self.capacity())
            .collect();

        let days: Vec<Vec<&LocationCandidate>> = ordered
            .chunks(self.config.stops_per_day.max(1))
            .map(|chunk| {
                let points: Vec<GeoPoint> = chunk.iter().map(|c| c.point).collect();
                order_stops(depot, &points)
                    .into_iter()
                    .map(|idx| chunk[idx])
                    .collect()
            })
            .collect();
        let total_distance_km: f64 = days
            .iter()
            .map(|day| {
                let points: Vec<GeoPoint> = day.iter().map(|c| c.point).collect();
                let order: Vec<usize> = (0..points.len()).collect();
                loop_distance(depot, &points, &order)
            })
            .sum();
        let limit_km = self.distance_limit(mode);
        if total_distance_km > limit_km {
            return Err(PlanningError::DistanceExceeded {
                distance_km: total_distance_km,
                limit_km,
            });
        }
        let estimated_success_rate =
            mean_confidence(&ordered.iter().map(|c| c.confidence).collect::<Vec<_>>());
        if estimated_success_rate < self.config.min_success_rate {
            return Err(PlanningError::LowSuccess {
                rate: estimated_success_rate,
                min: self.config.min_success_rate,
            });
        }

        let viewing_minutes = self
            .config
            .optimal_window_minutes
            .min(self.config.max_viewing_minutes);
        let params = ScheduleParams {
            day_start: self.day_start,
            buffer_minutes: self.config.buffer_minutes,
            speed_kmh: self.config.speed_kmh.get(mode),
        };
        let mut schedule = Vec::with_capacity(days.len());
        let mut route_stops = Vec::with_capacity(ordered.len());
        let mut impacts = Vec::with_capacity(ordered.len());
        for (day_number, day) in (1_u32..).zip(&days) {
            let date = self
                .constraints
                .date_range
                .start
                .checked_add_days(Days::new(u64::from(day_number - 1)))
                .ok_or(PlanningError::ScheduleOverflow { day: day_number })?;
            let visits: Vec<StopVisit<'_>> = day
                .iter()
                .map(|c| StopVisit {
                    location_id: &c.id,
                    name: &c.name,
                    point: c.point,
                    viewing_minutes,
                })
                .collect();
            let timed = schedule_day(day_number, date, depot, &visits, &params)?;
            for (candidate, arrival) in day.iter().zip(&timed.arrivals) {
                let disturbance = disturbance_score(
                    candidate.disturbance_factor,
                    viewing_minutes,
                    self.config.optimal_window_minutes,
                    effective_mode(mode, &candidate.access),
                );
                impacts.push(StopImpact {
                    disturbance,
                    community_partner: candidate.community_partner,
                    interpretive: candidate.interpretive,
                });
                route_stops.push(RouteStop {
                    location_id: candidate.id.clone(),
                    name: candidate.name.clone(),
                    point: candidate.point,
                    confidence: candidate.confidence,
                    day: day_number,
                    arrival: date.and_time(*arrival),
                    viewing_minutes,
                    disturbance,
                });
            }
            schedule.push(timed.schedule);
        }

        let sustainability = score(&impacts, total_distance_km, limit_km, &self.config.weights);
        let confidence = combine_confidence(
            &[estimated_success_rate, sustainability.overall],
            &ROUTE_WEIGHTS,
        );
        Ok(RouteOption {
            id: Uuid::new_v4(),
            strategy,
            stops: route_stops,
            schedule,
            total_distance_km,
            estimated_success_rate,
            sustainability,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use orcatrail_core::{BehaviorTag, DateRange, Region};
    use orcatrail_research::fallback_candidates;
    use std::collections::BTreeSet;

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

    #[test]
    fn splits_stops_across_days() {
        let config = PlanningConfig {
            stops_per_day: 2,
            ..PlanningConfig::default()
        };
        let constraints = constraints(ViewingMode::Land, 3);
        let candidates = fallback_candidates(0.6);
        let land: Vec<_> = candidates
            .iter()
            .filter(|c| c.reachable_by(ViewingMode::Land))
            .collect();
        assert_eq!(land.len(), 4);
        let builder = RouteBuilder::new(&config, &constraints).unwrap();
        let route = builder
            .build(RouteStrategy::HighestConfidence, &land, ViewingMode::Land)
            .unwrap();
        assert_eq!(route.stops.len(), 4);
        assert_eq!(route.schedule.len(), 2);
        assert!(route.stops.iter().all(|s| s.day <= 2));
        assert_eq!(route.schedule[1].date, NaiveDate::from_ymd_opt(2026, 7, 2).unwrap());
        assert!(route.total_distance_km <= builder.distance_limit(ViewingMode::Land));
        assert!((route.estimated_success_rate - 0.6).abs() < 1e-6);
        assert!(route.stops.iter().all(|s| s.disturbance <= 0.1));
    }

    #[test]
    fn rejects_routes_over_the_distance_allowance() {
        let constraints = constraints(ViewingMode::Kayak, 1);
        let config = PlanningConfig::default();
        let candidates = fallback_candidates(0.6);
        let far: Vec<_> = candidates.iter().filter(|c| c.id == "boundary-pass").collect();
        let err = RouteBuilder::new(&config, &constraints)
            .unwrap()
            .build(RouteStrategy::Exploratory, &far, ViewingMode::Kayak)
            .unwrap_err();
        assert!(matches!(err, PlanningError::DistanceExceeded { limit_km, .. } if (limit_km - 20.0).abs() < 1e-9));
    }

    #[test]
    fn rejects_low_success_and_bad_day_start() {
        let constraints = constraints(ViewingMode::Land, 1);
        let config = PlanningConfig::default();
        let candidates = fallback_candidates(0.2);
        let stops: Vec<_> = candidates.iter().take(1).collect();
        let err = RouteBuilder::new(&config, &constraints)
            .unwrap()
            .build(RouteStrategy::HighestConfidence, &stops, ViewingMode::Land)
            .unwrap_err();
        assert!(matches!(err, PlanningError::LowSuccess { .. }));
        let broken = PlanningConfig {
            day_start: "25:99".into(),
            ..PlanningConfig::default()
        };
        assert!(matches!(
            RouteBuilder::new(&broken, &constraints),
            Err(PlanningError::InvalidConfig(_))
        ));
    }
}
