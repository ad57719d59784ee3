use chrono::{Duration, NaiveDate, NaiveTime};
use orcatrail_core::{DaySchedule, GeoPoint, ScheduleLeg};

use crate::error::PlanningError;

/// Label of the daily departure and return point.
pub const DEPARTURE: &str = "departure point";

/// Timing inputs shared by every day of a route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleParams {
    /// Departure time.
    pub day_start: NaiveTime,
    /// Slack after each travel and viewing leg.
    pub buffer_minutes: u32,
    /// Cruising speed.
    pub speed_kmh: f64,
}

/// Stop as the scheduler sees it.
#[derive(Debug, Clone, Copy)]
pub struct StopVisit<'a> {
    /// Candidate id.
    pub location_id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Position.
    pub point: GeoPoint,
    /// Time on site.
    pub viewing_minutes: u32,
}

/// A timed day plus the arrival time at each stop.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedDay {
    /// Legs of the day.
    pub schedule: DaySchedule,
    /// Arrival per stop, in visiting order.
    pub arrivals: Vec<NaiveTime>,
}

/// Minutes needed to cover `distance_km`, rounded up.
#[must_use]
pub fn travel_minutes(distance_km: f64, speed_kmh: f64) -> i64 {
    if distance_km <= 0.0 || speed_kmh <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let minutes = (distance_km / speed_kmh * 60.0).ceil() as i64;
    minutes.max(1)
}

struct DayClock {
    day: u32,
    now: NaiveTime,
}

impl DayClock {
    fn advance(&mut self, minutes: i64) -> Result<(NaiveTime, NaiveTime), PlanningError> {
        let start = self.now;
        let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(minutes));
        if wrapped != 0 {
            return Err(PlanningError::ScheduleOverflow { day: self.day });
        }
        self.now = end;
        Ok((start, end))
    }
}

/// Lays out one day: travel, buffer, viewing, buffer per stop, then the trip home.
pub fn schedule_day(
    day: u32,
    date: NaiveDate,
    depot: GeoPoint,
    stops: &[StopVisit<'_>],
    params: &ScheduleParams,
) -> Result<TimedDay, PlanningError> {
    let mut clock = DayClock {
        day,
        now: params.day_start,
    };
    let buffer = i64::from(params.buffer_minutes);
    let mut legs = Vec::with_capacity(stops.len() * 4 + 1);
    let mut arrivals = Vec::with_capacity(stops.len());
    let mut from = (DEPARTURE, depot);
    for stop in stops {
        let distance_km = from.1.distance_km(&stop.point);
        let (start, end) = clock.advance(travel_minutes(distance_km, params.speed_kmh))?;
        legs.push(ScheduleLeg::Travel {
            from: from.0.to_owned(),
            to: stop.name.to_owned(),
            distance_km,
            start,
            end,
        });
        arrivals.push(end);
        let (start, end) = clock.advance(buffer)?;
        legs.push(ScheduleLeg::Buffer { start, end });
        let (start, end) = clock.advance(i64::from(stop.viewing_minutes))?;
        legs.push(ScheduleLeg::Viewing {
            location_id: stop.location_id.to_owned(),
            start,
            end,
        });
        let (start, end) = clock.advance(buffer)?;
        legs.push(ScheduleLeg::Buffer { start, end });
        from = (stop.name, stop.point);
    }
    let distance_km = from.1.distance_km(&depot);
    let (start, end) = clock.advance(travel_minutes(distance_km, params.speed_kmh))?;
    legs.push(ScheduleLeg::Travel {
        from: from.0.to_owned(),
        to: DEPARTURE.to_owned(),
        distance_km,
        start,
        end,
    });
    Ok(TimedDay {
        schedule: DaySchedule {
            day,
            date,
            start: params.day_start,
            end,
            legs,
        },
        arrivals,
    })
}
