//! Turns a raw [`PlanningRequest`] into constraints, preferences and context.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use orcatrail_core::{
    BehaviorTag, Constraints, CoordinationError, DateRange, ExperienceLevel, GeoPoint,
    PlanningRequest, Preferences, Region, Season, SessionContext, SustainabilityPriority,
    ViewingMode,
};

/// Longest trip the engine plans.
pub const MAX_TRIP_DAYS: u32 = 14;

/// Default search area: Haro Strait and the waters around San Juan Island.
pub const DEFAULT_REGION: Region = Region {
    center: GeoPoint {
        lat: 48.53,
        lon: -123.08,
    },
    radius_km: 40.0,
};

/// Everything derived from a request at session creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Hard limits.
    pub constraints: Constraints,
    /// Soft preferences.
    pub preferences: Preferences,
    /// Context snapshot.
    pub context: SessionContext,
}

/// Derives constraints from a request.
///
/// Implementations that understand free text wrap an external language
/// model; the engine only depends on this contract.
#[async_trait]
pub trait ConstraintExtractor: Send + Sync {
    /// Extractor identifier used in logs.
    fn name(&self) -> &str;

    /// Derives constraints, preferences and context, or rejects the request.
    async fn extract(&self, request: &PlanningRequest) -> Result<Extraction, CoordinationError>;
}

/// Reads the structured request fields and fills the gaps with defaults.
#[derive(Debug, Clone, Default)]
pub struct StructuredExtractor {
    today: Option<NaiveDate>,
}

impl StructuredExtractor {
    /// Extractor using the current UTC date as default start.
    #[must_use]
    pub const fn new() -> Self {
        Self { today: None }
    }

    /// Pins the default start date.
    #[must_use]
    pub const fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Synchronous extraction shared by the trait impl.
    pub fn derive(&self, request: &PlanningRequest) -> Result<Extraction, CoordinationError> {
        let group_size = request.group_size.unwrap_or(2);
        if group_size == 0 {
            return Err(invalid("group size must be at least 1"));
        }
        let duration = request.duration.unwrap_or(1);
        if !(1..=MAX_TRIP_DAYS).contains(&duration) {
            return Err(invalid(format!(
                "trip duration {duration} outside 1..={MAX_TRIP_DAYS} days"
            )));
        }
        let start = request
            .start_date
            .or(self.today)
            .unwrap_or_else(|| Utc::now().date_naive());
        let end = start
            .checked_add_days(Days::new(u64::from(duration - 1)))
            .ok_or_else(|| invalid(format!("trip starting {start} overflows the calendar")))?;
        let date_range = DateRange::new(start, end)?;

        let viewing_mode = match request.viewing_mode.as_deref() {
            Some(raw) => raw.parse::<ViewingMode>()?,
            None => ViewingMode::Flexible,
        };
        let region = request.region.unwrap_or(DEFAULT_REGION);
        if !(region.radius_km.is_finite() && region.radius_km > 0.0) {
            return Err(invalid(format!("region radius {} km", region.radius_km)));
        }
        if !((-90.0..=90.0).contains(&region.center.lat)
            && (-180.0..=180.0).contains(&region.center.lon))
        {
            return Err(invalid("region centre is not a valid coordinate"));
        }
        let interests = request
            .interests
            .iter()
            .map(|raw| raw.parse::<BehaviorTag>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        if let Some(budget) = request.budget {
            if !(budget.is_finite() && budget >= 0.0) {
                return Err(invalid(format!("budget {budget}")));
            }
        }
        if let Some(baseline) = request.baseline_confidence {
            if !(0.0..=1.0).contains(&baseline) {
                return Err(invalid(format!("baseline confidence {baseline} outside [0, 1]")));
            }
        }

        let experience_level = match request.experience_level.as_deref() {
            Some(raw) => raw.parse()?,
            None => ExperienceLevel::Beginner,
        };
        let sustainability_priority = match request.sustainability_priority.as_deref() {
            Some(raw) => raw.parse()?,
            None => SustainabilityPriority::Medium,
        };

        Ok(Extraction {
            constraints: Constraints {
                date_range,
                region,
                group_size,
                accessibility_required: request.accessibility.unwrap_or(false),
                budget: request.budget,
                interests,
                viewing_mode,
            },
            preferences: Preferences {
                viewing_mode,
                experience_level,
                sustainability_priority,
                photography_interest: request.photography.unwrap_or(false),
            },
            context: SessionContext {
                requested_at: Utc::now(),
                season: Season::of(start),
                baseline_confidence: request.baseline_confidence,
            },
        })
    }
}

#[async_trait]
impl ConstraintExtractor for StructuredExtractor {
    fn name(&self) -> &str {
        "structured"
    }

    async fn extract(&self, request: &PlanningRequest) -> Result<Extraction, CoordinationError> {
        self.derive(request)
    }
}

fn invalid(reason: impl Into<String>) -> CoordinationError {
    CoordinationError::InvalidInput(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> StructuredExtractor {
        StructuredExtractor::new().with_today(NaiveDate::from_ymd_opt(2026, 7, 10).unwrap())
    }

    #[test]
    fn fills_defaults() {
        let extraction = extractor().derive(&PlanningRequest::default()).unwrap();
        let constraints = &extraction.constraints;
        assert_eq!(constraints.group_size, 2);
        assert_eq!(constraints.trip_duration_days(), 1);
        assert_eq!(constraints.viewing_mode, ViewingMode::Flexible);
        assert_eq!(constraints.region, DEFAULT_REGION);
        assert!(constraints.interests.is_empty());
        assert_eq!(extraction.preferences.experience_level, ExperienceLevel::Beginner);
        assert_eq!(extraction.context.season, Season::Summer);
        assert_eq!(extraction.context.baseline_confidence, None);
    }

    #[test]
    fn maps_structured_fields() {
        let request = PlanningRequest {
            group_size: Some(4),
            duration: Some(3),
            start_date: NaiveDate::from_ymd_opt(2026, 8, 30),
            viewing_mode: Some("Boat".into()),
            interests: vec!["feeding".into(), "breaching".into()],
            accessibility: Some(true),
            experience_level: Some("advanced".into()),
            sustainability_priority: Some("high".into()),
            photography: Some(true),
            baseline_confidence: Some(0.7),
            ..PlanningRequest::default()
        };
        let extraction = extractor().derive(&request).unwrap();
        let constraints = &extraction.constraints;
        assert_eq!(constraints.group_size, 4);
        assert_eq!(
            constraints.date_range.end,
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
        );
        assert_eq!(constraints.viewing_mode, ViewingMode::Boat);
        assert!(constraints.accessibility_required);
        assert_eq!(
            constraints.interests,
            BTreeSet::from([BehaviorTag::Foraging, BehaviorTag::SurfaceActive])
        );
        assert_eq!(extraction.preferences.experience_level, ExperienceLevel::Expert);
        assert!(extraction.preferences.photography_interest);
        assert_eq!(extraction.context.baseline_confidence, Some(0.7));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let cases = [
            PlanningRequest {
                group_size: Some(0),
                ..PlanningRequest::default()
            },
            PlanningRequest {
                duration: Some(30),
                ..PlanningRequest::default()
            },
            PlanningRequest {
                viewing_mode: Some("submarine".into()),
                ..PlanningRequest::default()
            },
            PlanningRequest {
                baseline_confidence: Some(1.5),
                ..PlanningRequest::default()
            },
            PlanningRequest {
                interests: vec!["juggling".into()],
                ..PlanningRequest::default()
            },
        ];
        for request in cases {
            let err = extractor().derive(&request).unwrap_err();
            assert!(matches!(err, CoordinationError::InvalidInput(_)), "{err}");
        }
    }
}
