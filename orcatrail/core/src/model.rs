use std::{
    collections::{hash_map::DefaultHasher, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{CoordinationError, FailureRecord},
    geo::{BoundingBox, GeoPoint},
};

/// Observable animal behaviour a visitor may be interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorTag {
    /// Hunting and feeding.
    Foraging,
    /// Directional travel along a coastline.
    Traveling,
    /// Social interaction between pod members.
    Socializing,
    /// Slow, synchronized resting lines.
    Resting,
    /// Breaches, spy-hops, tail slaps.
    SurfaceActive,
}

impl BehaviorTag {
    /// Every tag, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Foraging,
        Self::Traveling,
        Self::Socializing,
        Self::Resting,
        Self::SurfaceActive,
    ];

    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Foraging => "foraging",
            Self::Traveling => "traveling",
            Self::Socializing => "socializing",
            Self::Resting => "resting",
            Self::SurfaceActive => "surface activity",
        }
    }
}

impl FromStr for BehaviorTag {
    type Err = CoordinationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "foraging" | "feeding" | "hunting" => Ok(Self::Foraging),
            "traveling" | "travelling" => Ok(Self::Traveling),
            "socializing" | "socialising" | "social" => Ok(Self::Socializing),
            "resting" => Ok(Self::Resting),
            "surface_active" | "breaching" | "surface" => Ok(Self::SurfaceActive),
            other => Err(CoordinationError::InvalidInput(format!(
                "unknown behaviour `{other}`"
            ))),
        }
    }
}

/// How the group wants to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewingMode {
    /// Shore-based viewpoints.
    Land,
    /// Motorised tour boat.
    Boat,
    /// Paddled kayak.
    Kayak,
    /// Any of the above.
    Flexible,
}

impl ViewingMode {
    /// Whether a site reachable by `access` suits this mode.
    #[must_use]
    pub fn accepts(self, access: Self) -> bool {
        self == Self::Flexible || access == Self::Flexible || self == access
    }
}

impl fmt::Display for ViewingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Land => "land",
            Self::Boat => "boat",
            Self::Kayak => "kayak",
            Self::Flexible => "flexible",
        };
        f.write_str(label)
    }
}

impl FromStr for ViewingMode {
    type Err = CoordinationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "land" | "shore" => Ok(Self::Land),
            "boat" => Ok(Self::Boat),
            "kayak" => Ok(Self::Kayak),
            "flexible" | "any" => Ok(Self::Flexible),
            other => Err(CoordinationError::InvalidInput(format!(
                "unknown viewing mode `{other}`"
            ))),
        }
    }
}

/// Visitor experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    /// First trip.
    Beginner,
    /// Some prior trips.
    Intermediate,
    /// Seasoned wildlife watcher.
    Expert,
}

impl FromStr for ExperienceLevel {
    type Err = CoordinationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" | "novice" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "expert" | "advanced" => Ok(Self::Expert),
            other => Err(CoordinationError::InvalidInput(format!(
                "unknown experience level `{other}`"
            ))),
        }
    }
}

/// Weight the visitor puts on low-impact travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SustainabilityPriority {
    /// Convenience first.
    Low,
    /// Balanced.
    Medium,
    /// Impact first.
    High,
}

impl FromStr for SustainabilityPriority {
    type Err = CoordinationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "balanced" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoordinationError::InvalidInput(format!(
                "unknown sustainability priority `{other}`"
            ))),
        }
    }
}

/// Circular search area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Centre, also used as the daily departure point.
    pub center: GeoPoint,
    /// Radius in kilometres.
    pub radius_km: f64,
}

impl Region {
    /// Bounding box of the region.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::around(self.center, self.radius_km)
    }

    /// Whether the point lies inside the circle.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day.
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoordinationError> {
        if end < start {
            return Err(CoordinationError::InvalidInput(format!(
                "date range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of days covered.
    #[must_use]
    pub fn days(&self) -> u32 {
        u32::try_from((self.end - self.start).num_days() + 1).unwrap_or(1)
    }

    /// Whether any day of the range shares the calendar month of `date`.
    #[must_use]
    pub fn covers_month_of(&self, date: NaiveDate) -> bool {
        let mut cursor = self.start;
        while cursor <= self.end {
            if cursor.month() == date.month() {
                return true;
            }
            match cursor.checked_add_days(chrono::Days::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        false
    }
}

/// Hard limits derived from a request. Never mutated after derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Travel dates.
    pub date_range: DateRange,
    /// Search area.
    pub region: Region,
    /// Party size.
    pub group_size: u32,
    /// Whether every stop must be step-free.
    pub accessibility_required: bool,
    /// Optional spend ceiling.
    pub budget: Option<f64>,
    /// Behaviours the group wants to see.
    pub interests: BTreeSet<BehaviorTag>,
    /// Viewing mode.
    pub viewing_mode: ViewingMode,
}

impl Constraints {
    /// Trip length in days.
    #[must_use]
    pub fn trip_duration_days(&self) -> u32 {
        self.date_range.days()
    }

    /// Stable fingerprint used as cache key material.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        format!("{self:?}").hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

/// Soft preferences derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Viewing mode.
    pub viewing_mode: ViewingMode,
    /// Experience level.
    pub experience_level: ExperienceLevel,
    /// Sustainability priority.
    pub sustainability_priority: SustainabilityPriority,
    /// Whether photography matters to the group.
    pub photography_interest: bool,
}

/// Meteorological season (northern hemisphere).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    /// March to May.
    Spring,
    /// June to August.
    Summer,
    /// September to November.
    Autumn,
    /// December to February.
    Winter,
}

impl Season {
    /// Season of a date.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        match date.month() {
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Autumn,
            _ => Self::Winter,
        }
    }
}

/// Environment snapshot captured at session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// When the request arrived.
    pub requested_at: DateTime<Utc>,
    /// Season of the first trip day.
    pub season: Season,
    /// Confidence supplied by an upstream caller, if any.
    pub baseline_confidence: Option<f32>,
}

/// Raw request as received from a presentation layer.
///
/// Every field is optional; the extractor applies defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningRequest {
    /// Free text, interpreted by an external extractor when one is configured.
    pub text: Option<String>,
    /// Party size.
    pub group_size: Option<u32>,
    /// Trip length in days.
    pub duration: Option<u32>,
    /// First trip day.
    pub start_date: Option<NaiveDate>,
    /// `land`, `boat`, `kayak` or `flexible`.
    pub viewing_mode: Option<String>,
    /// Search area.
    pub region: Option<Region>,
    /// Behaviour names.
    pub interests: Vec<String>,
    /// Step-free access needed.
    pub accessibility: Option<bool>,
    /// Spend ceiling.
    pub budget: Option<f64>,
    /// `beginner`, `intermediate` or `expert`.
    pub experience_level: Option<String>,
    /// `low`, `medium` or `high`.
    pub sustainability_priority: Option<String>,
    /// Photography interest.
    pub photography: Option<bool>,
    /// Upstream confidence to blend into the final score.
    pub baseline_confidence: Option<f32>,
}

/// Session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Constraints derived, nothing started.
    Initializing,
    /// Research and analytics in flight.
    Researching,
    /// Route planning in flight.
    Planning,
    /// Reasoning in flight.
    Reasoning,
    /// Final plan available.
    Complete,
    /// Terminated by an internal invariant violation or cancellation.
    Failed,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Researching)
                | (Self::Researching, Self::Planning)
                | (Self::Planning, Self::Reasoning)
                | (Self::Reasoning, Self::Complete)
                | (
                    Self::Initializing | Self::Researching | Self::Planning | Self::Reasoning,
                    Self::Failed
                )
        )
    }

    /// Whether the session can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::Reasoning => "reasoning",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One planning session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Identifier.
    pub id: SessionId,
    /// Request as received.
    pub raw_input: PlanningRequest,
    /// Derived hard limits.
    pub constraints: Constraints,
    /// Derived preferences.
    pub preferences: Preferences,
    /// Context snapshot.
    pub context: SessionContext,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Time the session reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure details when `status` is `Failed`.
    pub failure: Option<FailureRecord>,
}

impl Session {
    /// Creates a session in `Initializing`.
    #[must_use]
    pub fn new(
        raw_input: PlanningRequest,
        constraints: Constraints,
        preferences: Preferences,
        context: SessionContext,
    ) -> Self {
        Self {
            id: SessionId::new(),
            raw_input,
            constraints,
            preferences,
            context,
            status: SessionStatus::Initializing,
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        }
    }

    /// Applies a lifecycle step, rejecting illegal ones.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), CoordinationError> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(days: u64) -> Constraints {
        let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        Constraints {
            date_range: DateRange::new(start, start + chrono::Days::new(days - 1)).unwrap(),
            region: Region {
                center: GeoPoint::new(48.53, -123.08),
                radius_km: 40.0,
            },
            group_size: 2,
            accessibility_required: false,
            budget: None,
            interests: BTreeSet::from([BehaviorTag::Foraging]),
            viewing_mode: ViewingMode::Boat,
        }
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = constraints(3);
        assert_eq!(a.fingerprint(), constraints(3).fingerprint());
        assert_ne!(a.fingerprint(), constraints(4).fingerprint());
        assert_eq!(a.trip_duration_days(), 3);
    }

    #[test]
    fn lifecycle_rejects_skips_and_reopening() {
        let mut session = Session::new(
            PlanningRequest::default(),
            constraints(2),
            Preferences {
                viewing_mode: ViewingMode::Boat,
                experience_level: ExperienceLevel::Beginner,
                sustainability_priority: SustainabilityPriority::Medium,
                photography_interest: false,
            },
            SessionContext {
                requested_at: Utc::now(),
                season: Season::Summer,
                baseline_confidence: None,
            },
        );
        assert!(session.transition(SessionStatus::Planning).is_err());
        for step in [
            SessionStatus::Researching,
            SessionStatus::Planning,
            SessionStatus::Reasoning,
            SessionStatus::Complete,
        ] {
            session.transition(step).unwrap();
        }
        assert!(session.completed_at.is_some());
        assert!(session.transition(SessionStatus::Failed).is_err());
    }

    #[test]
    fn parses_loose_labels() {
        assert_eq!("Shore".parse::<ViewingMode>().unwrap(), ViewingMode::Land);
        assert_eq!(
            "surface-active".parse::<BehaviorTag>().unwrap(),
            BehaviorTag::SurfaceActive
        );
        assert!("submarine".parse::<ViewingMode>().is_err());
        assert!(ViewingMode::Flexible.accepts(ViewingMode::Kayak));
        assert!(!ViewingMode::Land.accepts(ViewingMode::Boat));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        assert!(DateRange::new(start, end).is_err());
        let range = DateRange::new(end, start).unwrap();
        assert!(range.covers_month_of(NaiveDate::from_ymd_opt(2019, 7, 20).unwrap()));
        assert!(!range.covers_month_of(NaiveDate::from_ymd_opt(2019, 8, 20).unwrap()));
    }
}
