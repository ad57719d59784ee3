use thiserror::Error;

/// Planning failures. Only `InvalidFinding` and `InvalidConfig` leave the unit; the
/// rest reject a single strategy.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanningError {
    /// A day runs past midnight.
    #[error("day {day} schedule runs past midnight")]
    ScheduleOverflow {
        /// Trip day.
        day: u32,
    },
    /// Total distance over the allowance.
    #[error("route of {distance_km:.1} km exceeds the {limit_km:.1} km allowance")]
    DistanceExceeded {
        /// Route length.
        distance_km: f64,
        /// Allowance for the trip.
        limit_km: f64,
    },
    /// Success rate under the minimum.
    #[error("estimated success rate {rate:.2} is below {min:.2}")]
    LowSuccess {
        /// Estimated rate.
        rate: f32,
        /// Required minimum.
        min: f32,
    },
    /// Strategy selected nothing.
    #[error("no eligible candidates")]
    NoCandidates,
    /// Strategy selected the same stops as an earlier one.
    #[error("same stops as {0}")]
    Duplicate(String),
    /// Finding cannot be planned from.
    #[error("invalid finding: {0}")]
    InvalidFinding(String),
    /// Planning configuration is unusable.
    #[error("invalid planning configuration: {0}")]
    InvalidConfig(String),
}
