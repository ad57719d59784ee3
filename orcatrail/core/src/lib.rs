#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Shared vocabulary of the orcatrail coordination engine: the session data
//! model, agent results, the expiring cache, typed coordination messages,
//! configuration and telemetry.

/// Expiring in-memory cache and clocks.
pub mod cache;
/// Confidence arithmetic.
pub mod confidence;
/// TOML configuration.
pub mod config;
/// Error taxonomy and failure records.
pub mod error;
/// Great-circle helpers.
pub mod geo;
/// Typed coordination messages and the channel set carrying them.
pub mod messages;
/// Session, constraint and preference types.
pub mod model;
/// Results produced by the coordination units.
pub mod results;
/// Structured logging handle used by every unit.
pub mod telemetry;

pub use cache::{CacheKey, CacheStats, CacheStore, Clock, ManualClock, SystemClock};
pub use confidence::{clamp_unit, combine_confidence, mean_confidence};
pub use config::{
    EngineConfig, LoggingConfig, ModeTable, OrchestratorConfig, PlanningConfig, ResearchConfig,
    ServicesConfig, SustainabilityWeights,
};
pub use error::{CoordinationError, FailureRecord, UnitKind};
pub use geo::{BoundingBox, GeoPoint};
pub use messages::{
    CoordinationChannels, FeedbackKind, OrchestrationUpdate, PlanningComplete, RealtimeFeedback,
    ResearchComplete,
};
pub use model::{
    BehaviorTag, Constraints, DateRange, ExperienceLevel, PlanningRequest, Preferences, Region,
    Season, Session, SessionContext, SessionId, SessionStatus, SustainabilityPriority,
    ViewingMode,
};
pub use results::{
    AgentResult, Alternative, AnalyticsSnapshot, ConfidenceInterval, ContingencyPlan,
    ContingencyTrigger, DaySchedule, Justification, LikelihoodTier, LocationCandidate,
    ReasoningBundle, RejectedStrategy, ResearchFinding, RiskEntry, RouteOption, RoutePlan,
    RouteStop, RouteStrategy, ScheduleLeg, SustainabilityReport,
};
pub use telemetry::{Telemetry, TelemetryBuilder};
