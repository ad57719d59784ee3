#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Coordination layer of orcatrail.
//!
//! The [`CoordinationEngine`] owns the session manager and the orchestrator.
//! Each session runs research and analytics concurrently, then planning and
//! reasoning, merges everything into a [`CombinedPlan`] and hands that plan
//! to a four-level planning hierarchy which keeps absorbing field feedback
//! after the session completes.

/// Historical analytics gathered alongside research.
pub mod analytics;
/// Engine facade and builder.
pub mod engine;
/// Request to constraint derivation.
pub mod extract;
/// Planning levels and the coordinator propagating between them.
pub mod hierarchy;
/// Level handlers backed by a completed plan.
pub mod levels;
/// Session state machine.
pub mod orchestrator;
/// Combined plan assembly, deduplication and confidence blending.
pub mod plan;
/// Session lifecycle bookkeeping.
pub mod session;

pub use analytics::{AnalyticsError, AnalyticsSource, CorpusAnalytics};
pub use engine::{CoordinationEngine, EngineBuilder};
pub use extract::{ConstraintExtractor, Extraction, StructuredExtractor, MAX_TRIP_DAYS};
pub use hierarchy::{
    HierarchyCoordinator, HierarchyError, LevelAction, LevelAnnotation, LevelHandler,
    LevelOutcome, PlanningLevel, Propagation,
};
pub use levels::{LevelBrief, PlanLevelHandler};
pub use orchestrator::{Orchestrator, Units};
pub use plan::{
    dedup_recommendations, normalize_name, overall_confidence, CombinedPlan, PlanInputs,
    Recommendation,
};
pub use session::{SessionManager, SessionResult};
