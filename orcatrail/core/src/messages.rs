use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_event_bus::{Channel, ChannelFactory};

use crate::{
    model::{SessionId, SessionStatus},
    results::{ResearchFinding, RoutePlan},
};

/// Research unit finished for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchComplete {
    /// Session.
    pub session_id: SessionId,
    /// Finding.
    pub finding: ResearchFinding,
    /// Whether the finding came from the cache.
    pub from_cache: bool,
}

/// Planning unit finished for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningComplete {
    /// Session.
    pub session_id: SessionId,
    /// Plan.
    pub plan: RoutePlan,
}

/// Progress note published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationUpdate {
    /// Session.
    pub session_id: SessionId,
    /// Status after the update.
    pub status: SessionStatus,
    /// Short description.
    pub detail: String,
    /// Confidence known at this point.
    pub confidence: Option<f32>,
}

/// Field observation arriving after a plan is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Weather turned unsafe for the planned mode.
    AdverseWeather,
    /// Planned stops are quiet.
    LowSightings,
    /// Animals reported at a location.
    Sighting {
        /// Location id or name.
        location: String,
    },
    /// A participant needs step-free access.
    AccessibilityIssue,
}

/// Real-time feedback message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeFeedback {
    /// Target session; `None` addresses every live session.
    pub session_id: Option<SessionId>,
    /// What happened.
    pub kind: FeedbackKind,
    /// Free-form note.
    pub note: String,
    /// Observation time.
    pub observed_at: DateTime<Utc>,
}

impl RealtimeFeedback {
    /// Feedback for every live session.
    #[must_use]
    pub fn broadcast(kind: FeedbackKind, note: impl Into<String>) -> Self {
        Self {
            session_id: None,
            kind,
            note: note.into(),
            observed_at: Utc::now(),
        }
    }

    /// Whether this message concerns `session`.
    #[must_use]
    pub fn addresses(&self, session: SessionId) -> bool {
        self.session_id.map_or(true, |target| target == session)
    }
}

/// The four typed channels used between units.
#[derive(Debug, Clone)]
pub struct CoordinationChannels {
    /// research -> orchestrator.
    pub research_complete: Channel<ResearchComplete>,
    /// planning -> orchestrator.
    pub planning_complete: Channel<PlanningComplete>,
    /// orchestrator -> observers.
    pub orchestration: Channel<OrchestrationUpdate>,
    /// (*) -> feedback.
    pub feedback: Channel<RealtimeFeedback>,
}

impl CoordinationChannels {
    /// Builds the channel set from a factory.
    #[must_use]
    pub fn from_factory(factory: &ChannelFactory) -> Self {
        Self {
            research_complete: factory.channel("research", "orchestrator"),
            planning_complete: factory.channel("planning", "orchestrator"),
            orchestration: factory.channel("orchestrator", "observers"),
            feedback: factory.broadcast("feedback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_addressing() {
        let session = SessionId::new();
        let all = RealtimeFeedback::broadcast(FeedbackKind::AdverseWeather, "gale warning");
        assert!(all.addresses(session));
        let other = RealtimeFeedback {
            session_id: Some(SessionId::new()),
            ..all
        };
        assert!(!other.addresses(session));
    }

    #[test]
    fn channels_are_named_by_endpoints() {
        let channels = CoordinationChannels::from_factory(&ChannelFactory::new(8));
        assert_eq!(
            channels.research_complete.name().to_string(),
            "research->orchestrator"
        );
        assert!(channels.feedback.name().is_broadcast());
    }
}
