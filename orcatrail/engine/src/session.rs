//! Session lifecycle bookkeeping.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;

use orcatrail_core::{
    CoordinationError, FailureRecord, PlanningRequest, Session, SessionId, SessionStatus,
    Telemetry,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio_util::sync::CancellationToken;

use crate::{extract::ConstraintExtractor, hierarchy::HierarchyCoordinator, plan::CombinedPlan};

/// What a caller sees when asking for a session's result.
#[derive(Debug, Clone)]
pub enum SessionResult {
    /// Still running; carries the current status.
    Pending(SessionStatus),
    /// Finished with a plan.
    Complete(Arc<CombinedPlan>),
    /// Terminated; carries the failure details.
    Failed(FailureRecord),
}

impl SessionResult {
    /// Plan, when complete.
    #[must_use]
    pub fn plan(&self) -> Option<&Arc<CombinedPlan>> {
        match self {
            Self::Complete(plan) => Some(plan),
            _ => None,
        }
    }
}

struct SessionSlot {
    session: Session,
    cancel: CancellationToken,
    plan: Option<Arc<CombinedPlan>>,
    hierarchy: Option<Arc<HierarchyCoordinator>>,
}

/// Creates sessions and tracks their lifecycle.
pub struct SessionManager {
    extractor: Arc<dyn ConstraintExtractor>,
    slots: RwLock<HashMap<SessionId, SessionSlot>>,
    telemetry: Option<Telemetry>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("extractor", &self.extractor.name())
            .field("sessions", &self.slots.read().len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager deriving constraints with `extractor`.
    #[must_use]
    pub fn new(extractor: Arc<dyn ConstraintExtractor>) -> Self {
        Self {
            extractor,
            slots: RwLock::new(HashMap::new()),
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Derives constraints and registers a session in `Initializing`.
    pub async fn create(&self, request: PlanningRequest) -> Result<SessionId, CoordinationError> {
        let extraction = match self.extractor.extract(&request).await {
            Ok(extraction) => extraction,
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    "session.rejected",
                    json!({ "extractor": self.extractor.name(), "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        let session = Session::new(
            request,
            extraction.constraints,
            extraction.preferences,
            extraction.context,
        );
        let id = session.id;
        self.log(
            LogLevel::Info,
            "session.created",
            json!({
                "session": id,
                "days": session.constraints.trip_duration_days(),
                "viewing_mode": session.constraints.viewing_mode,
                "group_size": session.constraints.group_size,
            }),
        );
        self.slots.write().insert(
            id,
            SessionSlot {
                session,
                cancel: CancellationToken::new(),
                plan: None,
                hierarchy: None,
            },
        );
        Ok(id)
    }

    /// Copy of the session record.
    pub fn get(&self, id: SessionId) -> Result<Session, CoordinationError> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.session.clone())
            .ok_or(CoordinationError::UnknownSession(id))
    }

    /// Current status.
    pub fn status(&self, id: SessionId) -> Result<SessionStatus, CoordinationError> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.session.status)
            .ok_or(CoordinationError::UnknownSession(id))
    }

    /// Cancellation token of the session.
    pub fn cancel_token(&self, id: SessionId) -> Result<CancellationToken, CoordinationError> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.cancel.clone())
            .ok_or(CoordinationError::UnknownSession(id))
    }

    /// Moves a running session to `next`.
    pub fn advance(&self, id: SessionId, next: SessionStatus) -> Result<(), CoordinationError> {
        let from = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(&id)
                .ok_or(CoordinationError::UnknownSession(id))?;
            let from = slot.session.status;
            slot.session.transition(next)?;
            from
        };
        self.log(
            LogLevel::Info,
            "session.status.changed",
            json!({ "session": id, "from": from, "to": next }),
        );
        Ok(())
    }

    /// Stores the final plan and marks the session complete.
    pub fn complete(
        &self,
        id: SessionId,
        plan: Arc<CombinedPlan>,
        hierarchy: Arc<HierarchyCoordinator>,
    ) -> Result<(), CoordinationError> {
        {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(&id)
                .ok_or(CoordinationError::UnknownSession(id))?;
            slot.session.transition(SessionStatus::Complete)?;
            slot.plan = Some(plan);
            slot.hierarchy = Some(hierarchy);
        }
        self.log(
            LogLevel::Info,
            "session.status.changed",
            json!({ "session": id, "from": SessionStatus::Reasoning, "to": SessionStatus::Complete }),
        );
        Ok(())
    }

    /// Marks a session failed. Terminal sessions are left untouched and `false` is returned.
    pub fn fail(&self, id: SessionId, failure: FailureRecord) -> Result<bool, CoordinationError> {
        let from = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(&id)
                .ok_or(CoordinationError::UnknownSession(id))?;
            if slot.session.status.is_terminal() {
                return Ok(false);
            }
            let from = slot.session.status;
            slot.session.transition(SessionStatus::Failed)?;
            slot.session.failure = Some(failure.clone());
            from
        };
        self.log(
            LogLevel::Error,
            "session.failed",
            json!({ "session": id, "from": from, "unit": failure.unit, "reason": failure.reason }),
        );
        Ok(true)
    }

    /// Result as seen by callers.
    pub fn result(&self, id: SessionId) -> Result<SessionResult, CoordinationError> {
        let slots = self.slots.read();
        let slot = slots.get(&id).ok_or(CoordinationError::UnknownSession(id))?;
        Ok(match (&slot.plan, &slot.session.failure) {
            (Some(plan), _) => SessionResult::Complete(Arc::clone(plan)),
            (None, Some(failure)) => SessionResult::Failed(failure.clone()),
            (None, None) => SessionResult::Pending(slot.session.status),
        })
    }

    /// Signals cancellation. Returns whether the session was still running.
    pub fn cancel(&self, id: SessionId) -> Result<bool, CoordinationError> {
        let (token, running) = {
            let slots = self.slots.read();
            let slot = slots.get(&id).ok_or(CoordinationError::UnknownSession(id))?;
            (slot.cancel.clone(), !slot.session.status.is_terminal())
        };
        if running {
            token.cancel();
            self.log(LogLevel::Info, "session.cancel.requested", json!({ "session": id }));
        }
        Ok(running)
    }

    /// Hierarchy of a completed session.
    #[must_use]
    pub fn hierarchy(&self, id: SessionId) -> Option<Arc<HierarchyCoordinator>> {
        self.slots
            .read()
            .get(&id)
            .and_then(|slot| slot.hierarchy.clone())
    }

    /// Hierarchies of every completed session.
    #[must_use]
    pub fn hierarchies(&self) -> Vec<(SessionId, Arc<HierarchyCoordinator>)> {
        self.slots
            .read()
            .iter()
            .filter_map(|(id, slot)| slot.hierarchy.clone().map(|h| (*id, h)))
            .collect()
    }

    /// Drops terminal sessions that finished at least `retention` ago.
    /// Returns the evicted ids.
    pub fn evict_expired(&self, retention: Duration) -> Vec<SessionId> {
        let now = Utc::now();
        let evicted: Vec<SessionId> = {
            let mut slots = self.slots.write();
            let expired: Vec<SessionId> = slots
                .iter()
                .filter(|(_, slot)| {
                    slot.session.completed_at.is_some_and(|at| {
                        (now - at).to_std().map_or(retention.is_zero(), |age| age >= retention)
                    })
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                slots.remove(id);
            }
            expired
        };
        if !evicted.is_empty() {
            self.log(
                LogLevel::Info,
                "session.evicted",
                json!({ "count": evicted.len(), "retention_secs": retention.as_secs() }),
            );
        }
        evicted
    }

    /// Tracked session ids.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        self.slots.read().keys().copied().collect()
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no session is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}
