//! Four planning levels and the coordinator that propagates results between them.
//!
//! Executing an action on a level records the outcome for that level and
//! pushes a projection of it to each dependent level exactly once. Updates
//! never propagate further, so one triggering event reaches at most one hop.
//! Real-time feedback enters at the realtime level and therefore only reaches
//! the tactical level.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use orcatrail_core::{RealtimeFeedback, Telemetry, UnitKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared_logging::LogLevel;
use thiserror::Error;

/// Time horizon a plan is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningLevel {
    /// Weeks ahead: objectives and resources.
    Strategic,
    /// Days ahead: locations and timing.
    Route,
    /// Hours ahead: adapting to conditions.
    Tactical,
    /// Minutes ahead: reacting to field reports.
    Realtime,
}

impl PlanningLevel {
    /// Every level, longest horizon first.
    pub const ALL: [Self; 4] = [Self::Strategic, Self::Route, Self::Tactical, Self::Realtime];

    /// Planning horizon.
    #[must_use]
    pub const fn horizon(self) -> &'static str {
        match self {
            Self::Strategic => "weeks",
            Self::Route => "days",
            Self::Tactical => "hours",
            Self::Realtime => "minutes",
        }
    }

    /// Units a handler at this level may invoke.
    #[must_use]
    pub const fn capabilities(self) -> &'static [UnitKind] {
        match self {
            Self::Strategic => &[UnitKind::Research, UnitKind::Analytics],
            Self::Route => &[UnitKind::Research, UnitKind::Planning],
            Self::Tactical => &[UnitKind::Planning, UnitKind::Reasoning],
            Self::Realtime => &[UnitKind::Reasoning],
        }
    }

    /// Levels notified after this one executes.
    #[must_use]
    pub const fn dependents(self) -> &'static [Self] {
        match self {
            Self::Strategic => &[Self::Route, Self::Tactical],
            Self::Route => &[Self::Tactical, Self::Realtime],
            Self::Tactical => &[Self::Realtime],
            Self::Realtime => &[Self::Tactical],
        }
    }

    /// Outcome fields a level receives when it is notified.
    #[must_use]
    pub const fn projection_keys(self) -> [&'static str; 3] {
        match self {
            Self::Strategic => ["objectives", "constraints", "resources"],
            Self::Route => ["locations", "timing", "logistics"],
            Self::Tactical => ["conditions", "adaptations", "adjustments"],
            Self::Realtime => ["alerts", "updates", "responses"],
        }
    }
}

impl fmt::Display for PlanningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Strategic => "strategic",
            Self::Route => "route",
            Self::Tactical => "tactical",
            Self::Realtime => "realtime",
        };
        f.write_str(label)
    }
}

/// Work requested from a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAction {
    /// Action name.
    pub name: String,
    /// Action arguments.
    pub payload: Value,
}

impl LevelAction {
    /// Creates an action.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Wraps a field report.
    #[must_use]
    pub fn feedback(feedback: &RealtimeFeedback) -> Self {
        Self::new(
            "feedback",
            serde_json::to_value(feedback).unwrap_or_default(),
        )
    }

    /// Field report carried by a `feedback` action.
    #[must_use]
    pub fn as_feedback(&self) -> Option<RealtimeFeedback> {
        if self.name != "feedback" {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Result of executing an action on one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelOutcome {
    /// Level that produced it.
    pub level: PlanningLevel,
    /// Action that was executed.
    pub action: String,
    /// One-line description.
    pub summary: String,
    /// Named result fields.
    pub data: Map<String, Value>,
    /// Completion time.
    pub at: DateTime<Utc>,
}

impl LevelOutcome {
    /// Fields of this outcome relevant to `target`.
    #[must_use]
    pub fn project(&self, target: PlanningLevel) -> Map<String, Value> {
        target
            .projection_keys()
            .iter()
            .filter_map(|key| {
                self.data
                    .get(*key)
                    .map(|value| ((*key).to_owned(), value.clone()))
            })
            .collect()
    }
}

/// Summary of a level attached to the final plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelAnnotation {
    /// Level.
    pub level: PlanningLevel,
    /// Planning horizon.
    pub horizon: String,
    /// What the level concluded.
    pub summary: String,
    /// Updates received from other levels.
    pub updates_received: usize,
    /// Levels those updates came from, first seen first.
    pub sources: Vec<PlanningLevel>,
}

/// Failures inside the hierarchy. They are reported, never fatal to a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    /// No handler is registered for the level.
    #[error("no handler registered for the {0} level")]
    NoHandler(PlanningLevel),
    /// The action does not make sense for the level.
    #[error("invalid action for the {level} level: {reason}")]
    InvalidAction {
        /// Level.
        level: PlanningLevel,
        /// Cause.
        reason: String,
    },
    /// A handler failed.
    #[error("{level} handler failed: {reason}")]
    Handler {
        /// Level.
        level: PlanningLevel,
        /// Cause.
        reason: String,
    },
}

/// Behaviour of one planning level.
pub trait LevelHandler: Send + Sync {
    /// Level served.
    fn level(&self) -> PlanningLevel;

    /// Executes an action.
    fn handle(&self, action: &LevelAction) -> Result<LevelOutcome, HierarchyError>;

    /// Receives the projection of another level's outcome.
    fn handle_update(
        &self,
        source: PlanningLevel,
        params: &Map<String, Value>,
    ) -> Result<(), HierarchyError>;

    /// Current state, for the final plan.
    fn annotation(&self) -> LevelAnnotation;
}

/// What one `execute` call did.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    /// Outcome of the executed level.
    pub outcome: LevelOutcome,
    /// Dependents that accepted the update, in graph order.
    pub notified: Vec<PlanningLevel>,
    /// Dependents whose handler failed or is missing.
    pub failed: Vec<(PlanningLevel, String)>,
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Routes actions to level handlers and propagates their results. One per session.
pub struct HierarchyCoordinator {
    handlers: RwLock<IndexMap<PlanningLevel, Arc<dyn LevelHandler>>>,
    results: RwLock<IndexMap<PlanningLevel, LevelOutcome>>,
    depth: AtomicUsize,
    dropped: AtomicUsize,
    telemetry: Option<Telemetry>,
}

impl fmt::Debug for HierarchyCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchyCoordinator")
            .field("levels", &self.handlers.read().keys().collect::<Vec<_>>())
            .field("results", &self.results.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for HierarchyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyCoordinator {
    /// Coordinator without handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(IndexMap::new()),
            results: RwLock::new(IndexMap::new()),
            depth: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Registers a handler, returning the one it replaces.
    pub fn register(&self, handler: Arc<dyn LevelHandler>) -> Option<Arc<dyn LevelHandler>> {
        self.handlers.write().insert(handler.level(), handler)
    }

    /// Runs `action` on `level` and notifies its dependents.
    pub fn execute(
        &self,
        level: PlanningLevel,
        action: &LevelAction,
    ) -> Result<Propagation, HierarchyError> {
        let _guard = DepthGuard::enter(&self.depth);
        let handler = self
            .handlers
            .read()
            .get(&level)
            .cloned()
            .ok_or(HierarchyError::NoHandler(level))?;
        let outcome = handler.handle(action)?;
        self.results.write().insert(level, outcome.clone());

        let mut notified = Vec::new();
        let mut failed = Vec::new();
        for target in level.dependents() {
            let Some(dependent) = self.handlers.read().get(target).cloned() else {
                failed.push((*target, HierarchyError::NoHandler(*target).to_string()));
                continue;
            };
            match dependent.handle_update(level, &outcome.project(*target)) {
                Ok(()) => notified.push(*target),
                Err(err) => {
                    self.log(
                        LogLevel::Warn,
                        "hierarchy.update.failed",
                        json!({ "source": level, "target": target, "error": err.to_string() }),
                    );
                    failed.push((*target, err.to_string()));
                }
            }
        }
        self.log(
            LogLevel::Info,
            "hierarchy.propagated",
            json!({
                "level": level,
                "action": action.name,
                "notified": notified,
                "failed": failed.len(),
            }),
        );
        Ok(Propagation {
            outcome,
            notified,
            failed,
        })
    }

    /// Feeds a field report in at the realtime level.
    ///
    /// Returns `Ok(None)` when the report arrives while a propagation is
    /// still running; such re-entrant reports are dropped.
    pub fn apply_feedback(
        &self,
        feedback: &RealtimeFeedback,
    ) -> Result<Option<Propagation>, HierarchyError> {
        if self.depth.load(Ordering::SeqCst) > 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.log(
                LogLevel::Warn,
                "hierarchy.feedback.dropped",
                json!({ "kind": feedback.kind, "note": feedback.note }),
            );
            return Ok(None);
        }
        self.execute(PlanningLevel::Realtime, &LevelAction::feedback(feedback))
            .map(Some)
    }

    /// Latest outcome recorded for `level`.
    #[must_use]
    pub fn result(&self, level: PlanningLevel) -> Option<LevelOutcome> {
        self.results.read().get(&level).cloned()
    }

    /// Annotations of every registered level, longest horizon first.
    #[must_use]
    pub fn annotations(&self) -> Vec<LevelAnnotation> {
        let handlers = self.handlers.read();
        PlanningLevel::ALL
            .iter()
            .filter_map(|level| handlers.get(level))
            .map(|handler| handler.annotation())
            .collect()
    }

    /// Feedback reports dropped by the re-entrancy guard.
    #[must_use]
    pub fn dropped_feedback(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcatrail_core::FeedbackKind;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    type Hook = Box<dyn Fn() + Send + Sync>;

    /// Records every update; optionally runs a hook while handling one.
    struct Recorder {
        level: PlanningLevel,
        updates: Mutex<Vec<(PlanningLevel, Map<String, Value>)>>,
        on_update: Option<Hook>,
    }

    impl Recorder {
        fn new(level: PlanningLevel) -> Arc<Self> {
            Arc::new(Self {
                level,
                updates: Mutex::new(Vec::new()),
                on_update: None,
            })
        }

        fn sources(&self) -> Vec<PlanningLevel> {
            self.updates.lock().iter().map(|(source, _)| *source).collect()
        }
    }

    impl LevelHandler for Recorder {
        fn level(&self) -> PlanningLevel {
            self.level
        }

        fn handle(&self, action: &LevelAction) -> Result<LevelOutcome, HierarchyError> {
            let data = [
                "objectives",
                "constraints",
                "resources",
                "locations",
                "timing",
                "logistics",
                "conditions",
                "adaptations",
                "adjustments",
                "alerts",
                "updates",
                "responses",
            ]
            .into_iter()
            .map(|key| (key.to_owned(), json!(format!("{}:{key}", self.level))))
            .collect();
            Ok(LevelOutcome {
                level: self.level,
                action: action.name.clone(),
                summary: format!("{} handled {}", self.level, action.name),
                data,
                at: Utc::now(),
            })
        }

        fn handle_update(
            &self,
            source: PlanningLevel,
            params: &Map<String, Value>,
        ) -> Result<(), HierarchyError> {
            self.updates.lock().push((source, params.clone()));
            if let Some(hook) = &self.on_update {
                hook();
            }
            Ok(())
        }

        fn annotation(&self) -> LevelAnnotation {
            LevelAnnotation {
                level: self.level,
                horizon: self.level.horizon().into(),
                summary: String::new(),
                updates_received: self.updates.lock().len(),
                sources: self.sources(),
            }
        }
    }

    fn coordinator() -> (HierarchyCoordinator, Vec<Arc<Recorder>>) {
        let coordinator = HierarchyCoordinator::new();
        let recorders: Vec<_> = PlanningLevel::ALL.into_iter().map(Recorder::new).collect();
        for recorder in &recorders {
            coordinator.register(recorder.clone());
        }
        (coordinator, recorders)
    }

    fn notified(recorders: &[Arc<Recorder>]) -> Vec<PlanningLevel> {
        recorders
            .iter()
            .filter(|r| !r.updates.lock().is_empty())
            .map(|r| r.level)
            .collect()
    }

    #[test]
    fn route_notifies_tactical_and_realtime_only() {
        let (coordinator, recorders) = coordinator();
        let propagation = coordinator
            .execute(PlanningLevel::Route, &LevelAction::new("schedule", Value::Null))
            .unwrap();
        assert_eq!(
            propagation.notified,
            vec![PlanningLevel::Tactical, PlanningLevel::Realtime]
        );
        assert_eq!(
            notified(&recorders),
            vec![PlanningLevel::Tactical, PlanningLevel::Realtime]
        );
        assert!(coordinator.result(PlanningLevel::Route).is_some());
        assert!(coordinator.result(PlanningLevel::Tactical).is_none());
    }

    #[test]
    fn realtime_notifies_tactical_only() {
        let (coordinator, recorders) = coordinator();
        let propagation = coordinator
            .execute(PlanningLevel::Realtime, &LevelAction::new("alert", Value::Null))
            .unwrap();
        assert_eq!(propagation.notified, vec![PlanningLevel::Tactical]);
        assert_eq!(notified(&recorders), vec![PlanningLevel::Tactical]);
        assert_eq!(recorders[2].sources(), vec![PlanningLevel::Realtime]);
    }

    #[test]
    fn updates_carry_the_target_projection() {
        let (coordinator, recorders) = coordinator();
        coordinator
            .execute(PlanningLevel::Strategic, &LevelAction::new("set", Value::Null))
            .unwrap();
        let route_updates = recorders[1].updates.lock();
        let keys: BTreeSet<&str> = route_updates[0].1.keys().map(String::as_str).collect();
        assert_eq!(keys, BTreeSet::from(["locations", "logistics", "timing"]));
        assert_eq!(route_updates[0].1["timing"], json!("strategic:timing"));
        let tactical_updates = recorders[2].updates.lock();
        assert!(tactical_updates[0].1.contains_key("adaptations"));
        assert!(!tactical_updates[0].1.contains_key("objectives"));
    }

    #[test]
    fn missing_handlers_are_reported() {
        let coordinator = HierarchyCoordinator::new();
        coordinator.register(Recorder::new(PlanningLevel::Route));
        coordinator.register(Recorder::new(PlanningLevel::Tactical));
        let propagation = coordinator
            .execute(PlanningLevel::Route, &LevelAction::new("schedule", Value::Null))
            .unwrap();
        assert_eq!(propagation.notified, vec![PlanningLevel::Tactical]);
        assert_eq!(propagation.failed.len(), 1);
        assert_eq!(propagation.failed[0].0, PlanningLevel::Realtime);
        assert_eq!(
            coordinator
                .execute(PlanningLevel::Strategic, &LevelAction::new("set", Value::Null))
                .unwrap_err(),
            HierarchyError::NoHandler(PlanningLevel::Strategic)
        );
    }

    #[test]
    fn reentrant_feedback_is_dropped() {
        let coordinator = Arc::new(HierarchyCoordinator::new());
        let feedback = RealtimeFeedback::broadcast(FeedbackKind::LowSightings, "quiet morning");
        let echoes = Arc::new(Mutex::new(Vec::new()));
        let tactical = {
            let weak = Arc::downgrade(&coordinator);
            let echoes = Arc::clone(&echoes);
            let echo = feedback.clone();
            Arc::new(Recorder {
                level: PlanningLevel::Tactical,
                updates: Mutex::new(Vec::new()),
                on_update: Some(Box::new(move || {
                    if let Some(coordinator) = weak.upgrade() {
                        echoes.lock().push(coordinator.apply_feedback(&echo).unwrap());
                    }
                })),
            })
        };
        coordinator.register(Recorder::new(PlanningLevel::Realtime));
        coordinator.register(tactical.clone());

        let propagation = coordinator.apply_feedback(&feedback).unwrap().unwrap();
        assert_eq!(propagation.notified, vec![PlanningLevel::Tactical]);
        assert_eq!(tactical.updates.lock().len(), 1);
        assert_eq!(echoes.lock().as_slice(), &[None]);
        assert_eq!(coordinator.dropped_feedback(), 1);

        // Outside a propagation the next report goes through again.
        assert!(coordinator.apply_feedback(&feedback).unwrap().is_some());
        assert_eq!(tactical.updates.lock().len(), 2);
    }

    #[test]
    fn feedback_actions_round_trip() {
        let feedback = RealtimeFeedback::broadcast(
            FeedbackKind::Sighting {
                location: "lime-kiln-point".into(),
            },
            "J pod heading north",
        );
        let action = LevelAction::feedback(&feedback);
        assert_eq!(action.as_feedback().unwrap().kind, feedback.kind);
        assert!(LevelAction::new("other", Value::Null).as_feedback().is_none());
    }
}
