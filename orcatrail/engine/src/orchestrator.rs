//! Drives one session through research, planning and reasoning.

use std::{fmt, sync::Arc};

use orcatrail_core::{
    AgentResult, AnalyticsSnapshot, CacheKey, CacheStore, Constraints, CoordinationChannels,
    CoordinationError, OrchestrationUpdate, OrchestratorConfig, PlanningComplete,
    ResearchComplete, Session, SessionId, SessionStatus, Telemetry, UnitKind,
};
use orcatrail_planning::PlanningUnit;
use orcatrail_reasoning::{ReasoningContext, ReasoningUnit};
use orcatrail_research::{ResearchError, ResearchUnit};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio_util::sync::CancellationToken;

use crate::{
    analytics::AnalyticsSource,
    hierarchy::{HierarchyCoordinator, LevelAction, PlanningLevel},
    levels::{LevelBrief, PlanLevelHandler},
    plan::{CombinedPlan, PlanInputs},
    session::SessionManager,
};

/// The computation units an orchestrator sequences.
#[derive(Clone)]
pub struct Units {
    /// Research.
    pub research: Arc<ResearchUnit>,
    /// Analytics, run alongside research.
    pub analytics: Arc<dyn AnalyticsSource>,
    /// Route planning.
    pub planning: Arc<PlanningUnit>,
    /// Explanations.
    pub reasoning: Arc<ReasoningUnit>,
}

impl fmt::Debug for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Units")
            .field("research", &self.research)
            .field("analytics", &self.analytics.name())
            .field("planning", &self.planning)
            .field("reasoning", &self.reasoning)
            .finish()
    }
}

/// Session state machine: initializing, researching (research and analytics
/// concurrently), planning, reasoning, complete. Any unit error that escapes
/// the unit's own fallback fails the session; nothing is retried here.
#[derive(Debug)]
pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    units: Units,
    cache: Arc<CacheStore>,
    channels: CoordinationChannels,
    config: OrchestratorConfig,
    telemetry: Option<Telemetry>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        units: Units,
        cache: Arc<CacheStore>,
        channels: CoordinationChannels,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            units,
            cache,
            channels,
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Runs a registered session to completion and stores the outcome.
    pub async fn run_session(&self, id: SessionId) -> Result<Arc<CombinedPlan>, CoordinationError> {
        let cancel = self.sessions.cancel_token(id)?;
        let outcome = self.drive(id, &cancel).await;
        self.cache.invalidate(&CacheKey::analytics(id));
        match outcome {
            Ok((plan, hierarchy)) => {
                self.sessions.complete(id, Arc::clone(&plan), hierarchy)?;
                self.publish(id, SessionStatus::Complete, "plan ready", Some(plan.overall_confidence));
                self.log(
                    LogLevel::Info,
                    "orchestrator.session.completed",
                    json!({
                        "session": id,
                        "routes": plan.routes.len(),
                        "recommendations": plan.recommendations.len(),
                        "confidence": plan.overall_confidence,
                        "degraded": plan.degraded,
                    }),
                );
                Ok(plan)
            }
            Err(err) => {
                let failure = err.to_failure();
                self.sessions.fail(id, failure.clone())?;
                self.publish(id, SessionStatus::Failed, &failure.reason, None);
                self.log(
                    LogLevel::Error,
                    "orchestrator.session.failed",
                    json!({ "session": id, "unit": failure.unit, "reason": failure.reason }),
                );
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        id: SessionId,
        cancel: &CancellationToken,
    ) -> Result<(Arc<CombinedPlan>, Arc<HierarchyCoordinator>), CoordinationError> {
        let session = self.sessions.get(id)?;
        let constraints = &session.constraints;

        ensure_live(cancel)?;
        self.step(id, SessionStatus::Researching, "research and analytics started", None)?;
        let (research, analytics) = tokio::join!(
            self.units.research.research(constraints, cancel),
            self.gather_analytics(id, constraints, cancel),
        );
        let outcome = research.map_err(|err| match err {
            ResearchError::Cancelled => CoordinationError::Cancelled,
            other => unit_failure(UnitKind::Research, &other),
        })?;
        let analytics = analytics?;
        self.channels.research_complete.send(ResearchComplete {
            session_id: id,
            finding: outcome.finding.clone(),
            from_cache: outcome.from_cache,
        });
        let finding = outcome.finding;

        ensure_live(cancel)?;
        self.step(
            id,
            SessionStatus::Planning,
            "route planning started",
            Some(finding.confidence),
        )?;
        let plan = self
            .units
            .planning
            .plan_routes(constraints, &finding)
            .map_err(|err| unit_failure(UnitKind::Planning, &err))?;
        self.channels.planning_complete.send(PlanningComplete {
            session_id: id,
            plan: plan.clone(),
        });

        ensure_live(cancel)?;
        self.step(
            id,
            SessionStatus::Reasoning,
            "reasoning started",
            Some(plan.confidence),
        )?;
        let context = ReasoningContext {
            constraints: Some(constraints),
            analytics: Some(&analytics),
        };
        let reasoning = self
            .units
            .reasoning
            .explain_in_context(&finding, &plan, &context)
            .map_err(|err| unit_failure(UnitKind::Reasoning, &err))?;

        let draft = CombinedPlan::assemble(
            PlanInputs {
                session: &session,
                finding: &finding,
                plan: &plan,
                reasoning: &reasoning,
                analytics: &analytics,
            },
            &self.config,
        );
        let hierarchy = self.distribute(&session, &draft);
        let combined = Arc::new(draft.with_annotations(hierarchy.annotations()));
        Ok((combined, hierarchy))
    }

    /// Session-scoped analytics; failures and timeouts yield an empty snapshot.
    async fn gather_analytics(
        &self,
        id: SessionId,
        constraints: &Constraints,
        cancel: &CancellationToken,
    ) -> Result<AnalyticsSnapshot, CoordinationError> {
        let key = CacheKey::analytics(id);
        if let Some(snapshot) = self.cache.get(&key).and_then(AgentResult::into_analytics) {
            return Ok(snapshot);
        }
        let timeout = self.config.analytics_timeout();
        let gathered = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoordinationError::Cancelled),
            result = tokio::time::timeout(timeout, self.units.analytics.gather(constraints)) => result,
        };
        let snapshot = match gathered {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                self.log(
                    LogLevel::Warn,
                    "analytics.unavailable",
                    json!({ "source": self.units.analytics.name(), "error": err.to_string() }),
                );
                AnalyticsSnapshot::unavailable()
            }
            Err(_) => {
                self.log(
                    LogLevel::Warn,
                    "analytics.unavailable",
                    json!({
                        "source": self.units.analytics.name(),
                        "error": format!("timed out after {timeout:?}"),
                    }),
                );
                AnalyticsSnapshot::unavailable()
            }
        };
        if !snapshot.degraded {
            self.cache
                .put(key, snapshot.clone().into(), self.config.analytics_ttl());
        }
        Ok(snapshot)
    }

    /// Builds the session hierarchy and pushes the plan down from the strategic and route levels.
    fn distribute(&self, session: &Session, plan: &CombinedPlan) -> Arc<HierarchyCoordinator> {
        let brief = Arc::new(LevelBrief::from_plan(&session.constraints, plan));
        let mut hierarchy = HierarchyCoordinator::new();
        if let Some(telemetry) = &self.telemetry {
            hierarchy = hierarchy.with_telemetry(telemetry.scoped("hierarchy"));
        }
        for handler in PlanLevelHandler::full_set(&brief) {
            hierarchy.register(handler);
        }
        let action = LevelAction::new("distribute", json!({ "session": session.id }));
        for level in [PlanningLevel::Strategic, PlanningLevel::Route] {
            if let Err(err) = hierarchy.execute(level, &action) {
                self.log(
                    LogLevel::Warn,
                    "hierarchy.distribution.failed",
                    json!({ "session": session.id, "level": level, "error": err.to_string() }),
                );
            }
        }
        Arc::new(hierarchy)
    }

    fn step(
        &self,
        id: SessionId,
        status: SessionStatus,
        detail: &str,
        confidence: Option<f32>,
    ) -> Result<(), CoordinationError> {
        self.sessions.advance(id, status)?;
        self.publish(id, status, detail, confidence);
        Ok(())
    }

    fn publish(&self, id: SessionId, status: SessionStatus, detail: &str, confidence: Option<f32>) {
        self.channels.orchestration.send(OrchestrationUpdate {
            session_id: id,
            status,
            detail: detail.to_owned(),
            confidence,
        });
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), CoordinationError> {
    if cancel.is_cancelled() {
        Err(CoordinationError::Cancelled)
    } else {
        Ok(())
    }
}

fn unit_failure(unit: UnitKind, err: &impl fmt::Display) -> CoordinationError {
    CoordinationError::UnitFailure {
        unit,
        reason: err.to_string(),
    }
}
