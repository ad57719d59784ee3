use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use orcatrail_core::{
    CacheStats, CacheStore, CoordinationChannels, CoordinationError, EngineConfig, FailureRecord,
    PlanningRequest, RealtimeFeedback, ServicesConfig, Session, SessionId, Telemetry, UnitKind,
};
use orcatrail_planning::PlanningUnit;
use orcatrail_reasoning::ReasoningUnit;
use orcatrail_research::{
    synthetic_corpus, HistoricalCorpus, HttpPredictionService, HttpUncertaintyService,
    InMemoryCorpus, OfflineService, PredictionService, ResearchUnit, SimulatedPrediction,
    SimulatedUncertainty, UncertaintyService,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_event_bus::{ChannelFactory, DeliveryReport};
use shared_logging::{LogLevel, LogSink};
use tokio::task::JoinHandle;

use crate::{
    analytics::{AnalyticsSource, CorpusAnalytics},
    extract::{ConstraintExtractor, StructuredExtractor},
    hierarchy::HierarchyCoordinator,
    orchestrator::{Orchestrator, Units},
    plan::CombinedPlan,
    session::{SessionManager, SessionResult},
};

/// Sightings generated per catalog site in simulated mode.
const SIMULATED_SIGHTINGS_PER_SITE: usize = 6;

/// Assembles a [`CoordinationEngine`] from configuration and injected parts.
///
/// Anything not injected is derived from the configuration: HTTP model
/// services when URLs are configured (offline stand-ins otherwise), the
/// sightings corpus from `services.corpus_path`, and file logging from
/// `logging.dir`.
pub struct EngineBuilder {
    config: EngineConfig,
    prediction: Option<Arc<dyn PredictionService>>,
    uncertainty: Option<Arc<dyn UncertaintyService>>,
    corpus: Option<Arc<dyn HistoricalCorpus>>,
    analytics: Option<Arc<dyn AnalyticsSource>>,
    extractor: Option<Arc<dyn ConstraintExtractor>>,
    cache: Option<Arc<CacheStore>>,
    telemetry: Option<Telemetry>,
}

impl EngineBuilder {
    /// Starts from `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            prediction: None,
            uncertainty: None,
            corpus: None,
            analytics: None,
            extractor: None,
            cache: None,
            telemetry: None,
        }
    }

    /// Prediction service.
    #[must_use]
    pub fn prediction(mut self, service: Arc<dyn PredictionService>) -> Self {
        self.prediction = Some(service);
        self
    }

    /// Uncertainty service.
    #[must_use]
    pub fn uncertainty(mut self, service: Arc<dyn UncertaintyService>) -> Self {
        self.uncertainty = Some(service);
        self
    }

    /// Historical sightings.
    #[must_use]
    pub fn corpus(mut self, corpus: Arc<dyn HistoricalCorpus>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Analytics source run alongside research.
    #[must_use]
    pub fn analytics(mut self, source: Arc<dyn AnalyticsSource>) -> Self {
        self.analytics = Some(source);
        self
    }

    /// Constraint extractor used at session creation.
    #[must_use]
    pub fn extractor(mut self, extractor: Arc<dyn ConstraintExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Shared cache; pass the same store to several engines to share results.
    #[must_use]
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Telemetry; overrides `logging.dir`.
    #[must_use]
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Seeded offline services and a synthetic corpus.
    #[must_use]
    pub fn simulated(mut self, seed: u64) -> Self {
        self.prediction = Some(Arc::new(SimulatedPrediction::new(seed)));
        self.uncertainty = Some(Arc::new(SimulatedUncertainty::new(seed)));
        self.corpus = Some(Arc::new(synthetic_corpus(
            seed,
            SIMULATED_SIGHTINGS_PER_SITE,
        )));
        self
    }

    /// Validates the configuration and wires every unit.
    pub fn build(self) -> Result<CoordinationEngine> {
        let config = self.config;
        config.validate()?;

        let telemetry = match self.telemetry {
            Some(telemetry) => Some(telemetry),
            None => match &config.logging.dir {
                Some(dir) => Some(
                    Telemetry::builder("engine")
                        .log_path(dir.join("engine.log.jsonl"))
                        .min_level(config.logging.level)
                        .build()
                        .with_context(|| format!("opening log directory {}", dir.display()))?,
                ),
                None => None,
            },
        };

        let prediction = prediction_service(self.prediction, &config.services)?;
        let uncertainty = uncertainty_service(self.uncertainty, &config.services)?;
        let corpus: Arc<dyn HistoricalCorpus> = match (self.corpus, &config.services.corpus_path) {
            (Some(corpus), _) => corpus,
            (None, Some(path)) => Arc::new(InMemoryCorpus::load(path)?),
            (None, None) => Arc::new(InMemoryCorpus::default()),
        };
        let analytics = self
            .analytics
            .unwrap_or_else(|| Arc::new(CorpusAnalytics::new(Arc::clone(&corpus))));
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(StructuredExtractor::new()));
        let cache = self.cache.unwrap_or_default();

        let scoped = |module: &str| telemetry.as_ref().map(|t| t.scoped(module));

        let mut research = ResearchUnit::new(
            prediction,
            uncertainty,
            corpus,
            Arc::clone(&cache),
            config.research.clone(),
        );
        let mut planning = PlanningUnit::new(config.planning.clone(), Arc::clone(&cache));
        let mut reasoning = ReasoningUnit::new();
        let mut sessions = SessionManager::new(extractor);
        if let Some(t) = scoped("research") {
            research = research.with_telemetry(t);
        }
        if let Some(t) = scoped("planning") {
            planning = planning.with_telemetry(t);
        }
        if let Some(t) = scoped("reasoning") {
            reasoning = reasoning.with_telemetry(t);
        }
        if let Some(t) = scoped("sessions") {
            sessions = sessions.with_telemetry(t);
        }
        let sessions = Arc::new(sessions);

        let mut factory = ChannelFactory::new(config.orchestrator.channel_capacity);
        if let Some(t) = scoped("event-bus") {
            let sink: Arc<dyn LogSink> = Arc::new(t);
            factory = factory.with_sink(sink);
        }
        let channels = CoordinationChannels::from_factory(&factory);
        let units = Units {
            research: Arc::new(research),
            analytics,
            planning: Arc::new(planning),
            reasoning: Arc::new(reasoning),
        };
        let mut orchestrator = Orchestrator::new(
            Arc::clone(&sessions),
            units,
            Arc::clone(&cache),
            channels.clone(),
            config.orchestrator.clone(),
        );
        if let Some(t) = scoped("orchestrator") {
            orchestrator = orchestrator.with_telemetry(t);
        }

        let feedback_sessions = Arc::clone(&sessions);
        channels.feedback.subscribe(move |envelope| {
            let feedback = &envelope.payload;
            let targets: Vec<_> = match feedback.session_id {
                Some(id) => feedback_sessions.hierarchy(id).into_iter().collect(),
                None => feedback_sessions
                    .hierarchies()
                    .into_iter()
                    .map(|(_, hierarchy)| hierarchy)
                    .collect(),
            };
            for hierarchy in targets {
                hierarchy.apply_feedback(feedback)?;
            }
            Ok(())
        });

        let engine = CoordinationEngine {
            inner: Arc::new(EngineInner {
                sessions,
                orchestrator: Arc::new(orchestrator),
                channels,
                cache,
                tasks: Mutex::new(HashMap::new()),
                retention: config.orchestrator.session_retention(),
                telemetry,
            }),
        };
        engine.log(
            LogLevel::Info,
            "engine.ready",
            json!({
                "services": config.services,
                "analytics_timeout_ms": config.orchestrator.analytics_timeout_ms,
            }),
        );
        Ok(engine)
    }
}

fn prediction_service(
    injected: Option<Arc<dyn PredictionService>>,
    services: &ServicesConfig,
) -> Result<Arc<dyn PredictionService>> {
    Ok(match (injected, &services.prediction_url) {
        (Some(service), _) => service,
        (None, Some(url)) => Arc::new(
            HttpPredictionService::new(url)
                .with_context(|| format!("prediction service url {url}"))?,
        ),
        (None, None) => Arc::new(OfflineService),
    })
}

fn uncertainty_service(
    injected: Option<Arc<dyn UncertaintyService>>,
    services: &ServicesConfig,
) -> Result<Arc<dyn UncertaintyService>> {
    Ok(match (injected, &services.uncertainty_url) {
        (Some(service), _) => service,
        (None, Some(url)) => Arc::new(
            HttpUncertaintyService::new(url)
                .with_context(|| format!("uncertainty service url {url}"))?,
        ),
        (None, None) => Arc::new(OfflineService),
    })
}

struct EngineInner {
    sessions: Arc<SessionManager>,
    orchestrator: Arc<Orchestrator>,
    channels: CoordinationChannels,
    cache: Arc<CacheStore>,
    tasks: Mutex<HashMap<SessionId, JoinHandle<()>>>,
    retention: Duration,
    telemetry: Option<Telemetry>,
}

/// Entry point owned by the caller: create sessions, poll or await their
/// results, cancel them and feed field reports back in. Clones share state.
#[derive(Clone)]
pub struct CoordinationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for CoordinationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationEngine")
            .field("sessions", &self.inner.sessions.len())
            .field("running", &self.inner.tasks.lock().len())
            .field("retention", &self.inner.retention)
            .finish_non_exhaustive()
    }
}

impl CoordinationEngine {
    /// Builder starting from `config`.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Registers a session and starts it in the background.
    pub async fn create_session(
        &self,
        request: PlanningRequest,
    ) -> Result<SessionId, CoordinationError> {
        self.housekeep().await;
        let id = self.inner.sessions.create(request).await?;
        let orchestrator = Arc::clone(&self.inner.orchestrator);
        let handle = tokio::spawn(async move {
            // The outcome is stored on the session.
            let _ = orchestrator.run_session(id).await;
        });
        self.inner.tasks.lock().insert(id, handle);
        Ok(id)
    }

    /// Plan, pending status or failure of a session.
    ///
    /// Reading a terminal result releases the session's task handle.
    pub fn get_session_result(&self, id: SessionId) -> Result<SessionResult, CoordinationError> {
        let result = self.inner.sessions.result(id)?;
        if !matches!(result, SessionResult::Pending(_)) {
            self.inner.tasks.lock().remove(&id);
        }
        Ok(result)
    }

    /// Waits for a background session to finish and returns its result.
    pub async fn wait(&self, id: SessionId) -> Result<SessionResult, CoordinationError> {
        let handle = self.inner.tasks.lock().remove(&id);
        if let Some(handle) = handle {
            self.settle(id, handle).await?;
        }
        self.inner.sessions.result(id)
    }

    /// Reaps finished background tasks and evicts sessions past the retention window.
    /// Runs before every new session; returns the number of evicted sessions.
    pub async fn housekeep(&self) -> usize {
        let finished: Vec<(SessionId, JoinHandle<()>)> = {
            let mut tasks = self.inner.tasks.lock();
            let ids: Vec<SessionId> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| tasks.remove(&id).map(|handle| (id, handle)))
                .collect()
        };
        for (id, handle) in finished {
            // Evicted or unknown sessions have nothing left to record.
            let _ = self.settle(id, handle).await;
        }
        self.inner.sessions.evict_expired(self.inner.retention).len()
    }

    /// Number of background tasks still tracked.
    #[must_use]
    pub fn tracked_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    async fn settle(&self, id: SessionId, handle: JoinHandle<()>) -> Result<(), CoordinationError> {
        if let Err(err) = handle.await {
            self.log(
                LogLevel::Error,
                "engine.session.task.failed",
                json!({ "session": id, "error": err.to_string() }),
            );
            self.inner.sessions.fail(
                id,
                FailureRecord::new(UnitKind::Orchestrator, format!("session task ended: {err}")),
            )?;
        }
        Ok(())
    }

    /// Creates a session and drives it on the caller's task.
    pub async fn run_session(
        &self,
        request: PlanningRequest,
    ) -> Result<Arc<CombinedPlan>, CoordinationError> {
        self.housekeep().await;
        let id = self.inner.sessions.create(request).await?;
        self.inner.orchestrator.run_session(id).await
    }

    /// Requests cancellation. Returns whether the session was still running.
    pub fn cancel_session(&self, id: SessionId) -> Result<bool, CoordinationError> {
        self.inner.sessions.cancel(id)
    }

    /// Publishes a field report to the hierarchies it addresses.
    pub fn publish_feedback(&self, feedback: RealtimeFeedback) -> DeliveryReport {
        self.inner.channels.feedback.send(feedback)
    }

    /// Session record.
    pub fn session(&self, id: SessionId) -> Result<Session, CoordinationError> {
        self.inner.sessions.get(id)
    }

    /// Planning hierarchy of a completed session.
    #[must_use]
    pub fn hierarchy(&self, id: SessionId) -> Option<Arc<HierarchyCoordinator>> {
        self.inner.sessions.hierarchy(id)
    }

    /// The coordination channels, for observers.
    #[must_use]
    pub fn channels(&self) -> &CoordinationChannels {
        &self.inner.channels
    }

    /// Shared cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.inner.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcatrail_core::SessionStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn offline_engine_builds_and_logs_to_directory() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.logging.dir = Some(dir.path().to_path_buf());
        let engine = CoordinationEngine::builder(config).build().unwrap();

        let plan = engine.run_session(PlanningRequest::default()).await.unwrap();
        assert!(plan.degraded);
        assert!(!plan.routes.is_empty());
        let session = engine.session(plan.session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Complete);

        let log = std::fs::read_to_string(dir.path().join("engine.log.jsonl")).unwrap();
        assert!(log.contains("engine.ready"));
        assert!(log.contains("orchestrator.session.completed"));
    }

    #[test]
    fn missing_corpus_file_fails_the_build() {
        let mut config = EngineConfig::default();
        config.services.corpus_path = Some("/nonexistent/sightings.json".into());
        assert!(CoordinationEngine::builder(config).build().is_err());
    }
}
