use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, ensure, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::model::ViewingMode;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Research unit settings.
    pub research: ResearchConfig,
    /// Planning unit settings.
    pub planning: PlanningConfig,
    /// Orchestrator settings.
    pub orchestrator: OrchestratorConfig,
    /// External service locations.
    pub services: ServicesConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let mut config =
            Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if let Some(corpus) = config.services.corpus_path.as_mut() {
            if corpus.is_relative() {
                if let Some(parent) = path.parent() {
                    *corpus = parent.join(&*corpus);
                }
            }
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let research = &self.research;
        ensure!(
            research.prediction_timeout_ms > 0 && research.uncertainty_timeout_ms > 0,
            "service timeouts must be positive"
        );
        ensure!(
            research.validation_radius_km > 0.0,
            "validation radius must be positive"
        );
        for (name, value) in [
            ("research.primary_threshold", research.primary_threshold),
            ("research.fallback_confidence", research.fallback_confidence),
            ("planning.min_success_rate", self.planning.min_success_rate),
            ("orchestrator.degraded_ceiling", self.orchestrator.degraded_ceiling),
        ] {
            ensure!((0.0..=1.0).contains(&value), "{name} must lie in [0, 1]");
        }
        let planning = &self.planning;
        planning.day_start_time()?;
        ensure!(planning.stops_per_day > 0, "stops_per_day must be positive");
        ensure!(
            planning.max_viewing_minutes > 0 && planning.optimal_window_minutes > 0,
            "viewing windows must be positive"
        );
        for mode in [
            ViewingMode::Land,
            ViewingMode::Boat,
            ViewingMode::Kayak,
            ViewingMode::Flexible,
        ] {
            ensure!(
                planning.max_daily_distance_km.get(mode) > 0.0 && planning.speed_kmh.get(mode) > 0.0,
                "distance and speed for {mode} must be positive"
            );
        }
        planning.weights.validate()?;
        let orchestrator = &self.orchestrator;
        ensure!(
            orchestrator.analytics_timeout_ms > 0,
            "analytics timeout must be positive"
        );
        if orchestrator.baseline_weight < 0.0
            || orchestrator.combined_weight < 0.0
            || orchestrator.baseline_weight + orchestrator.combined_weight <= 0.0
        {
            bail!("orchestrator confidence weights must be non-negative with a positive sum");
        }
        Ok(())
    }
}

/// Research unit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Prediction call timeout.
    pub prediction_timeout_ms: u64,
    /// Uncertainty call timeout.
    pub uncertainty_timeout_ms: u64,
    /// Extra attempts per service call before falling back.
    pub retry_attempts: u32,
    /// Radius for matching historical sightings.
    pub validation_radius_km: f64,
    /// Combined confidence above which a candidate is primary.
    pub primary_threshold: f32,
    /// Confidence assigned to the built-in fallback set.
    pub fallback_confidence: f32,
    /// Posterior samples requested from the uncertainty service.
    pub uncertainty_samples: usize,
    /// Prediction grid resolution.
    pub prediction_resolution_km: f64,
    /// Finding cache lifetime.
    pub cache_ttl_minutes: u64,
}

impl ResearchConfig {
    /// Prediction timeout as a duration.
    #[must_use]
    pub const fn prediction_timeout(&self) -> Duration {
        Duration::from_millis(self.prediction_timeout_ms)
    }

    /// Uncertainty timeout as a duration.
    #[must_use]
    pub const fn uncertainty_timeout(&self) -> Duration {
        Duration::from_millis(self.uncertainty_timeout_ms)
    }

    /// Cache lifetime as a duration.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            prediction_timeout_ms: 3_000,
            uncertainty_timeout_ms: 3_000,
            retry_attempts: 0,
            validation_radius_km: 5.0,
            primary_threshold: 0.7,
            fallback_confidence: 0.6,
            uncertainty_samples: 200,
            prediction_resolution_km: 1.0,
            cache_ttl_minutes: 300,
        }
    }
}

/// Per-mode numeric table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeTable {
    /// Shore-based.
    pub land: f64,
    /// Tour boat.
    pub boat: f64,
    /// Kayak.
    pub kayak: f64,
    /// Flexible.
    pub flexible: f64,
}

impl ModeTable {
    /// Value for a mode.
    #[must_use]
    pub const fn get(&self, mode: ViewingMode) -> f64 {
        match mode {
            ViewingMode::Land => self.land,
            ViewingMode::Boat => self.boat,
            ViewingMode::Kayak => self.kayak,
            ViewingMode::Flexible => self.flexible,
        }
    }
}

/// Weights of the sustainability score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SustainabilityWeights {
    /// Distance efficiency.
    pub environmental: f32,
    /// Disturbance minimisation.
    pub disturbance: f32,
    /// Community partnership.
    pub community: f32,
    /// Education.
    pub education: f32,
}

impl SustainabilityWeights {
    fn validate(&self) -> Result<()> {
        let weights = [
            self.environmental,
            self.disturbance,
            self.community,
            self.education,
        ];
        ensure!(
            weights.iter().all(|w| w.is_finite() && *w >= 0.0),
            "sustainability weights must be non-negative"
        );
        ensure!(
            weights.iter().sum::<f32>() > 0.0,
            "sustainability weights must not all be zero"
        );
        Ok(())
    }
}

impl Default for SustainabilityWeights {
    fn default() -> Self {
        Self {
            environmental: 0.3,
            disturbance: 0.4,
            community: 0.2,
            education: 0.1,
        }
    }
}

/// Planning unit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Daily distance allowance per mode.
    pub max_daily_distance_km: ModeTable,
    /// Cruising speed per mode.
    pub speed_kmh: ModeTable,
    /// Minimum estimated success rate of a returned route.
    pub min_success_rate: f32,
    /// Stops scheduled per day at most.
    pub stops_per_day: usize,
    /// Daily departure, `HH:MM`.
    pub day_start: String,
    /// Slack after every travel and viewing leg.
    pub buffer_minutes: u32,
    /// Upper bound on viewing time per stop.
    pub max_viewing_minutes: u32,
    /// Viewing time animals tolerate without added disturbance.
    pub optimal_window_minutes: u32,
    /// Sustainability weights.
    pub weights: SustainabilityWeights,
    /// Route plan cache lifetime.
    pub cache_ttl_minutes: u64,
}

impl PlanningConfig {
    /// Parsed departure time.
    pub fn day_start_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.day_start, "%H:%M")
            .with_context(|| format!("planning.day_start `{}` is not HH:MM", self.day_start))
    }

    /// Cache lifetime as a duration.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_daily_distance_km: ModeTable {
                land: 120.0,
                boat: 90.0,
                kayak: 20.0,
                flexible: 120.0,
            },
            speed_kmh: ModeTable {
                land: 50.0,
                boat: 25.0,
                kayak: 5.0,
                flexible: 40.0,
            },
            min_success_rate: 0.3,
            stops_per_day: 3,
            day_start: "08:00".into(),
            buffer_minutes: 15,
            max_viewing_minutes: 90,
            optimal_window_minutes: 60,
            weights: SustainabilityWeights::default(),
            cache_ttl_minutes: 240,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Weight of an externally supplied baseline confidence.
    pub baseline_weight: f32,
    /// Weight of the research/planning confidence.
    pub combined_weight: f32,
    /// Cap on overall confidence when research ran on fallback data.
    pub degraded_ceiling: f32,
    /// Lifetime of session-scoped analytics in the cache.
    pub analytics_ttl_minutes: u64,
    /// Upper bound on one analytics gathering call.
    pub analytics_timeout_ms: u64,
    /// Envelopes retained per channel.
    pub channel_capacity: usize,
    /// How long finished sessions stay queryable before eviction.
    pub session_retention_minutes: u64,
}

impl OrchestratorConfig {
    /// Analytics lifetime as a duration.
    #[must_use]
    pub const fn analytics_ttl(&self) -> Duration {
        Duration::from_secs(self.analytics_ttl_minutes * 60)
    }

    /// Analytics timeout as a duration.
    #[must_use]
    pub const fn analytics_timeout(&self) -> Duration {
        Duration::from_millis(self.analytics_timeout_ms)
    }

    /// Retention of finished sessions as a duration.
    #[must_use]
    pub const fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_minutes * 60)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            baseline_weight: 0.4,
            combined_weight: 0.6,
            degraded_ceiling: 0.65,
            analytics_ttl_minutes: 60,
            analytics_timeout_ms: 3000,
            channel_capacity: 256,
            session_retention_minutes: 240,
        }
    }
}

/// Where external services live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Prediction service base URL.
    pub prediction_url: Option<String>,
    /// Uncertainty service base URL.
    pub uncertainty_url: Option<String>,
    /// Historical sightings corpus (JSON array).
    pub corpus_path: Option<PathBuf>,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for JSON-lines logs; `None` disables file logging.
    pub dir: Option<PathBuf>,
    /// Minimum level written.
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: LogLevel::Info,
        }
    }
}
