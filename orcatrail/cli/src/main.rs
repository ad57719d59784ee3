use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use orcatrail_core::{EngineConfig, FeedbackKind, PlanningRequest, RealtimeFeedback, Telemetry};
use orcatrail_engine::CoordinationEngine;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use shared_logging::{LogLevel, StderrSink};
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "orcatrail", version, about = "Orca viewing trip planner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs one planning session and prints the combined plan.
    Plan(PlanArgs),
    /// Validates an engine configuration and prints the effective values.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Planning request (JSON).
    #[arg(long)]
    input: PathBuf,
    /// Engine configuration (TOML); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Use seeded offline model services instead of the configured ones.
    #[arg(long)]
    simulate: Option<u64>,
    /// Field reports (JSON array) applied to the plan's hierarchy afterwards.
    #[arg(long)]
    feedback: Option<PathBuf>,
    /// Write the result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Echo engine logs to stderr.
    #[arg(long)]
    verbose: bool,
}

/// Feedback file entry; the session is implied.
#[derive(Debug, Deserialize)]
struct FeedbackEntry {
    #[serde(flatten)]
    kind: FeedbackKind,
    #[serde(default)]
    note: String,
    observed_at: Option<DateTime<Utc>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Plan(args) => handle_plan(&args),
        Commands::CheckConfig { config } => {
            let config = EngineConfig::load(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn handle_plan(args: &PlanArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let request: PlanningRequest = read_json(&args.input)?;
    let feedback: Vec<FeedbackEntry> = match &args.feedback {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let mut builder = CoordinationEngine::builder(config.clone());
    if let Some(seed) = args.simulate {
        builder = builder.simulated(seed);
    }
    if let Some(telemetry) = telemetry(&config, args.verbose)? {
        builder = builder.telemetry(telemetry);
    }

    let runtime = Runtime::new()?;
    let (plan, hierarchy) = runtime.block_on(async {
        let engine = builder.build()?;
        let plan = engine
            .run_session(request)
            .await
            .context("planning session failed")?;
        for entry in feedback {
            engine.publish_feedback(RealtimeFeedback {
                session_id: Some(plan.session_id),
                kind: entry.kind,
                note: entry.note,
                observed_at: entry.observed_at.unwrap_or_else(Utc::now),
            });
        }
        let hierarchy = engine
            .hierarchy(plan.session_id)
            .map(|h| h.annotations())
            .unwrap_or_default();
        anyhow::Ok((plan, hierarchy))
    })?;

    let document = json!({ "plan": plan.as_ref(), "hierarchy": hierarchy });
    let rendered = serde_json::to_string_pretty(&document)?;
    match &args.output {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
            println!(
                "session {} complete ({:.0}% confidence): {}",
                plan.session_id.0,
                plan.overall_confidence * 100.0,
                plan.executive_summary
            );
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// File logging comes from the config; `--verbose` adds stderr at debug level.
fn telemetry(config: &EngineConfig, verbose: bool) -> Result<Option<Telemetry>> {
    if !verbose {
        return Ok(None);
    }
    let mut builder = Telemetry::builder("orcatrail")
        .sink(Arc::new(StderrSink))
        .min_level(LogLevel::Debug);
    if let Some(dir) = &config.logging.dir {
        builder = builder.log_path(dir.join("engine.log.jsonl"));
    }
    builder.build().map(Some)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
