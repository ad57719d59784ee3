#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Research unit of the orcatrail engine.
//!
//! Calls the prediction and uncertainty services under bounded timeouts,
//! cross-checks hotspots against historical sightings and ranks the result
//! into primary and backup tiers. Any service failure degrades to the
//! built-in fallback sites instead of erroring.

/// Historical sightings corpus.
pub mod corpus;
/// HTTP clients for the model services.
pub mod http;
/// Service contracts and wire types.
pub mod services;
/// Seeded offline services.
pub mod simulated;
/// Known sites and the fallback set.
pub mod sites;
/// The research unit.
pub mod unit;

pub use corpus::{HistoricalCorpus, InMemoryCorpus, Sighting};
pub use http::{HttpPredictionService, HttpUncertaintyService};
pub use services::{
    Hotspot, OfflineService, PosteriorSamples, PredictionQuery, PredictionResponse,
    PredictionService, SamplingConfig, ServiceError, UncertaintyQuery, UncertaintyResponse,
    UncertaintyService,
};
pub use simulated::{synthetic_corpus, SimulatedPrediction, SimulatedUncertainty};
pub use sites::{fallback_candidates, SiteProfile, SITES};
pub use unit::{ResearchError, ResearchOutcome, ResearchUnit};
