#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Planning unit of the orcatrail engine: turns a research finding into
//! ranked, timed routes with sustainability scores and a contingency table.

/// Contingency variants per trigger.
pub mod contingency;
/// Planning errors.
pub mod error;
/// Route assembly and validation.
pub mod route;
/// Day schedules.
pub mod schedule;
/// Candidate selection strategies.
pub mod strategy;
/// Disturbance and sustainability scoring.
pub mod sustainability;
/// Tour construction.
pub mod tour;
/// The planning unit.
pub mod unit;

pub use contingency::contingency_table;
pub use error::PlanningError;
pub use route::RouteBuilder;
pub use strategy::{CandidatePool, STRATEGIES};
pub use unit::PlanningUnit;
