#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]

//! Reasoning unit of the orcatrail engine. Pure functions over research and
//! planning output: justifications, alternatives and a risk table.

/// Risk assessment.
pub mod risk;
/// Justifications, alternatives and the unit itself.
pub mod unit;

pub use risk::assess_risks;
pub use unit::{ReasoningContext, ReasoningError, ReasoningUnit};
