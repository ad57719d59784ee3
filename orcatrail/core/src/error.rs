use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{SessionId, SessionStatus};

/// Component that produced a result or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Session manager.
    Session,
    /// Research unit.
    Research,
    /// Analytics gathering step.
    Analytics,
    /// Planning unit.
    Planning,
    /// Reasoning unit.
    Reasoning,
    /// Hierarchical planning coordinator.
    Hierarchy,
    /// Orchestrator itself.
    Orchestrator,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Session => "session",
            Self::Research => "research",
            Self::Analytics => "analytics",
            Self::Planning => "planning",
            Self::Reasoning => "reasoning",
            Self::Hierarchy => "hierarchy",
            Self::Orchestrator => "orchestrator",
        };
        f.write_str(label)
    }
}

/// Why and where a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Unit that raised the failure.
    pub unit: UnitKind,
    /// Human-readable cause.
    pub reason: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(unit: UnitKind, reason: impl Into<String>) -> Self {
        Self {
            unit,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Errors that terminate a session or reject a request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinationError {
    /// Request could not be turned into constraints.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Illegal lifecycle step.
    #[error("illegal session transition {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: SessionStatus,
        /// Requested status.
        to: SessionStatus,
    },
    /// A unit failed beyond its own fallback policy.
    #[error("{unit} failed: {reason}")]
    UnitFailure {
        /// Failing unit.
        unit: UnitKind,
        /// Cause.
        reason: String,
    },
    /// The session was cancelled by its owner.
    #[error("session cancelled")]
    Cancelled,
    /// No session with that id is tracked.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

impl CoordinationError {
    /// Unit to blame when this error ends a session.
    #[must_use]
    pub const fn unit(&self) -> UnitKind {
        match self {
            Self::UnitFailure { unit, .. } => *unit,
            Self::InvalidInput(_) | Self::InvalidTransition { .. } | Self::UnknownSession(_) => {
                UnitKind::Session
            }
            Self::Cancelled => UnitKind::Orchestrator,
        }
    }

    /// Converts into a failure record.
    #[must_use]
    pub fn to_failure(&self) -> FailureRecord {
        FailureRecord::new(self.unit(), self.to_string())
    }
}
