//! Engine error taxonomy
//!
//! "No data" is never an error: it is carried as `None` in grid cells and
//! scores. Errors here are structural failures that name the offending
//! variable, timestamp or profile.

use crate::grid::Extent;
use crate::variable::Variable;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure raised by grid construction, harmonization or profile validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Source grid does not overlap the target extent
    #[error("{variable}: source extent {source_extent} does not intersect target extent {target_extent}")]
    GridCoverage {
        variable: Variable,
        source_extent: Extent,
        target_extent: Extent,
    },

    /// Requested timestamp lies outside the source time axis (no extrapolation)
    #[error("{variable}: timestamp {timestamp} outside covered range {covered_from}..={covered_to}")]
    TemporalGap {
        variable: Variable,
        timestamp: DateTime<Utc>,
        covered_from: DateTime<Utc>,
        covered_to: DateTime<Utc>,
    },

    /// Profile weights, overrides or threshold are malformed
    #[error("invalid profile '{profile_id}': {reason}")]
    InvalidProfile { profile_id: String, reason: String },

    /// Value array does not match the (time, lat, lon) shape implied by the grid
    #[error("{variable}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        variable: Variable,
        expected: usize,
        actual: usize,
    },

    /// Grid geometry or time axis is unusable
    #[error("invalid grid: {reason}")]
    InvalidGrid { reason: String },

    /// Every source failed during harmonization
    #[error("no usable source grids ({} failure(s))", .failures.len())]
    NoUsableSources { failures: Vec<EngineError> },
}

impl EngineError {
    pub(crate) fn invalid_grid(reason: impl Into<String>) -> Self {
        EngineError::InvalidGrid {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_profile(profile_id: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidProfile {
            profile_id: profile_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Variable the error is attributed to, if any
    pub fn variable(&self) -> Option<Variable> {
        match self {
            EngineError::GridCoverage { variable, .. }
            | EngineError::TemporalGap { variable, .. }
            | EngineError::ShapeMismatch { variable, .. } => Some(*variable),
            _ => None,
        }
    }
}
