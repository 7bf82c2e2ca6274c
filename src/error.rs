use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type for mask fusion operations
///
/// Every per-image step of the fusion pipeline reports failures through this
/// type. The evaluation harness records it per image and keeps going.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// A tile or fallback set has too few samples to fit a mixture
    ///
    /// Raised by the likelihood estimator when a candidate fallback chain is
    /// exhausted and the configured policy asks to fail rather than to
    /// assign a neutral probability.
    #[error("Not enough {context} samples: got {available}, need at least {required}")]
    DataInsufficiency {
        /// What was being sampled (e.g. "foreground", "background")
        context: String,
        available: usize,
        required: usize,
    },

    /// The labeling optimizer failed to produce a labeling
    #[error("Solver failure: {0}")]
    Solver(#[from] SolverError),

    /// Image, mask and ground-truth extents disagree
    ///
    /// Dimensions are reported as (width, height).
    #[error("Dimension mismatch in {context}: expected {expected:?}, actual {actual:?}")]
    DimensionMismatch {
        context: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// A required input (weak mask, ground truth, image file) is absent
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Invalid parameter provided to the operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reading or writing a file failed
    #[error("I/O error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Error type for the MILP labeling solve
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    /// The model has no feasible assignment
    ///
    /// Agreement constraints only fix variables to values that satisfy their
    /// own linearization rows, so this points at a construction bug.
    #[error("labeling problem is infeasible")]
    Infeasible,

    #[error("labeling problem is unbounded")]
    Unbounded,

    /// The time limit elapsed before the backend found any feasible labeling
    #[error("time limit of {0:?} reached without an incumbent solution")]
    TimeoutWithoutIncumbent(Duration),

    /// Any other error reported by the MILP backend
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<good_lp::ResolutionError> for SolverError {
    fn from(value: good_lp::ResolutionError) -> Self {
        match value {
            good_lp::ResolutionError::Infeasible => Self::Infeasible,
            good_lp::ResolutionError::Unbounded => Self::Unbounded,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate
pub type FusionResult<T> = Result<T, FusionError>;
