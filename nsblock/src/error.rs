//! Typed failure causes.
//!
//! Fallible functions return `anyhow::Result`; the causes below are attached
//! so callers can tell input problems from evaluator failures with
//! `err.downcast_ref::<NsbmError>()`.

use thiserror::Error;

/// Errors raised by the refinement, sampling and aggregation entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NsbmError {
    /// A sample trace with no samples was given where at least one is needed
    #[error("sample trace is empty")]
    EmptyTrace,

    /// Too few samples to cluster into modes; fall back to a single mode
    #[error("sample trace has {0} sample(s); at least 2 are needed to cluster modes")]
    DegenerateTrace(usize),

    /// Two partitions (or a partition and a graph) disagree on the node count
    #[error("node count mismatch: expected {expected}, found {found}")]
    NodeCountMismatch {
        /// Node count of the reference
        expected: usize,
        /// Node count of the offending partition
        found: usize,
    },

    /// Samples in a trace disagree on the number of hierarchy levels
    #[error("level count mismatch: expected {expected}, found {found}")]
    LevelCountMismatch {
        /// Level count of the first sample
        expected: usize,
        /// Level count of the offending sample
        found: usize,
    },

    /// A configuration value is out of its valid range
    #[error("invalid option `{name}`: {reason}")]
    InvalidOption {
        /// Option name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A nested partition violates its structural invariants
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// A graph could not be built from the given edges
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// The entropy evaluator produced NaN or an infinite value
    #[error("entropy evaluation is not finite: {0}")]
    NonFiniteEntropy(f64),
}

impl NsbmError {
    /// Whether this is a caller input problem (as opposed to a computation failure)
    pub fn is_input_error(&self) -> bool {
        !matches!(self, NsbmError::NonFiniteEntropy(_))
    }

    pub(crate) fn invalid_option(name: &'static str, reason: impl Into<String>) -> Self {
        NsbmError::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}

/// Reject a NaN or infinite entropy value.
pub(crate) fn finite_entropy(value: f64) -> anyhow::Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(NsbmError::NonFiniteEntropy(value).into())
    }
}
