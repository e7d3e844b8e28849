//! Error types for the tiling engine.
//!
//! Only contract violations the caller can act on are surfaced as errors:
//! bad ranks, mismatched element counts, unsupported dtype combinations,
//! out-of-range attributes. A strategy whose buffer arithmetic does not
//! close is *not* an error: the selector silently tries the next one.
//! Serialization overflow and a selector with no capable terminal strategy
//! are invariant violations and panic instead.

use thiserror::Error;

use crate::dtype::Dtype;

pub type TilingResult<T> = Result<T, TilingError>;

#[derive(Debug, Error)]
pub enum TilingError {
    #[error("unsupported rank {rank}: expected 1..={max}")]
    RankOutOfRange { rank: usize, max: usize },

    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    #[error("negative dimension {dim} at index {index}")]
    NegativeDim { dim: i64, index: usize },

    #[error("element count overflow for shape {0:?}")]
    ElementCountOverflow(Vec<i64>),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("unsupported dtype {dtype:?} for {operand}")]
    UnsupportedDtype { dtype: Dtype, operand: &'static str },

    #[error("invalid attribute {name}: {reason}")]
    InvalidAttr { name: &'static str, reason: String },

    #[error("invalid platform config: {0}")]
    InvalidPlatform(String),

    #[error("no feasible tiling: {0}")]
    Infeasible(String),
}
