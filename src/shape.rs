//! Normalized shape view consumed by the strategy family.
//!
//! An op frontend reduces its full-rank tensors and attributes to three
//! scalars (the input outer row/index cardinality, the output outer
//! cardinality, and the contiguous inner width) plus the operand dtypes.
//! Everything a strategy's feasibility predicate needs is derivable from
//! these.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};

/// Maximum tensor rank accepted by any op frontend.
pub const MAX_RANK: usize = 8;

/// Element count of a dimension list with overflow and sign checking.
pub fn element_count(dims: &[i64]) -> TilingResult<u64> {
    let mut count: u64 = 1;
    for (index, &dim) in dims.iter().enumerate() {
        if dim < 0 {
            return Err(TilingError::NegativeDim { dim, index });
        }
        count = count
            .checked_mul(dim as u64)
            .ok_or_else(|| TilingError::ElementCountOverflow(dims.to_vec()))?;
    }
    Ok(count)
}

/// Normalize a possibly-negative axis attribute into `[0, rank)`.
pub fn normalize_axis(axis: i64, rank: usize) -> TilingResult<usize> {
    let rank_i = rank as i64;
    let adjusted = if axis < 0 { axis + rank_i } else { axis };
    if adjusted < 0 || adjusted >= rank_i {
        return Err(TilingError::AxisOutOfRange { axis, rank });
    }
    Ok(adjusted as usize)
}

/// Reject ranks outside `[1, MAX_RANK]`.
pub fn check_rank(rank: usize) -> TilingResult<()> {
    if rank == 0 || rank > MAX_RANK {
        return Err(TilingError::RankOutOfRange { rank, max: MAX_RANK });
    }
    Ok(())
}

/// Scalar shape summary of one op invocation.
///
/// `input_outer` and `inner` may be zero; such shapes are degenerate and
/// take the dedicated zero-work plan instead of the general strategies.
/// `output_outer` is always at least 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeModel {
    pub input_outer: u64,
    pub output_outer: u64,
    pub inner: u64,
    pub dtype: Dtype,
    pub index_dtype: Dtype,
    pub deterministic: bool,
}

impl ShapeModel {
    pub fn new(
        input_outer: u64,
        output_outer: u64,
        inner: u64,
        dtype: Dtype,
        index_dtype: Dtype,
    ) -> TilingResult<Self> {
        if output_outer == 0 {
            return Err(TilingError::ShapeMismatch(
                "output outer dimension must be at least 1".into(),
            ));
        }
        if !index_dtype.is_index() {
            return Err(TilingError::UnsupportedDtype {
                dtype: index_dtype,
                operand: "index tensor",
            });
        }
        Ok(ShapeModel {
            input_outer,
            output_outer,
            inner,
            dtype,
            index_dtype,
            deterministic: false,
        })
    }

    /// Request deterministic cross-core accumulation order.
    pub fn deterministic(mut self, flag: bool) -> Self {
        self.deterministic = flag;
        self
    }

    /// Fan-in signal: how many input rows collapse per output row.
    pub fn ratio(&self) -> f64 {
        self.input_outer as f64 / self.output_outer as f64
    }

    pub fn is_degenerate(&self) -> bool {
        self.input_outer == 0 || self.inner == 0
    }

    /// Bytes of one contiguous input row.
    pub fn row_bytes(&self) -> u64 {
        self.inner * self.dtype.size_bytes()
    }

    pub fn index_bytes(&self) -> u64 {
        self.index_dtype.size_bytes()
    }

    pub fn output_elements(&self) -> u64 {
        self.output_outer * self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_checks() {
        assert_eq!(element_count(&[512, 1, 2, 1, 1, 1]).unwrap(), 1024);
        assert_eq!(element_count(&[]).unwrap(), 1);
        assert!(matches!(
            element_count(&[4, -1]),
            Err(TilingError::NegativeDim { dim: -1, index: 1 })
        ));
        assert!(matches!(
            element_count(&[i64::MAX, i64::MAX]),
            Err(TilingError::ElementCountOverflow(_))
        ));
    }

    #[test]
    fn axis_normalization() {
        assert_eq!(normalize_axis(-1, 4).unwrap(), 3);
        assert_eq!(normalize_axis(0, 4).unwrap(), 0);
        assert!(normalize_axis(4, 4).is_err());
        assert!(normalize_axis(-5, 4).is_err());
    }

    #[test]
    fn model_invariants() {
        assert!(ShapeModel::new(10, 0, 4, Dtype::F32, Dtype::I32).is_err());
        assert!(ShapeModel::new(10, 5, 4, Dtype::F32, Dtype::F16).is_err());

        let m = ShapeModel::new(20, 4, 16, Dtype::F32, Dtype::I64).unwrap();
        assert_eq!(m.ratio(), 5.0);
        assert_eq!(m.row_bytes(), 64);
        assert!(!m.is_degenerate());

        let z = ShapeModel::new(0, 4, 16, Dtype::F32, Dtype::I64).unwrap();
        assert!(z.is_degenerate());
    }
}
