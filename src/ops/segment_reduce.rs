//! Unsorted-segment-reduction tiling.
//!
//! Rows of `data (S, ...)` accumulate into `num_segments` output rows as
//! directed by the segment-id vector. This is the canonical consumer of
//! the generic strategy ladder: output-resident when the whole output
//! fits, the sort/direct split family otherwise, the row fallback when
//! nothing else closes. The frontend contributes validation, the fan-in
//! shape model, the op field block, and the workspace request.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::{check_rank, element_count, ShapeModel};
use crate::strategy::{StrategySelector, ZERO_SHAPE_KEY};
use crate::workspace::{sync_flag_bytes, with_system_reserve};

/// Supported reductions. Mean reuses the sum kernels plus a divide pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Mean,
}

impl ReduceKind {
    const fn variant_code(self) -> u64 {
        match self {
            ReduceKind::Sum => 0,
            ReduceKind::Mean => 1,
        }
    }
}

/// Compute the tiling plan for an unsorted segment reduction.
pub fn tile_segment_reduce(
    data_dims: &[i64],
    num_segments: u64,
    kind: ReduceKind,
    dtype: Dtype,
    ids_dtype: Dtype,
    deterministic: bool,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    check_rank(data_dims.len())?;
    if num_segments == 0 {
        return Err(TilingError::InvalidAttr {
            name: "num_segments",
            reason: "must be at least 1".into(),
        });
    }
    if !dtype.is_float() && dtype != Dtype::I32 {
        return Err(TilingError::UnsupportedDtype { dtype, operand: "data" });
    }

    let rows = element_count(&data_dims[..1])?;
    let inner = element_count(&data_dims[1..])?;

    let shape = ShapeModel::new(rows, num_segments, inner, dtype, ids_dtype)?
        .deterministic(deterministic);
    let mut plan = StrategySelector::reduction_default().select(&shape, platform)?;

    if plan.tiling_key() != ZERO_SHAPE_KEY {
        // Frontend key components: dtype code plus the mean-divide bit.
        plan.augment_key(dtype.key_code() * 10 + kind.variant_code());
    }
    plan.push_field("num_segments", num_segments);
    plan.push_field("segment_inner", inner);
    plan.push_field("reduce_kind", kind.variant_code());

    // Atomic paths need inter-core flags; sort paths also spill f32
    // partials per segment. Mean additionally keeps per-segment counts.
    let family = plan.tiling_key() / 1000;
    let mut user_ws = match family {
        1 | 2 => sync_flag_bytes(plan.used_core_num()),
        4 | 6 | 7 => {
            sync_flag_bytes(plan.used_core_num()) + num_segments * inner * 4
        }
        _ => 0,
    };
    if kind == ReduceKind::Mean {
        user_ws += num_segments * 4;
    }
    plan.set_workspace_bytes(with_system_reserve(user_ws));
    Ok(plan)
}
