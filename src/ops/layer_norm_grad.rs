//! Layer-norm gradient tiling.
//!
//! Per row: `dx` from `dy`, `x`, the saved mean/rstd and `gamma`; across
//! rows: `dgamma`/`dbeta` reductions over the normalized axis. Rows split
//! across cores; the in-row reduction uses the binary-add tree, so the
//! plan reports the fold width the kernel starts from. When a row's lane
//! set does not fit UB the kernel re-reads in column chunks and finishes
//! the row statistics through the workspace (two-pass variant).

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{align_down, align_up, ceil_div};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::{check_rank, element_count};
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::{sync_flag_bytes, with_system_reserve};

const LNG_KEY_BASE: u64 = 500;
/// Added when the row statistics need the workspace round trip.
const TWO_PASS_KEY: u64 = 20;

/// f32 elements per vector repeat.
const VECTOR_ELEMS_F32: u64 = 64;

/// Row lanes held per iteration: dy, x, dx, double buffered.
const ROW_LANES_DB: u64 = 6;
/// Resident d-length lanes: gamma, dgamma accum, dbeta accum.
const RESIDENT_LANES: u64 = 3;

/// Compute the tiling plan for the layer-norm gradient kernel.
pub fn tile_layer_norm_grad(
    x_dims: &[i64],
    dtype: Dtype,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    check_rank(x_dims.len())?;
    if x_dims.len() < 2 {
        return Err(TilingError::RankOutOfRange { rank: x_dims.len(), max: crate::shape::MAX_RANK });
    }
    if !dtype.is_float() {
        return Err(TilingError::UnsupportedDtype { dtype, operand: "x" });
    }

    let rows = element_count(&x_dims[..x_dims.len() - 1])?;
    let d = element_count(&x_dims[x_dims.len() - 1..])?;

    if rows == 0 || d == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("rows", rows);
        plan.push_field("norm_dim", d);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }

    let cores = platform.core_num() as u64;
    let ub = platform.usable_ub();
    let f32_block = platform.block_align() / 4;
    let d_aligned = align_up(d, f32_block);

    // Row split over cores.
    let block_rows = ceil_div(rows, cores);
    let used = ceil_div(rows, block_rows);
    let tail_rows = rows - block_rows * (used - 1);

    // UB fit: resident d-length lanes plus the double-buffered row set,
    // all f32-widened.
    let resident = RESIDENT_LANES * d_aligned * 4;
    let row_cost = ROW_LANES_DB * d_aligned * 4;
    let (ub_rows, ub_cols, two_pass) = if resident + row_cost <= ub {
        let r = ((ub - resident) / row_cost).clamp(1, block_rows);
        (r, d, false)
    } else {
        // Column chunks: resident and row lanes share the chunk width.
        let cols = align_down(ub / ((RESIDENT_LANES + ROW_LANES_DB) * 4), f32_block).max(1);
        (1, cols, true)
    };

    // Binary-add fold: the largest power-of-two repeat count not above
    // the chunk's repeat total; the kernel folds pairs from there.
    let repeats = ceil_div(ub_cols.min(d_aligned), VECTOR_ELEMS_F32);
    let binary_fold = {
        let mut fold = 1u64;
        while fold * 2 <= repeats {
            fold *= 2;
        }
        fold
    };

    let mut key = LNG_KEY_BASE + dtype.key_code();
    if two_pass {
        key += TWO_PASS_KEY;
    }

    let mut plan = TilingPlan::new(used as u32, key);
    plan.push_field("rows", rows);
    plan.push_field("norm_dim", d);
    plan.push_field("norm_dim_aligned", d_aligned);
    plan.push_field("block_rows", block_rows);
    plan.push_field("tail_rows", tail_rows);
    plan.push_field("ub_rows", ub_rows);
    plan.push_field("ub_cols", ub_cols);
    plan.push_field("row_loops", ceil_div(block_rows, ub_rows));
    plan.push_field("col_loops", ceil_div(d, ub_cols));
    plan.push_field("binary_fold", binary_fold);

    // dgamma/dbeta partials accumulate in f32 through the workspace and
    // cast once at the end; two-pass rows also stage their statistics.
    let mut user_ws = 2 * d * 4 + sync_flag_bytes(used as u32);
    if two_pass {
        user_ws += used * 2 * 4; // per-core mean/var staging
    }
    plan.set_workspace_bytes(with_system_reserve(user_ws));
    Ok(plan)
}
