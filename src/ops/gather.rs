//! Gather-along-axis-0 tiling.
//!
//! Output rows equal the index count; each row copies `inner` contiguous
//! elements from the params table. Pure data movement, so the plan is a
//! row split over cores plus a double-buffered UB batch solve. The
//! element width picks the copy-engine branch and with it the kernel
//! variant.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{align_down, align_up, ceil_div};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::{check_rank, element_count};
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::with_system_reserve;

const DOUBLE_BUFFER: u64 = 2;

/// Copy-engine branch code by element width.
fn elem_branch(dtype: Dtype) -> u64 {
    match dtype.size_bytes() {
        8 => 80,
        4 => 40,
        2 => 20,
        _ => 10,
    }
}

fn indices_key_base(dtype: Dtype) -> u64 {
    match dtype {
        Dtype::I32 => 400,
        _ => 800,
    }
}

/// Row-copy kernel variant.
const GATHER_VARIANT: u64 = 1;

/// Compute the tiling plan for gather along axis 0.
pub fn tile_gather(
    params_dims: &[i64],
    indices_dims: &[i64],
    dtype: Dtype,
    indices_dtype: Dtype,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    check_rank(params_dims.len())?;
    check_rank(indices_dims.len().max(1))?;
    if !indices_dtype.is_index() {
        return Err(TilingError::UnsupportedDtype { dtype: indices_dtype, operand: "indices" });
    }

    let table_rows = element_count(&params_dims[..1])?;
    let inner = element_count(&params_dims[1..])?;
    let out_rows = element_count(indices_dims)?;

    if out_rows == 0 || inner == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("out_rows", out_rows);
        plan.push_field("inner", inner);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }
    if table_rows == 0 {
        return Err(TilingError::ShapeMismatch(
            "params table has zero rows but indices are non-empty".into(),
        ));
    }

    let cores = platform.core_num() as u64;
    let elem = dtype.size_bytes();
    let idx = indices_dtype.size_bytes();
    let block_elems = platform.block_elems(dtype);
    let ub = platform.usable_ub();

    // Core split over output rows.
    let block_rows = ceil_div(out_rows, cores);
    let used = ceil_div(out_rows, block_rows);
    let tail_rows = out_rows - block_rows * (used - 1);

    // UB batch: r * (row slab + index) double-buffered. Rows wider than
    // the budget fall back to a column loop within a single row.
    let inner_aligned = align_up(inner, block_elems);
    let row_slab = inner_aligned * elem;
    let per_row = row_slab + align_up(idx, platform.block_align());
    let budget = ub / DOUBLE_BUFFER;

    let (ub_rows, ub_cols, col_loops) = if per_row <= budget {
        let r = (budget / per_row).clamp(1, block_rows);
        (r, inner, 1)
    } else {
        let cols = align_down(budget.saturating_sub(platform.block_align()) / elem, block_elems)
            .max(1);
        (1, cols, ceil_div(inner, cols))
    };

    let key = indices_key_base(indices_dtype) + elem_branch(dtype) + GATHER_VARIANT;
    let mut plan = TilingPlan::new(used as u32, key);
    plan.push_field("table_rows", table_rows);
    plan.push_field("inner", inner);
    plan.push_field("block_rows", block_rows);
    plan.push_field("tail_rows", tail_rows);
    plan.push_field("ub_rows", ub_rows);
    plan.push_field("ub_cols", ub_cols);
    plan.push_field("row_loops", ceil_div(block_rows, ub_rows));
    plan.push_field("col_loops", col_loops);
    plan.set_workspace_bytes(with_system_reserve(0));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(64, 245760).unwrap()
    }

    #[test]
    fn element_width_selects_kernel_variant() {
        let p = platform();
        // Same shapes, int64 indices: 64-bit vs 32-bit elements.
        let wide = tile_gather(&[1000, 128], &[4096], Dtype::I64, Dtype::I64, &p).unwrap();
        let narrow = tile_gather(&[1000, 128], &[4096], Dtype::F32, Dtype::I64, &p).unwrap();
        assert_eq!(wide.tiling_key(), 881);
        assert_eq!(narrow.tiling_key(), 841);

        let narrow32 = tile_gather(&[1000, 128], &[4096], Dtype::F32, Dtype::I32, &p).unwrap();
        assert_eq!(narrow32.tiling_key(), 441);
    }

    #[test]
    fn row_coverage() {
        let p = platform();
        let plan = tile_gather(&[500, 64], &[10_001], Dtype::F16, Dtype::I32, &p).unwrap();
        let block = plan.field("block_rows").unwrap();
        let tail = plan.field("tail_rows").unwrap();
        let used = plan.used_core_num() as u64;
        assert_eq!(block * (used - 1) + tail, 10_001);
        assert!(tail >= 1 && tail <= block);
        assert!(used <= 64);
    }

    #[test]
    fn wide_rows_loop_over_columns() {
        let p = platform();
        let plan = tile_gather(&[10, 1_000_000], &[8], Dtype::F32, Dtype::I32, &p).unwrap();
        assert_eq!(plan.field("ub_rows"), Some(1));
        let cols = plan.field("ub_cols").unwrap();
        let loops = plan.field("col_loops").unwrap();
        assert!(cols * loops >= 1_000_000);
        // Double-buffered column slab fits.
        assert!(cols * 4 * 2 <= p.usable_ub());
    }

    #[test]
    fn zero_indices_degenerate() {
        let p = platform();
        let plan = tile_gather(&[10, 16], &[0], Dtype::F32, Dtype::I32, &p).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
        assert_eq!(plan.used_core_num(), 1);
    }

    #[test]
    fn empty_table_with_indices_is_an_error() {
        let p = platform();
        assert!(matches!(
            tile_gather(&[0, 16], &[4], Dtype::F32, Dtype::I32, &p),
            Err(TilingError::ShapeMismatch(_))
        ));
    }
}
