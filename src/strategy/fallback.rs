//! Terminal fallback strategy.
//!
//! Owns-the-output model: each core takes a disjoint range of output rows
//! and scans the whole index stream, accumulating only the rows it owns.
//! No atomics, no sort, no dtype requirements: `is_capable` is
//! unconditionally true, which is what makes the selector total.
//! Slowest of the family; it exists to guarantee a plan, not to win.

use crate::error::TilingResult;
use crate::math::{align_down, align_up, ceil_div};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::ShapeModel;
use crate::strategy::TilingStrategy;

/// Dispatch key of the fallback kernel variant.
pub const FALLBACK_KEY: u64 = 100;

/// Indices streamed per id-buffer refill.
const ID_BATCH: u64 = 512;

const DOUBLE_BUFFER: u64 = 2;

pub struct RowFallbackStrategy;

impl TilingStrategy for RowFallbackStrategy {
    fn name(&self) -> &'static str {
        "row_fallback"
    }

    fn is_capable(&self, _shape: &ShapeModel, _platform: &PlatformInfo) -> bool {
        true
    }

    fn do_tiling(&self, shape: &ShapeModel, platform: &PlatformInfo) -> TilingResult<TilingPlan> {
        debug_assert!(!shape.is_degenerate());
        let cores = platform.core_num() as u64;
        let elem = shape.dtype.size_bytes();
        let block_elems = platform.block_elems(shape.dtype);
        let ub = platform.usable_ub();

        // Core split over output rows.
        let out_block_rows = ceil_div(shape.output_outer, cores);
        let used = ceil_div(shape.output_outer, out_block_rows);
        let out_tail_rows = shape.output_outer - out_block_rows * (used - 1);

        // UB split: a resident id batch, a double-buffered input-row
        // chunk, and an f32 accumulation chunk for the owned rows.
        let id_bytes = DOUBLE_BUFFER * align_up(ID_BATCH * shape.index_bytes(), platform.block_align());
        let remaining = ub.saturating_sub(id_bytes + DOUBLE_BUFFER * platform.block_align());
        let inner_aligned = align_up(shape.inner, block_elems);
        let ub_cols = align_down(remaining / (4 + DOUBLE_BUFFER * elem), block_elems)
            .clamp(1, inner_aligned);
        let ub_out_rows = (remaining.saturating_sub(DOUBLE_BUFFER * ub_cols * elem)
            / (ub_cols * 4))
            .clamp(1, out_block_rows);

        let mut plan = TilingPlan::new(used as u32, FALLBACK_KEY);
        plan.push_field("out_block_rows", out_block_rows);
        plan.push_field("out_tail_rows", out_tail_rows);
        plan.push_field("ub_out_rows", ub_out_rows);
        plan.push_field("ub_cols", ub_cols);
        plan.push_field("out_row_loops", ceil_div(out_block_rows, ub_out_rows));
        plan.push_field("col_loops", ceil_div(shape.inner, ub_cols));
        plan.push_field("id_batch", ID_BATCH.min(shape.input_outer));
        plan.push_field("id_loops", ceil_div(shape.input_outer, ID_BATCH));
        Ok(plan)
    }
}
