//! Output-fully-resident strategy.
//!
//! The whole output stays in UB as an f32 accumulation buffer for the
//! lifetime of a core's loop; input rows and their indices stream through
//! double-buffered slots. This avoids any cross-core traffic on the
//! output, so it is the first choice whenever the output footprint fits.

use crate::error::TilingResult;
use crate::math::{align_up, ceil_div};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::ShapeModel;
use crate::strategy::TilingStrategy;

/// Base dispatch key of the output-resident kernel variant.
pub const RESIDENT_KEY: u64 = 1000;

/// Per-instruction contiguous span limit in elements; rows wider than
/// this cannot be processed as a single vector span.
const INNER_SPAN_LIMIT: u64 = 16384;

const DOUBLE_BUFFER: u64 = 2;

pub struct OutputResidentStrategy;

impl OutputResidentStrategy {
    /// Resident f32 accumulation footprint of the full output.
    fn output_resident_bytes(shape: &ShapeModel, platform: &PlatformInfo) -> u64 {
        let f32_block = platform.block_align() / 4;
        shape.output_outer * align_up(shape.inner, f32_block) * 4
    }

    /// Streaming budget left after the resident output, if positive.
    fn stream_budget(shape: &ShapeModel, platform: &PlatformInfo) -> Option<u64> {
        let resident = Self::output_resident_bytes(shape, platform);
        platform.usable_ub().checked_sub(resident)
    }

    /// Largest row batch whose double-buffered streaming footprint fits.
    fn solve_row_batch(shape: &ShapeModel, platform: &PlatformInfo, budget: u64) -> u64 {
        // (r * row_bytes + r * index_bytes + 2 * align) * 2 <= budget
        let per_row = shape.row_bytes() + shape.index_bytes();
        let fixed = 2 * platform.block_align();
        (budget / DOUBLE_BUFFER).saturating_sub(fixed) / per_row
    }
}

impl TilingStrategy for OutputResidentStrategy {
    fn name(&self) -> &'static str {
        "output_resident"
    }

    fn is_capable(&self, shape: &ShapeModel, platform: &PlatformInfo) -> bool {
        // Write-back of the per-core output copies goes through atomic
        // accumulation, whose order is unordered across cores.
        if !shape.dtype.supports_atomic_accumulate() || shape.deterministic {
            return false;
        }
        let inner_aligned = align_up(shape.inner, platform.block_elems(shape.dtype));
        if inner_aligned > INNER_SPAN_LIMIT {
            return false;
        }
        // A non-positive streaming budget, or one too small for even a
        // single row, reads as infeasible rather than as an error.
        match Self::stream_budget(shape, platform) {
            Some(budget) => Self::solve_row_batch(shape, platform, budget) >= 1,
            None => false,
        }
    }

    fn do_tiling(&self, shape: &ShapeModel, platform: &PlatformInfo) -> TilingResult<TilingPlan> {
        debug_assert!(!shape.is_degenerate());
        let cores = platform.core_num() as u64;

        let max_index_num = ceil_div(shape.input_outer, cores);
        let used = if max_index_num == 1 {
            shape.input_outer.min(cores)
        } else {
            ceil_div(shape.input_outer, max_index_num).min(cores)
        };

        let budget = Self::stream_budget(shape, platform).unwrap_or(0);
        let row_num_ub = Self::solve_row_batch(shape, platform, budget)
            .min(max_index_num)
            .max(1);
        let ub_loop_times = ceil_div(max_index_num, row_num_ub);
        let tail_rows = shape.input_outer - max_index_num * (used - 1);

        let mut plan = TilingPlan::new(used as u32, RESIDENT_KEY);
        plan.push_field("max_index_num", max_index_num);
        plan.push_field("tail_index_num", tail_rows);
        plan.push_field("row_num_ub", row_num_ub);
        plan.push_field("ub_loop_times", ub_loop_times);
        plan.push_field("inner", shape.inner);
        plan.push_field(
            "inner_aligned",
            align_up(shape.inner, platform.block_elems(shape.dtype)),
        );
        plan.push_field("output_rows", shape.output_outer);
        Ok(plan)
    }
}
