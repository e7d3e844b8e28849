//! Column/row split strategy with the dichotomous sort-batch solver.
//!
//! Two-level split: cores are factored over (rows x column-chunks) with
//! the tail-imbalance-minimizing grid factorization, then each core's
//! block is cut into UB-sized batches. When the fan-in ratio is high the
//! kernel first sorts the per-row keys so duplicate outputs coalesce
//! before accumulation; the sort's scratch requirement depends on the
//! batch being sorted, so the batch size is found by integer dichotomy
//! instead of a closed form.

use crate::error::{TilingError, TilingResult};
use crate::math::{align_down, align_up, ceil_div, factorize_grid, solve_max_batch};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::ShapeModel;
use crate::sort::{sort_tmp_size, SORT_STAT_PADDING};
use crate::strategy::TilingStrategy;

/// Direct atomic-accumulate variant: no sort pass.
pub const DIRECT_KEY: u64 = 2000;
/// Sort variant for rows narrower than the cache-line threshold.
pub const SORT_SMALL_ROW_KEY: u64 = 4100;
/// General sort variant.
pub const SORT_KEY: u64 = 6000;
/// Sort variant with deterministic accumulation order.
pub const SORT_DETERMINISTIC_KEY: u64 = 7000;

/// Fan-in ratio above which sorting the keys beats atomic contention.
/// Hardware-tuned; re-validate when core count or UB size changes.
const SORT_RATIO_THRESHOLD: f64 = 5.0;

/// Rows narrower than this (bytes) dispatch the small-row regroup kernel.
const SMALL_ROW_BYTES: u64 = 128;

/// Minimum row width (bytes) for the direct SIMD path to be worth it.
const MIN_SIMD_ROW_BYTES: u64 = 32;

/// Column-chunk granule for the block split.
const BASE_COL_BYTES: u64 = 512;

/// Smallest per-core block in bytes; using more cores than this allows
/// just trades DMA efficiency for idle cores.
const MIN_CORE_BLOCK_BYTES: u64 = 1024;

const DOUBLE_BUFFER: u64 = 2;

pub struct SplitStrategy;

impl SplitStrategy {
    fn needs_sort(shape: &ShapeModel) -> bool {
        shape.deterministic || shape.ratio() >= SORT_RATIO_THRESHOLD
    }

    fn variant_key(shape: &ShapeModel) -> u64 {
        if shape.deterministic {
            SORT_DETERMINISTIC_KEY
        } else if Self::needs_sort(shape) {
            if shape.row_bytes() < SMALL_ROW_BYTES {
                SORT_SMALL_ROW_KEY
            } else {
                SORT_KEY
            }
        } else {
            DIRECT_KEY
        }
    }

    /// Widest UB column chunk the direct path can stream double-buffered.
    fn direct_max_col(shape: &ShapeModel, platform: &PlatformInfo) -> u64 {
        let elem = shape.dtype.size_bytes();
        let fixed = DOUBLE_BUFFER * (platform.block_align() + shape.index_bytes());
        let raw = platform.usable_ub().saturating_sub(fixed) / DOUBLE_BUFFER / elem;
        align_down(raw, platform.block_elems(shape.dtype))
    }

    /// Total UB bytes for a sorted batch of `rows` with `ub_col` columns.
    fn sort_footprint(shape: &ShapeModel, platform: &PlatformInfo, rows: u64, ub_col: u64) -> u64 {
        let align = platform.block_align();
        let elem = shape.dtype.size_bytes();
        let idx = shape.index_bytes();
        align_up(rows * ub_col * elem, align)          // input slab
            + align_up(rows * ub_col * 4, align)       // f32 accumulation slab
            + align_up(rows * idx, align)              // raw keys
            + align_up(rows * idx, align)              // sorted keys
            + 2 * align_up(rows * 4, align)            // source index + unique count
            + 2 * SORT_STAT_PADDING
            + sort_tmp_size(rows, idx)
    }

    /// UB column cap used by both the capability check and the solver.
    fn col_cap(shape: &ShapeModel, platform: &PlatformInfo) -> u64 {
        let base_col = BASE_COL_BYTES / shape.dtype.size_bytes();
        base_col.min(align_up(shape.inner, platform.block_elems(shape.dtype)))
    }
}

impl TilingStrategy for SplitStrategy {
    fn name(&self) -> &'static str {
        "col_row_split"
    }

    fn is_capable(&self, shape: &ShapeModel, platform: &PlatformInfo) -> bool {
        if !shape.dtype.supports_atomic_accumulate() && !shape.deterministic {
            return false;
        }
        if Self::needs_sort(shape) {
            // Even a one-row batch must fit, or the caller has to fall
            // back further.
            let cap = Self::col_cap(shape, platform);
            Self::sort_footprint(shape, platform, 1, cap) <= platform.usable_ub()
        } else {
            shape.row_bytes() >= MIN_SIMD_ROW_BYTES
                && Self::direct_max_col(shape, platform) >= platform.block_elems(shape.dtype)
        }
    }

    fn do_tiling(&self, shape: &ShapeModel, platform: &PlatformInfo) -> TilingResult<TilingPlan> {
        debug_assert!(!shape.is_degenerate());
        let cores = platform.core_num() as u64;
        let elem = shape.dtype.size_bytes();
        let block_elems = platform.block_elems(shape.dtype);
        let ub = platform.usable_ub();

        // ── Block split ──────────────────────────────────────────────
        let base_col = BASE_COL_BYTES / elem;
        let col_chunks = ceil_div(shape.inner, base_col);
        let want = (shape.input_outer * col_chunks * BASE_COL_BYTES / MIN_CORE_BLOCK_BYTES)
            .clamp(1, cores);
        let (s_tiles, a_tiles) = factorize_grid(want, shape.input_outer, col_chunks, true);

        let norm_block_s = ceil_div(shape.input_outer, s_tiles);
        let norm_block_a = align_up(ceil_div(shape.inner, a_tiles), block_elems);
        // Alignment rounding can change the tile counts; re-derive.
        let s_tiles = ceil_div(shape.input_outer, norm_block_s);
        let a_tiles = ceil_div(shape.inner, norm_block_a);
        let used = (s_tiles * a_tiles).min(cores);
        let tail_block_s = shape.input_outer - norm_block_s * (s_tiles - 1);
        let tail_block_a = shape.inner - norm_block_a * (a_tiles - 1);

        let mut plan = TilingPlan::new(used as u32, Self::variant_key(shape));
        plan.push_field("norm_block_s", norm_block_s);
        plan.push_field("tail_block_s", tail_block_s);
        plan.push_field("s_tile_num", s_tiles);
        plan.push_field("norm_block_a", norm_block_a);
        plan.push_field("tail_block_a", tail_block_a);
        plan.push_field("a_tile_num", a_tiles);

        // ── UB split ─────────────────────────────────────────────────
        let core_max_rows = norm_block_s;
        if Self::needs_sort(shape) {
            let ub_col = norm_block_a.min(base_col);
            let sort_base_s = solve_max_batch(1, core_max_rows, ub, |rows| {
                Self::sort_footprint(shape, platform, rows, ub_col)
            })
            .ok_or_else(|| {
                TilingError::Infeasible(format!(
                    "sort batch of 1 row ({} cols) exceeds UB budget {ub}",
                    ub_col
                ))
            })?;

            // Whole block fits by rows: spend the leftover budget on
            // wider columns.
            let mut sort_base_a = ub_col;
            if sort_base_s == core_max_rows && sort_base_a < norm_block_a {
                let spent = Self::sort_footprint(shape, platform, sort_base_s, ub_col);
                let extra =
                    align_down((ub - spent) / (sort_base_s * (elem + 4)), block_elems);
                sort_base_a = (ub_col + extra).min(norm_block_a);
            }

            plan.push_field("sort_base_s", sort_base_s);
            plan.push_field("sort_base_a", sort_base_a);
            plan.push_field("ub_row_loops", ceil_div(core_max_rows, sort_base_s));
            plan.push_field("ub_col_loops", ceil_div(norm_block_a, sort_base_a));
            plan.push_field("sort_tmp_bytes", sort_tmp_size(sort_base_s, shape.index_bytes()));
        } else {
            let ub_factor_col = norm_block_a.min(Self::direct_max_col(shape, platform));
            let per_row = ub_factor_col * elem + shape.index_bytes();
            let ub_factor_row = ((ub - DOUBLE_BUFFER * platform.block_align())
                / DOUBLE_BUFFER
                / per_row)
                .clamp(1, core_max_rows);

            plan.push_field("ub_factor_row", ub_factor_row);
            plan.push_field("ub_factor_col", ub_factor_col);
            plan.push_field("ub_row_loops", ceil_div(core_max_rows, ub_factor_row));
            plan.push_field("ub_col_loops", ceil_div(norm_block_a, ub_factor_col));
        }

        log::debug!(
            "split tiling: key={} cores={} block=({}x{}) tiles=({}x{})",
            plan.tiling_key(),
            plan.used_core_num(),
            norm_block_s,
            norm_block_a,
            s_tiles,
            a_tiles
        );
        Ok(plan)
    }
}
