//! Embedding dense-gradient tiling.
//!
//! Scatters `grad (..., E)` rows into a `(num_weights, E)` table keyed by
//! `indices`, optionally scaled by per-index frequency. The embedding axis
//! is split across cores at a cache-line floor; within a core the UB fit
//! runs a staged search (no cut, then cut the index axis, then cut both
//! at the cache-line column width, then at one alignment block) with the
//! index-axis base found by dichotomy against a footprint that includes
//! the radix sort's scratch. Small index tensors try an indices-full-load
//! layout first, which drops the per-loop re-sort entirely.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{align_down, align_up, ceil_div, solve_max_batch};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::{check_rank, element_count};
use crate::sort::sort_tmp_size;
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::with_system_reserve;

/// Indices count up to which the full-load layout is attempted.
const INDICES_FULL_LOAD_LIMIT: u64 = 1024;

/// Key base of the indices-full-load kernel family.
const FULL_LOAD_BASE_KEY: u64 = 100;
/// Added to the full-load key when scale_grad_by_freq is set.
const FULL_LOAD_SCALE_KEY: u64 = 10;

/// Per-core split floor on the embedding axis, in bytes.
const MIN_ROW_SPLIT_BYTES: u64 = 128;

/// Granule for the output-clear core split, in bytes.
const MIN_CLEAR_BLOCK_BYTES: u64 = 1024;

/// Row count probed when testing whether a cut of the index axis alone
/// can ever fit.
const PROBE_GROUP_ROWS: u64 = 5;

/// Last-resort embedding block: one 32-bit alignment block.
const B32_BLOCK_ELEMS: u64 = 8;

const DOUBLE_BUFFER: u64 = 2;

fn indices_key_base(dtype: Dtype) -> u64 {
    match dtype {
        Dtype::I32 => 400,
        _ => 800,
    }
}

fn grad_key_code(dtype: Dtype) -> u64 {
    match dtype {
        Dtype::F32 => 4,
        Dtype::F16 => 2,
        _ => 1, // bf16
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddingGradAttrs {
    pub num_weights: i64,
    pub padding_idx: i64,
    pub scale_grad_by_freq: bool,
}

/// Working state threaded through the staged solves.
struct Calc {
    ub: u64,
    align: u64,
    grad_bytes: u64,
    idx_bytes: u64,
    numel_indices: u64,
    embedding_dim: u64,
    num_weights: u64,
    min_base_a: u64,
    per_core: u64,
    block_dim: u64,
    last_core: u64,
    clear_block_dim: u64,
}

impl Calc {
    fn grad_block(&self) -> u64 {
        self.align / self.grad_bytes
    }

    fn idx_block(&self) -> u64 {
        self.align / self.idx_bytes
    }

    /// Footprint of the general layout: grad slab, f32 result slab, five
    /// index lanes, sort padding and scratch.
    fn ub_total(&self, base_a: u64, base_s: u64) -> u64 {
        let grad_elems = base_s * align_up(base_a, self.grad_block());
        let res_elems = base_s * align_up(base_a, self.align / 4);
        let idx_aligned = align_up(base_s, self.idx_block());
        grad_elems * self.grad_bytes
            + res_elems * 4
            + 5 * idx_aligned * self.idx_bytes
            + 2 * 64
            + sort_tmp_size(idx_aligned, self.idx_bytes)
    }

    /// Footprint of the frequency pass: two f32 count/result slabs over
    /// the weight axis plus one index lane.
    fn ub_total_freq(&self, base_a: u64, base_w: u64) -> u64 {
        let res_elems = base_w * align_up(base_a, self.grad_block());
        let idx_aligned = align_up(base_w, self.idx_block());
        DOUBLE_BUFFER * res_elems * 4 + idx_aligned * self.idx_bytes
    }

    /// Footprint of the cast-back pass: f32 source plus narrow result.
    fn ub_total_cast(&self, base_a: u64, base_w: u64) -> u64 {
        let elems = base_w * align_up(base_a, self.grad_block());
        elems * 4 + elems * self.grad_bytes
    }
}

/// Compute the tiling plan for the embedding dense-gradient kernel.
pub fn tile_embedding_grad(
    grad_dims: &[i64],
    indices_dims: &[i64],
    grad_dtype: Dtype,
    indices_dtype: Dtype,
    attrs: &EmbeddingGradAttrs,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    check_rank(grad_dims.len())?;
    check_rank(indices_dims.len().max(1))?;
    if !grad_dtype.is_float() {
        return Err(TilingError::UnsupportedDtype { dtype: grad_dtype, operand: "grad" });
    }
    if !indices_dtype.is_index() {
        return Err(TilingError::UnsupportedDtype { dtype: indices_dtype, operand: "indices" });
    }
    if attrs.num_weights <= 0 {
        return Err(TilingError::InvalidAttr {
            name: "num_weights",
            reason: format!("must be positive, got {}", attrs.num_weights),
        });
    }

    let numel_indices = element_count(indices_dims)?;
    let grad_lead = element_count(&grad_dims[..grad_dims.len() - 1])?;
    if grad_lead != numel_indices {
        return Err(TilingError::ShapeMismatch(format!(
            "grad leading element count {grad_lead} != indices element count {numel_indices}"
        )));
    }
    let embedding_dim = element_count(&grad_dims[grad_dims.len() - 1..])?;

    let key_base = indices_key_base(indices_dtype) + grad_key_code(grad_dtype);
    log::debug!(
        "embedding_grad tiling: indices={numel_indices} dim={embedding_dim} weights={} scale={}",
        attrs.num_weights,
        attrs.scale_grad_by_freq
    );

    if numel_indices == 0 || embedding_dim == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("num_weights", attrs.num_weights as u64);
        plan.push_field("embedding_dim", embedding_dim);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }

    let cores = platform.core_num() as u64;
    let grad_bytes = grad_dtype.size_bytes();
    let mut calc = Calc {
        ub: platform.usable_ub(),
        align: platform.block_align(),
        grad_bytes,
        idx_bytes: indices_dtype.size_bytes(),
        numel_indices,
        embedding_dim,
        num_weights: attrs.num_weights as u64,
        min_base_a: MIN_ROW_SPLIT_BYTES / grad_bytes,
        per_core: 0,
        block_dim: 0,
        last_core: 0,
        clear_block_dim: 0,
    };

    // Embedding-axis core split at the cache-line floor.
    calc.per_core = ceil_div(embedding_dim, cores)
        .max(calc.min_base_a)
        .min(embedding_dim);
    calc.block_dim = ceil_div(embedding_dim, calc.per_core);
    calc.last_core = embedding_dim - (calc.block_dim - 1) * calc.per_core;

    // Output-clear core split.
    let total_out = calc.num_weights * embedding_dim;
    let clear_base = MIN_CLEAR_BLOCK_BYTES / grad_bytes;
    let clear_chunks = ceil_div(total_out, clear_base);
    let clear_per = ceil_div(clear_chunks, cores);
    calc.clear_block_dim = ceil_div(clear_chunks, clear_per);

    let mut plan = if numel_indices <= INDICES_FULL_LOAD_LIMIT {
        tile_full_load(&mut calc, attrs, grad_dtype)
    } else {
        None
    };
    let full_load = plan.is_some();
    if plan.is_none() {
        plan = Some(tile_staged(&calc, attrs, key_base)?);
    }
    let mut plan = plan.expect("staged path always produces a plan or errors");

    plan.push_field("process_block", calc.block_dim);
    plan.push_field("clear_block", calc.clear_block_dim);

    let user_ws = if full_load {
        0
    } else {
        calc.num_weights * calc.idx_bytes + calc.num_weights * embedding_dim * 4
    };
    plan.set_workspace_bytes(with_system_reserve(user_ws));
    Ok(plan)
}

/// Indices-full-load layout: the entire index tensor stays resident and
/// is sorted once; the embedding axis alone is looped. Returns `None`
/// when the leftover budget cannot hold a cache-line-wide grad column.
fn tile_full_load(calc: &mut Calc, attrs: &EmbeddingGradAttrs, grad_dtype: Dtype) -> Option<TilingPlan> {
    let base_s = calc.numel_indices;
    let idx_aligned = align_up(base_s, calc.idx_block());
    let sort_tmp = sort_tmp_size(idx_aligned, calc.idx_bytes);
    let idx_buf = idx_aligned * calc.idx_bytes;

    let fixed = 2 * 64 + sort_tmp + 5 * idx_buf;
    let remain = calc.ub.checked_sub(fixed)?;
    let per_ub_a = align_down(
        remain / (calc.grad_bytes * DOUBLE_BUFFER) / base_s,
        calc.grad_block(),
    );
    if per_ub_a < calc.min_base_a && per_ub_a != calc.embedding_dim {
        return None;
    }

    calc.block_dim = ceil_div(calc.embedding_dim, per_ub_a).min(calc.block_dim);
    calc.per_core = ceil_div(calc.embedding_dim, calc.block_dim);
    calc.last_core = calc.embedding_dim - (calc.block_dim - 1) * calc.per_core;

    let mut key = FULL_LOAD_BASE_KEY + grad_key_code(grad_dtype);
    if attrs.scale_grad_by_freq {
        key += FULL_LOAD_SCALE_KEY;
    }

    let loop_grad = ceil_div(calc.per_core, per_ub_a);
    let mut plan = TilingPlan::new(calc.block_dim.max(calc.clear_block_dim) as u32, key);
    push_common_fields(&mut plan, calc, attrs);
    plan.push_field("base_a", per_ub_a);
    plan.push_field("base_s", base_s);
    plan.push_field("grad_factor", base_s * align_up(per_ub_a, calc.grad_block()));
    plan.push_field("loop_grad", loop_grad);
    plan.push_field("grad_per_row", per_ub_a);
    plan.push_field("grad_per_row_tail", calc.per_core - (loop_grad - 1) * per_ub_a);
    plan.push_field("loop_indices", 1);
    plan.push_field("indices_factor", base_s);
    plan.push_field("indices_factor_tail", 0);
    plan.push_field("sort_shared_buf", sort_tmp);
    log::debug!("embedding_grad: indices full load, base_a={per_ub_a}");
    Some(plan)
}

/// Staged cut search of the general layout, plus the frequency or
/// cast-back sub-tilings when the attributes ask for them.
fn tile_staged(calc: &Calc, attrs: &EmbeddingGradAttrs, key: u64) -> TilingResult<TilingPlan> {
    let (base_a, base_s) = solve_grad_cut(calc)?;

    let mut plan = TilingPlan::new(calc.block_dim.max(calc.clear_block_dim) as u32, key);
    push_common_fields(&mut plan, calc, attrs);
    plan.push_field("base_a", base_a);
    plan.push_field("base_s", base_s);

    let loop_grad = ceil_div(calc.per_core, base_a);
    let loop_indices = ceil_div(calc.numel_indices, base_s);
    let idx_aligned = align_up(base_s, calc.idx_block());
    plan.push_field("grad_factor", base_s * align_up(base_a, calc.grad_block()));
    plan.push_field("loop_grad", loop_grad);
    plan.push_field("grad_per_row", base_a);
    plan.push_field("grad_per_row_tail", calc.per_core - (loop_grad - 1) * base_a);
    plan.push_field("loop_indices", loop_indices);
    plan.push_field("indices_factor", base_s);
    plan.push_field(
        "indices_factor_tail",
        calc.numel_indices - (loop_indices - 1) * base_s,
    );
    plan.push_field("sort_shared_buf", sort_tmp_size(idx_aligned, calc.idx_bytes));

    if attrs.scale_grad_by_freq {
        let (freq_a, freq_w) = solve_freq_cut(calc)?;
        let loop_grad_freq = ceil_div(calc.per_core, freq_a);
        let loop_w_freq = ceil_div(calc.num_weights, freq_w);
        plan.push_field("freq_base_a", freq_a);
        plan.push_field("freq_base_w", freq_w);
        plan.push_field("loop_grad_freq", loop_grad_freq);
        plan.push_field(
            "grad_per_row_tail_freq",
            calc.per_core - (loop_grad_freq - 1) * freq_a,
        );
        plan.push_field("loop_weights_freq", loop_w_freq);
        plan.push_field(
            "weights_tail_freq",
            calc.num_weights - (loop_w_freq - 1) * freq_w,
        );
    } else if calc.grad_bytes != 4 {
        let (cast_a, cast_w) = solve_cast_cut(calc)?;
        let cnt_a = ceil_div(calc.per_core, cast_a);
        let cnt_w = ceil_div(calc.num_weights, cast_w);
        plan.push_field("base_a_cast", cast_a);
        plan.push_field("base_w_cast", cast_w);
        plan.push_field("cnt_a_cast", cnt_a);
        plan.push_field("cnt_w_cast", cnt_w);
        plan.push_field("tail_a_cast", calc.per_core - (cnt_a - 1) * cast_a);
        plan.push_field("tail_w_cast", calc.num_weights - (cnt_w - 1) * cast_w);
    }

    Ok(plan)
}

fn push_common_fields(plan: &mut TilingPlan, calc: &Calc, attrs: &EmbeddingGradAttrs) {
    plan.push_field("num_weights", calc.num_weights);
    // Two's-complement image of the (possibly negative) padding index.
    plan.push_field("padding_idx", attrs.padding_idx as u64);
    plan.push_field("scale_grad_by_freq", attrs.scale_grad_by_freq as u64);
    plan.push_field("embedding_dim", calc.embedding_dim);
    plan.push_field("embedding_per_core", calc.per_core);
    plan.push_field("embedding_last_core", calc.last_core);
}

/// No cut -> cut S -> cut A&S at the cache-line width -> cut A&S at one
/// block. The first stage whose anchor probe fits wins; its S base is
/// then maximized by dichotomy.
fn solve_grad_cut(calc: &Calc) -> TilingResult<(u64, u64)> {
    if calc.ub_total(calc.per_core, calc.numel_indices) < calc.ub {
        return Ok((calc.per_core, calc.numel_indices));
    }

    for base_a in [calc.per_core, calc.min_base_a, B32_BLOCK_ELEMS] {
        let probe = if base_a == calc.per_core { PROBE_GROUP_ROWS } else { 1 };
        if calc.ub_total(base_a, probe) < calc.ub {
            let base_s = solve_max_batch(1, calc.numel_indices, calc.ub, |s| {
                calc.ub_total(base_a, s)
            })
            .expect("probe fit implies the dichotomy lower bound fits");
            return Ok((base_a, base_s));
        }
    }

    Err(TilingError::Infeasible(
        "no cut of the grad/index axes fits the UB budget".into(),
    ))
}

/// No cut -> cut W -> cut A&W, for the frequency pass.
fn solve_freq_cut(calc: &Calc) -> TilingResult<(u64, u64)> {
    if calc.ub_total_freq(calc.per_core, calc.num_weights) < calc.ub {
        return Ok((calc.per_core, calc.num_weights));
    }
    if calc.ub_total_freq(calc.per_core, 1) < calc.ub {
        let base_w = solve_max_batch(1, calc.num_weights, calc.ub, |w| {
            calc.ub_total_freq(calc.per_core, w)
        })
        .expect("single-weight probe fits");
        return Ok((calc.per_core, base_w));
    }
    if calc.ub_total_freq(calc.min_base_a.min(calc.per_core), 1) < calc.ub {
        let base_a = solve_max_batch(1, calc.per_core, calc.ub, |a| calc.ub_total_freq(a, 1))
            .expect("minimum column probe fits");
        return Ok((base_a, 1));
    }
    Err(TilingError::Infeasible(
        "frequency pass cannot fit the UB budget".into(),
    ))
}

/// No cut -> cut W -> cut A&W, for the cast-back pass.
fn solve_cast_cut(calc: &Calc) -> TilingResult<(u64, u64)> {
    if calc.ub_total_cast(calc.per_core, calc.num_weights) < calc.ub {
        return Ok((calc.per_core, calc.num_weights));
    }
    if calc.ub_total_cast(calc.per_core, 1) < calc.ub {
        let base_w = solve_max_batch(1, calc.num_weights, calc.ub, |w| {
            calc.ub_total_cast(calc.per_core, w)
        })
        .expect("single-weight probe fits");
        return Ok((calc.per_core, base_w));
    }
    if calc.ub_total_cast(calc.min_base_a.min(calc.per_core), 1) < calc.ub {
        let base_a = solve_max_batch(1, calc.per_core, calc.ub, |a| calc.ub_total_cast(a, 1))
            .expect("minimum column probe fits");
        return Ok((base_a, 1));
    }
    Err(TilingError::Infeasible(
        "cast-back pass cannot fit the UB budget".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::SYS_WORKSPACE_BYTES;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(64, 245760).unwrap()
    }

    fn attrs() -> EmbeddingGradAttrs {
        EmbeddingGradAttrs { num_weights: 1667, padding_idx: 4, scale_grad_by_freq: true }
    }

    #[test]
    fn bf16_int64_scale_fixture() {
        let plan = tile_embedding_grad(
            &[1024, 6000],
            &[512, 1, 2, 1, 1, 1],
            Dtype::Bf16,
            Dtype::I64,
            &attrs(),
            &platform(),
        )
        .unwrap();

        // int64 indices (800) + bf16 grad (1): full load fails for this
        // shape, so the general key survives.
        assert_eq!(plan.tiling_key(), 801);
        assert_eq!(plan.used_core_num(), 64);
        assert_eq!(plan.field("num_weights"), Some(1667));
        assert_eq!(plan.field("padding_idx"), Some(4));
        assert_eq!(plan.field("scale_grad_by_freq"), Some(1));
        assert_eq!(plan.field("embedding_dim"), Some(6000));

        // Embedding-axis coverage across cores.
        let per = plan.field("embedding_per_core").unwrap();
        let last = plan.field("embedding_last_core").unwrap();
        let blocks = plan.field("process_block").unwrap();
        assert_eq!(per * (blocks - 1) + last, 6000);

        // Index-axis coverage within a core.
        let s = plan.field("base_s").unwrap();
        let loops = plan.field("loop_indices").unwrap();
        let tail = plan.field("indices_factor_tail").unwrap();
        assert_eq!(s * (loops - 1) + tail, 1024);

        // Frequency sub-tiling present.
        assert!(plan.field("freq_base_w").is_some());

        // Non-full-load: workspace carries counters + f32 table.
        let expect_ws = 1667 * 8 + 1667 * 6000 * 4;
        assert_eq!(plan.workspace_bytes(), SYS_WORKSPACE_BYTES + expect_ws);
    }

    #[test]
    fn int32_vs_int64_key_base() {
        let a = EmbeddingGradAttrs { num_weights: 100, padding_idx: -1, scale_grad_by_freq: false };
        let p = platform();
        let k64 = tile_embedding_grad(&[4096, 8000], &[4096], Dtype::F32, Dtype::I64, &a, &p)
            .unwrap()
            .tiling_key();
        let k32 = tile_embedding_grad(&[4096, 8000], &[4096], Dtype::F32, Dtype::I32, &a, &p)
            .unwrap()
            .tiling_key();
        assert_eq!(k64, 804);
        assert_eq!(k32, 404);
    }

    #[test]
    fn small_indices_take_full_load() {
        // 64 indices into a narrow table: the resident layout fits.
        let a = EmbeddingGradAttrs { num_weights: 50, padding_idx: -1, scale_grad_by_freq: false };
        let plan =
            tile_embedding_grad(&[64, 256], &[64], Dtype::F32, Dtype::I32, &a, &platform())
                .unwrap();
        assert_eq!(plan.tiling_key(), FULL_LOAD_BASE_KEY + 4);
        assert_eq!(plan.field("loop_indices"), Some(1));
        // Full load needs no accumulation workspace.
        assert_eq!(plan.workspace_bytes(), SYS_WORKSPACE_BYTES);
    }

    #[test]
    fn cast_subtiling_for_non_f32_without_scale() {
        let a = EmbeddingGradAttrs { num_weights: 3000, padding_idx: 0, scale_grad_by_freq: false };
        let plan =
            tile_embedding_grad(&[8192, 4096], &[8192], Dtype::F16, Dtype::I32, &a, &platform())
                .unwrap();
        assert_eq!(plan.tiling_key(), 402);
        assert!(plan.field("base_a_cast").is_some());
        assert!(plan.field("freq_base_w").is_none());
    }

    #[test]
    fn mismatched_counts_rejected() {
        let err = tile_embedding_grad(
            &[1024, 6000],
            &[1000],
            Dtype::F32,
            Dtype::I32,
            &attrs(),
            &platform(),
        )
        .unwrap_err();
        assert!(matches!(err, TilingError::ShapeMismatch(_)));
    }

    #[test]
    fn zero_indices_degenerate_plan() {
        let a = EmbeddingGradAttrs { num_weights: 10, padding_idx: -1, scale_grad_by_freq: false };
        let plan =
            tile_embedding_grad(&[0, 16], &[0], Dtype::F32, Dtype::I32, &a, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
        assert_eq!(plan.used_core_num(), 1);
    }

    #[test]
    fn bad_attrs_rejected() {
        let a = EmbeddingGradAttrs { num_weights: 0, padding_idx: -1, scale_grad_by_freq: false };
        assert!(matches!(
            tile_embedding_grad(&[8, 8], &[8], Dtype::F32, Dtype::I32, &a, &platform()),
            Err(TilingError::InvalidAttr { name: "num_weights", .. })
        ));
    }
}
