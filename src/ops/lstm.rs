//! Bidirectional LSTM tiling.
//!
//! Each direction runs two matmul streams per step (input-hidden and
//! hidden-hidden) feeding the fused gate vector pass. The matmul side
//! reuses the cube fractal blocking; the two streams share cores in two
//! groups, splitting whichever of M/N is larger. The vector side spreads
//! the `batch x hidden` gate grid over all cores in repeat units.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{align_up, ceil_div};
use crate::ops::cube::{base_k_count, base_mn_counts, fractal_bytes, FRACTAL};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::with_system_reserve;

/// fp16 kernel, one direction.
const LSTM_KEY_FP16: u64 = 700;
/// fp16 kernel, both directions.
const LSTM_KEY_FP16_BIDIR: u64 = 710;

/// The IH and HH matmul streams run as two core groups.
const MM_GROUPS: u64 = 2;

/// Gates per LSTM cell.
const GATE_NUM: u64 = 4;

/// f16 elements per vector repeat.
const ELEMS_PER_REPEAT: u64 = 128;

/// Share of UB granted to the gate-fusion vector buffers.
const VEC_UB_SHARE: u64 = 4;

/// Accumulator slots in L0C: gate ping-pong plus the bias stage.
const ACCUM_SLOTS: u64 = 2;
const ACCUM_SLOTS_BIAS: u64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct LstmAttrs {
    pub bidirectional: bool,
    pub has_bias: bool,
}

/// Compute the tiling plan for the fused LSTM layer kernel.
pub fn tile_lstm(
    batch: u64,
    input_size: u64,
    hidden_size: u64,
    time_steps: u64,
    dtype: Dtype,
    attrs: &LstmAttrs,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    if dtype != Dtype::F16 {
        return Err(TilingError::UnsupportedDtype { dtype, operand: "x" });
    }
    if input_size == 0 || hidden_size == 0 {
        return Err(TilingError::ShapeMismatch(format!(
            "input_size {input_size} and hidden_size {hidden_size} must be non-zero"
        )));
    }

    if batch == 0 || time_steps == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("batch", batch);
        plan.push_field("time_steps", time_steps);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }

    let cores = platform.core_num() as u64;
    let batch_al = align_up(batch, FRACTAL);
    let input_al = align_up(input_size, FRACTAL);
    let hidden_al = align_up(hidden_size, FRACTAL);

    // ── Matmul streams ───────────────────────────────────────────────
    let m_frac = batch_al / FRACTAL;
    let n_frac = hidden_al / FRACTAL;
    let ih_k_frac = input_al / FRACTAL;
    let hh_k_frac = hidden_al / FRACTAL;

    // Two core groups: halve the larger of M/N per group.
    let (single_m, single_n) = if m_frac >= n_frac {
        (ceil_div(m_frac, MM_GROUPS), n_frac)
    } else {
        (m_frac, ceil_div(n_frac, MM_GROUPS))
    };

    let slots = if attrs.has_bias { ACCUM_SLOTS_BIAS } else { ACCUM_SLOTS };
    let l0c_budget = (platform.l0c_size() / slots / fractal_bytes(4)).max(1);
    let (base_m_cnt, base_n_cnt) = base_mn_counts(single_m, single_n, l0c_budget);

    let l0a_budget = (platform.l0a_size() / fractal_bytes(2)).max(1);
    let l0b_budget = (platform.l0b_size() / fractal_bytes(2)).max(1);
    let ih_k_cnt = base_k_count(
        single_m, single_n, ih_k_frac, base_m_cnt, base_n_cnt, l0a_budget, l0b_budget,
    );
    let hh_k_cnt = base_k_count(
        single_m, single_n, hh_k_frac, base_m_cnt, base_n_cnt, l0a_budget, l0b_budget,
    );

    // ── Gate-fusion vector pass ──────────────────────────────────────
    let vec_budget = platform.usable_ub() / VEC_UB_SHARE;
    let vec_base_repeat_max = ceil_div(vec_budget / 4, ELEMS_PER_REPEAT).max(1);
    let total_repeat = ceil_div(batch_al * hidden_al, ELEMS_PER_REPEAT);
    let step_repeat_max = cores * vec_base_repeat_max;

    let vec_outer = ceil_div(total_repeat, step_repeat_max);
    let vec_base_repeat = ceil_div(ceil_div(total_repeat, vec_outer), cores).max(1);
    let step_repeat = vec_base_repeat * cores;
    let vec_loop = total_repeat / step_repeat;
    let tail_repeat = total_repeat % step_repeat;

    let key = if attrs.bidirectional { LSTM_KEY_FP16_BIDIR } else { LSTM_KEY_FP16 };
    let mut plan = TilingPlan::new(cores as u32, key);
    plan.push_field("batch", batch);
    plan.push_field("batch_aligned", batch_al);
    plan.push_field("input_aligned", input_al);
    plan.push_field("hidden_aligned", hidden_al);
    plan.push_field("time_steps", time_steps);
    plan.push_field("gate_num", GATE_NUM);
    plan.push_field("single_core_m", single_m * FRACTAL);
    plan.push_field("single_core_n", single_n * FRACTAL);
    plan.push_field("base_m", ceil_div(single_m, base_m_cnt) * FRACTAL);
    plan.push_field("base_n", ceil_div(single_n, base_n_cnt) * FRACTAL);
    plan.push_field("ih_base_k", ceil_div(ih_k_frac, ih_k_cnt) * FRACTAL);
    plan.push_field("hh_base_k", ceil_div(hh_k_frac, hh_k_cnt) * FRACTAL);
    plan.push_field("vec_base_elems", vec_base_repeat * ELEMS_PER_REPEAT);
    plan.push_field("vec_loop", vec_loop);
    plan.push_field("vec_tail_elems", tail_repeat / cores * ELEMS_PER_REPEAT);
    plan.push_field("vec_tail_cores", tail_repeat % cores);
    plan.push_field("has_bias", attrs.has_bias as u64);

    // Per-direction gate state in f32, resident across the step loop.
    let directions = if attrs.bidirectional { 2 } else { 1 };
    let gate_ws = directions * GATE_NUM * batch_al * hidden_al * 4;
    plan.set_workspace_bytes(with_system_reserve(gate_ws));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(64, 245760).unwrap()
    }

    #[test]
    fn bidirectional_fp16_key() {
        let attrs = LstmAttrs { bidirectional: true, has_bias: true };
        let plan =
            tile_lstm(32, 512, 1024, 128, Dtype::F16, &attrs, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), LSTM_KEY_FP16_BIDIR);
        assert_eq!(plan.field("gate_num"), Some(4));
        assert_eq!(plan.field("hidden_aligned"), Some(1024));
    }

    #[test]
    fn fp32_rejected() {
        let attrs = LstmAttrs { bidirectional: false, has_bias: false };
        assert!(matches!(
            tile_lstm(32, 512, 1024, 128, Dtype::F32, &attrs, &platform()),
            Err(TilingError::UnsupportedDtype { .. })
        ));
    }

    #[test]
    fn larger_axis_is_split_across_groups() {
        let attrs = LstmAttrs { bidirectional: false, has_bias: false };
        // N (hidden 2048 -> 128 fractals) dominates M (batch 16 -> 1).
        let plan = tile_lstm(16, 256, 2048, 8, Dtype::F16, &attrs, &platform()).unwrap();
        assert_eq!(plan.field("single_core_n"), Some(1024));
        assert_eq!(plan.field("single_core_m"), Some(16));
    }

    #[test]
    fn base_block_fits_l0c() {
        let p = platform();
        let attrs = LstmAttrs { bidirectional: true, has_bias: false };
        let plan = tile_lstm(1024, 1024, 1024, 16, Dtype::F16, &attrs, &p).unwrap();
        let base_m = plan.field("base_m").unwrap();
        let base_n = plan.field("base_n").unwrap();
        assert!(base_m * base_n * 4 * 2 <= p.l0c_size());
    }

    #[test]
    fn vector_pass_covers_gate_grid() {
        let p = platform();
        let attrs = LstmAttrs { bidirectional: false, has_bias: false };
        let plan = tile_lstm(64, 128, 768, 4, Dtype::F16, &attrs, &p).unwrap();

        let total = 64u64 * 768; // batch_al * hidden_al
        let total_repeat = ceil_div(total, 128);
        let base = plan.field("vec_base_elems").unwrap() / 128;
        let loops = plan.field("vec_loop").unwrap();
        let tail = plan.field("vec_tail_elems").unwrap() / 128 * 64
            + plan.field("vec_tail_cores").unwrap();
        assert_eq!(loops * base * 64 + tail, total_repeat);
    }

    #[test]
    fn zero_batch_degenerate() {
        let attrs = LstmAttrs { bidirectional: true, has_bias: true };
        let plan = tile_lstm(0, 64, 64, 8, Dtype::F16, &attrs, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
        assert_eq!(plan.used_core_num(), 1);
    }

    #[test]
    fn workspace_scales_with_directions() {
        let p = platform();
        let uni = LstmAttrs { bidirectional: false, has_bias: false };
        let bi = LstmAttrs { bidirectional: true, has_bias: false };
        let w1 = tile_lstm(32, 64, 64, 8, Dtype::F16, &uni, &p).unwrap().workspace_bytes();
        let w2 = tile_lstm(32, 64, 64, 8, Dtype::F16, &bi, &p).unwrap().workspace_bytes();
        assert_eq!(w2 - w1, 4 * 32 * 64 * 4);
    }
}
