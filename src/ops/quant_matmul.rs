//! Weight-quantized matmul tiling.
//!
//! `x (M, K)` in half precision against an int8 weight table `(K, N)`
//! with per-channel scales, accumulating in f32 on the cube engine. Cores
//! split the fractal grid of the output; inside a core the base block is
//! sized from the L0C accumulator budget and the K axis from the operand
//! panel buffers.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{ceil_div, factorize_grid};
use crate::ops::cube::{base_k_count, base_mn_counts, fractal_bytes, fractal_count, FRACTAL};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::with_system_reserve;

const QMM_KEY_BASE: u64 = 900;
const BIAS_KEY: u64 = 1;

/// Accumulator fractals reserved per base block: two ping-pong slots,
/// three when a bias vector also stages through L0C.
const ACCUM_SLOTS: u64 = 2;
const ACCUM_SLOTS_BIAS: u64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct QuantMatmulAttrs {
    pub has_bias: bool,
}

/// Compute the tiling plan for the weight-quantized matmul kernel.
pub fn tile_quant_matmul(
    m: u64,
    k: u64,
    n: u64,
    act_dtype: Dtype,
    weight_dtype: Dtype,
    scale_len: u64,
    attrs: &QuantMatmulAttrs,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    if !matches!(act_dtype, Dtype::F16 | Dtype::Bf16) {
        return Err(TilingError::UnsupportedDtype { dtype: act_dtype, operand: "x" });
    }
    if weight_dtype != Dtype::I8 {
        return Err(TilingError::UnsupportedDtype { dtype: weight_dtype, operand: "weight" });
    }
    if k == 0 || n == 0 {
        return Err(TilingError::ShapeMismatch(format!(
            "weight shape ({k}, {n}) must be non-empty"
        )));
    }
    if scale_len != n {
        return Err(TilingError::ShapeMismatch(format!(
            "per-channel scale length {scale_len} != output channels {n}"
        )));
    }

    if m == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("m", 0);
        plan.push_field("n", n);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }

    let cores = platform.core_num() as u64;
    let m_frac = fractal_count(m);
    let n_frac = fractal_count(n);
    let k_frac = fractal_count(k);

    // Core split over the output fractal grid.
    let (m_tiles, n_tiles) = factorize_grid(cores, m_frac, n_frac, false);
    let single_m = ceil_div(m_frac, m_tiles);
    let single_n = ceil_div(n_frac, n_tiles);
    let m_tiles = ceil_div(m_frac, single_m);
    let n_tiles = ceil_div(n_frac, single_n);
    let used = m_tiles * n_tiles;

    // Base block from the L0C accumulator budget (f32 fractals).
    let slots = if attrs.has_bias { ACCUM_SLOTS_BIAS } else { ACCUM_SLOTS };
    let l0c_budget = (platform.l0c_size() / slots / fractal_bytes(4)).max(1);
    let (base_m_cnt, base_n_cnt) = base_mn_counts(single_m, single_n, l0c_budget);

    // K tiles from the operand panel buffers: half-precision activations
    // in L0A, int8 weights in L0B.
    let l0a_budget = (platform.l0a_size() / fractal_bytes(act_dtype.size_bytes())).max(1);
    let l0b_budget = (platform.l0b_size() / fractal_bytes(1)).max(1);
    let base_k_cnt = base_k_count(
        single_m, single_n, k_frac, base_m_cnt, base_n_cnt, l0a_budget, l0b_budget,
    );

    let key = QMM_KEY_BASE + act_dtype.key_code() * 10 + if attrs.has_bias { BIAS_KEY } else { 0 };
    let mut plan = TilingPlan::new(used as u32, key);
    plan.push_field("m", m);
    plan.push_field("k", k);
    plan.push_field("n", n);
    plan.push_field("m_tiles", m_tiles);
    plan.push_field("n_tiles", n_tiles);
    plan.push_field("single_core_m", single_m * FRACTAL);
    plan.push_field("single_core_n", single_n * FRACTAL);
    plan.push_field("tail_core_m", (m_frac - single_m * (m_tiles - 1)) * FRACTAL);
    plan.push_field("tail_core_n", (n_frac - single_n * (n_tiles - 1)) * FRACTAL);
    plan.push_field("base_m", ceil_div(single_m, base_m_cnt) * FRACTAL);
    plan.push_field("base_n", ceil_div(single_n, base_n_cnt) * FRACTAL);
    plan.push_field("base_k", ceil_div(k_frac, base_k_cnt) * FRACTAL);
    plan.push_field("base_m_loops", base_m_cnt);
    plan.push_field("base_n_loops", base_n_cnt);
    plan.push_field("base_k_loops", base_k_cnt);
    plan.push_field("has_bias", attrs.has_bias as u64);
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
    fn decode_shape_plan() {
        // Llama-style decode: M=1 token, K=4096, N=4096.
        let attrs = QuantMatmulAttrs { has_bias: false };
        let plan = tile_quant_matmul(
            1, 4096, 4096, Dtype::F16, Dtype::I8, 4096, &attrs, &platform(),
        )
        .unwrap();
        assert_eq!(plan.tiling_key(), 900 + 40);
        assert!(plan.used_core_num() >= 1 && plan.used_core_num() <= 64);
        // M is a single fractal: no M splitting possible.
        assert_eq!(plan.field("m_tiles"), Some(1));
    }

    #[test]
    fn base_block_fits_l0c() {
        let attrs = QuantMatmulAttrs { has_bias: true };
        let p = platform();
        let plan =
            tile_quant_matmul(8192, 8192, 8192, Dtype::Bf16, Dtype::I8, 8192, &attrs, &p).unwrap();
        assert_eq!(plan.tiling_key(), 900 + 60 + 1);

        let base_m = plan.field("base_m").unwrap();
        let base_n = plan.field("base_n").unwrap();
        // f32 accumulator, three slots with bias.
        assert!(base_m * base_n * 4 * 3 <= p.l0c_size());
    }

    #[test]
    fn fractal_coverage() {
        let attrs = QuantMatmulAttrs { has_bias: false };
        let plan = tile_quant_matmul(
            1000, 512, 3000, Dtype::F16, Dtype::I8, 3000, &attrs, &platform(),
        )
        .unwrap();
        let single_m = plan.field("single_core_m").unwrap();
        let tail_m = plan.field("tail_core_m").unwrap();
        let m_tiles = plan.field("m_tiles").unwrap();
        // Coverage holds in fractal units (1000 -> 63 fractals).
        assert_eq!(single_m * (m_tiles - 1) + tail_m, 63 * 16);
        assert!(tail_m >= 16 && tail_m <= single_m);
    }

    #[test]
    fn scale_length_validated() {
        let attrs = QuantMatmulAttrs { has_bias: false };
        assert!(matches!(
            tile_quant_matmul(16, 64, 128, Dtype::F16, Dtype::I8, 64, &attrs, &platform()),
            Err(TilingError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn empty_m_degenerate() {
        let attrs = QuantMatmulAttrs { has_bias: false };
        let plan =
            tile_quant_matmul(0, 64, 128, Dtype::F16, Dtype::I8, 128, &attrs, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
    }

    #[test]
    fn fp32_activations_rejected() {
        let attrs = QuantMatmulAttrs { has_bias: false };
        assert!(matches!(
            tile_quant_matmul(16, 64, 128, Dtype::F32, Dtype::I8, 128, &attrs, &platform()),
            Err(TilingError::UnsupportedDtype { operand: "x", .. })
        ));
    }
}
