//! Quantized-GELU tiling.
//!
//! Elementwise over the fused leading axes with an int8 quantization
//! epilogue on the last axis. Static quantization takes caller-provided
//! scale/offset; dynamic quantization derives a scale per row, which
//! pins a whole row in UB at once. The lane counts below are the number
//! of coexisting f32-widened element lanes each mode keeps live,
//! double buffering included.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};
use crate::math::{align_down, align_up, ceil_div};
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::{check_rank, element_count};
use crate::strategy::ZERO_SHAPE_KEY;
use crate::workspace::with_system_reserve;

/// Coexisting f32 lanes of the static-quant pipeline.
const STATIC_QUANT_LANES: u64 = 11;
/// Coexisting f32 lanes of the dynamic-quant pipeline.
const DYNAMIC_QUANT_LANES: u64 = 13;

const GELU_QUANT_KEY_BASE: u64 = 300;
const DYNAMIC_KEY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeluApproximate {
    None,
    Tanh,
}

impl GeluApproximate {
    pub fn from_attr(value: &str) -> TilingResult<Self> {
        match value {
            "none" => Ok(GeluApproximate::None),
            "tanh" => Ok(GeluApproximate::Tanh),
            other => Err(TilingError::InvalidAttr {
                name: "approximate",
                reason: format!("expected \"none\" or \"tanh\", got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantMode {
    Static,
    Dynamic,
}

impl QuantMode {
    pub fn from_attr(value: &str) -> TilingResult<Self> {
        match value {
            "static" => Ok(QuantMode::Static),
            "dynamic" => Ok(QuantMode::Dynamic),
            other => Err(TilingError::InvalidAttr {
                name: "quant_mode",
                reason: format!("expected \"static\" or \"dynamic\", got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeluQuantAttrs {
    pub approximate: GeluApproximate,
    pub quant_mode: QuantMode,
    pub dst_dtype: Dtype,
}

/// Compute the tiling plan for the fused GELU + quantize kernel.
///
/// `scale_len` is the element count of the input-scale tensor: required
/// for static quantization (scalar or one per last-axis element), absent
/// for dynamic.
pub fn tile_gelu_quant(
    x_dims: &[i64],
    dtype: Dtype,
    scale_len: Option<u64>,
    attrs: &GeluQuantAttrs,
    platform: &PlatformInfo,
) -> TilingResult<TilingPlan> {
    check_rank(x_dims.len())?;
    if !dtype.is_float() {
        return Err(TilingError::UnsupportedDtype { dtype, operand: "x" });
    }
    if attrs.dst_dtype != Dtype::I8 {
        return Err(TilingError::UnsupportedDtype {
            dtype: attrs.dst_dtype,
            operand: "quantized output",
        });
    }
    if attrs.quant_mode == QuantMode::Dynamic && x_dims.len() < 2 {
        return Err(TilingError::InvalidAttr {
            name: "quant_mode",
            reason: "dynamic quantization needs rank >= 2".into(),
        });
    }

    let rows = element_count(&x_dims[..x_dims.len() - 1])?;
    let inner = element_count(&x_dims[x_dims.len() - 1..])?;

    match (attrs.quant_mode, scale_len) {
        (QuantMode::Static, None) => {
            return Err(TilingError::InvalidAttr {
                name: "input_scale",
                reason: "required for static quantization".into(),
            })
        }
        (QuantMode::Static, Some(len)) if len != 1 && len != inner => {
            return Err(TilingError::ShapeMismatch(format!(
                "input_scale length {len} must be 1 or the last-axis size {inner}"
            )));
        }
        _ => {}
    }

    if rows == 0 || inner == 0 {
        let mut plan = TilingPlan::new(1, ZERO_SHAPE_KEY);
        plan.push_field("rows", rows);
        plan.push_field("inner", inner);
        plan.set_workspace_bytes(with_system_reserve(0));
        return Ok(plan);
    }

    let cores = platform.core_num() as u64;
    let ub = platform.usable_ub();
    let lanes = match attrs.quant_mode {
        QuantMode::Static => STATIC_QUANT_LANES,
        QuantMode::Dynamic => DYNAMIC_QUANT_LANES,
    };

    // Core split over fused rows.
    let block_rows = ceil_div(rows, cores);
    let used = ceil_div(rows, block_rows);
    let tail_rows = rows - block_rows * (used - 1);

    // UB fit: all lanes are f32-widened regardless of the input dtype.
    let f32_block = platform.block_align() / 4;
    let inner_aligned = align_up(inner, f32_block);
    let row_cost = inner_aligned * 4 * lanes;

    let (ub_rows, ub_cols, col_loops) = if row_cost <= ub {
        ((ub / row_cost).clamp(1, block_rows), inner, 1)
    } else if attrs.quant_mode == QuantMode::Dynamic {
        // The row max/sum for the dynamic scale needs the full row.
        return Err(TilingError::Infeasible(format!(
            "dynamic quantization row of {inner} elements exceeds the UB budget"
        )));
    } else {
        let cols = align_down(ub / (4 * lanes), f32_block).max(1);
        (1, cols, ceil_div(inner, cols))
    };

    let dynamic = attrs.quant_mode == QuantMode::Dynamic;
    let key = GELU_QUANT_KEY_BASE + if dynamic { DYNAMIC_KEY } else { 0 } + dtype.key_code();
    let mut plan = TilingPlan::new(used as u32, key);
    plan.push_field("rows", rows);
    plan.push_field("inner", inner);
    plan.push_field("block_rows", block_rows);
    plan.push_field("tail_rows", tail_rows);
    plan.push_field("ub_rows", ub_rows);
    plan.push_field("ub_cols", ub_cols);
    plan.push_field("row_loops", ceil_div(block_rows, ub_rows));
    plan.push_field("col_loops", col_loops);
    plan.push_field("approximate_tanh", (attrs.approximate == GeluApproximate::Tanh) as u64);
    plan.push_field("quant_dynamic", dynamic as u64);
    plan.push_field("scale_is_scalar", matches!(scale_len, Some(1)) as u64);
    plan.set_workspace_bytes(with_system_reserve(0));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(64, 245760).unwrap()
    }

    fn attrs(mode: QuantMode) -> GeluQuantAttrs {
        GeluQuantAttrs {
            approximate: GeluApproximate::Tanh,
            quant_mode: mode,
            dst_dtype: Dtype::I8,
        }
    }

    #[test]
    fn static_mode_row_batch() {
        let plan = tile_gelu_quant(
            &[32, 128, 1024],
            Dtype::F16,
            Some(1024),
            &attrs(QuantMode::Static),
            &platform(),
        )
        .unwrap();
        assert_eq!(plan.tiling_key(), 300 + Dtype::F16.key_code());
        assert_eq!(plan.field("rows"), Some(32 * 128));

        // Lane budget holds.
        let rows = plan.field("ub_rows").unwrap();
        assert!(rows * 1024 * 4 * STATIC_QUANT_LANES <= platform().usable_ub());
        assert!(rows >= 1);
    }

    #[test]
    fn dynamic_mode_key_and_row_residency() {
        let plan = tile_gelu_quant(
            &[256, 2048],
            Dtype::Bf16,
            None,
            &attrs(QuantMode::Dynamic),
            &platform(),
        )
        .unwrap();
        assert_eq!(plan.tiling_key(), 300 + 10 + Dtype::Bf16.key_code());
        assert_eq!(plan.field("col_loops"), Some(1));
    }

    #[test]
    fn dynamic_mode_rejects_oversized_rows() {
        let err = tile_gelu_quant(
            &[4, 1_000_000],
            Dtype::F32,
            None,
            &attrs(QuantMode::Dynamic),
            &platform(),
        )
        .unwrap_err();
        assert!(matches!(err, TilingError::Infeasible(_)));
    }

    #[test]
    fn static_mode_splits_oversized_rows() {
        let plan = tile_gelu_quant(
            &[4, 1_000_000],
            Dtype::F32,
            Some(1),
            &attrs(QuantMode::Static),
            &platform(),
        )
        .unwrap();
        assert_eq!(plan.field("ub_rows"), Some(1));
        let cols = plan.field("ub_cols").unwrap();
        let loops = plan.field("col_loops").unwrap();
        assert!(cols * loops >= 1_000_000);
    }

    #[test]
    fn attr_parsing() {
        assert_eq!(GeluApproximate::from_attr("tanh").unwrap(), GeluApproximate::Tanh);
        assert!(GeluApproximate::from_attr("fast").is_err());
        assert_eq!(QuantMode::from_attr("static").unwrap(), QuantMode::Static);
        assert!(QuantMode::from_attr("per-token").is_err());
    }

    #[test]
    fn static_without_scale_rejected() {
        assert!(matches!(
            tile_gelu_quant(&[8, 64], Dtype::F32, None, &attrs(QuantMode::Static), &platform()),
            Err(TilingError::InvalidAttr { name: "input_scale", .. })
        ));
    }

    #[test]
    fn dynamic_rank_one_rejected() {
        assert!(tile_gelu_quant(&[64], Dtype::F32, None, &attrs(QuantMode::Dynamic), &platform())
            .is_err());
    }

    #[test]
    fn zero_rows_degenerate() {
        let plan = tile_gelu_quant(
            &[0, 64],
            Dtype::F32,
            Some(1),
            &attrs(QuantMode::Static),
            &platform(),
        )
        .unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
    }
}
