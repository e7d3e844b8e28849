//! The strategy family and its selector.
//!
//! Each concrete strategy bundles a feasibility predicate with its sizing
//! math and a base tiling key. The selector walks a fixed, priority-ordered
//! list and the first capable strategy produces the plan; lists are built
//! with an always-capable terminal fallback so a well-formed shape can
//! never end up planless. Degenerate shapes (zero rows or zero-width rows)
//! never reach a strategy; they take the dedicated zero-work plan.

mod fallback;
mod resident;
mod split;

pub use fallback::{RowFallbackStrategy, FALLBACK_KEY};
pub use resident::{OutputResidentStrategy, RESIDENT_KEY};
pub use split::{
    SplitStrategy, DIRECT_KEY, SORT_DETERMINISTIC_KEY, SORT_KEY, SORT_SMALL_ROW_KEY,
};

use crate::error::TilingResult;
use crate::math::ceil_div;
use crate::plan::TilingPlan;
use crate::platform::PlatformInfo;
use crate::shape::ShapeModel;

/// Dispatch key of the degenerate zero-work plan.
pub const ZERO_SHAPE_KEY: u64 = 10;

/// Smallest per-core clear granule in bytes for the zero-work output
/// initialization.
const MIN_CLEAR_BLOCK_BYTES: u64 = 1024;

/// One tiling strategy: feasibility test plus sizing math.
///
/// Implementations are stateless; `do_tiling` is a pure function of the
/// shape and platform. `do_tiling` may assume `is_capable` returned true
/// for the same inputs.
pub trait TilingStrategy {
    fn name(&self) -> &'static str;

    /// Whether this strategy's buffer arithmetic closes for the shape.
    fn is_capable(&self, shape: &ShapeModel, platform: &PlatformInfo) -> bool;

    /// Compute the plan. Called only after `is_capable` succeeded.
    fn do_tiling(&self, shape: &ShapeModel, platform: &PlatformInfo) -> TilingResult<TilingPlan>;
}

/// Priority-ordered strategy list; first capable wins.
pub struct StrategySelector {
    strategies: Vec<Box<dyn TilingStrategy>>,
}

impl StrategySelector {
    /// Build from an explicit list. The last entry must be capable of any
    /// non-degenerate shape; `select` panics if the guarantee is broken.
    pub fn new(strategies: Vec<Box<dyn TilingStrategy>>) -> Self {
        assert!(!strategies.is_empty(), "empty strategy list");
        StrategySelector { strategies }
    }

    /// The standard ladder for index-driven reductions: output-resident,
    /// then the sort/direct split family, then the row fallback.
    pub fn reduction_default() -> Self {
        StrategySelector::new(vec![
            Box::new(OutputResidentStrategy),
            Box::new(SplitStrategy),
            Box::new(RowFallbackStrategy),
        ])
    }

    /// Pick the first capable strategy and run its tiling.
    pub fn select(
        &self,
        shape: &ShapeModel,
        platform: &PlatformInfo,
    ) -> TilingResult<TilingPlan> {
        if shape.is_degenerate() {
            log::debug!(
                "degenerate shape (input_outer={}, inner={}), zero-work plan",
                shape.input_outer,
                shape.inner
            );
            return Ok(zero_shape_plan(shape, platform));
        }

        for strategy in &self.strategies {
            if strategy.is_capable(shape, platform) {
                log::debug!("selected strategy {}", strategy.name());
                return strategy.do_tiling(shape, platform);
            }
            log::debug!("strategy {} not capable, trying next", strategy.name());
        }

        // The terminal fallback accepts every non-degenerate shape, so
        // reaching this point means the list was assembled wrong.
        panic!("strategy list has no capable terminal fallback");
    }
}

/// Plan for shapes with no reduction work: clear the output, do nothing
/// else. Output elements are split across cores at a minimum granule so
/// tiny outputs do not fan out to every core.
pub fn zero_shape_plan(shape: &ShapeModel, platform: &PlatformInfo) -> TilingPlan {
    let out_elems = shape.output_elements();
    let clear_granule = MIN_CLEAR_BLOCK_BYTES / shape.dtype.size_bytes();

    let (used, clear_block, clear_tail) = if out_elems == 0 {
        (1, 0, 0)
    } else {
        let per_core = ceil_div(out_elems, platform.core_num() as u64).max(clear_granule);
        let used = ceil_div(out_elems, per_core);
        let tail = out_elems - per_core * (used - 1);
        (used as u32, per_core, tail)
    };

    let mut plan = TilingPlan::new(used.max(1), ZERO_SHAPE_KEY);
    plan.push_field("clear_block", clear_block);
    plan.push_field("clear_tail", clear_tail);
    plan.push_field("reduce_rows", 0);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;
    use crate::error::TilingError;

    fn platform() -> PlatformInfo {
        PlatformInfo::new(64, 245760).unwrap()
    }

    #[test]
    fn degenerate_routes_to_zero_plan() {
        let selector = StrategySelector::reduction_default();
        let shape = ShapeModel::new(0, 100, 64, Dtype::F32, Dtype::I32).unwrap();
        let plan = selector.select(&shape, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
        assert!(plan.used_core_num() >= 1);
        assert_eq!(plan.field("reduce_rows"), Some(0));
    }

    #[test]
    fn zero_inner_also_degenerate() {
        let selector = StrategySelector::reduction_default();
        let shape = ShapeModel::new(128, 100, 0, Dtype::F32, Dtype::I32).unwrap();
        let plan = selector.select(&shape, &platform()).unwrap();
        assert_eq!(plan.tiling_key(), ZERO_SHAPE_KEY);
        assert_eq!(plan.used_core_num(), 1);
    }

    #[test]
    fn zero_plan_core_formula() {
        // 20000 x 512 f32 output: clear granule 256 elems, 64 cores.
        let shape = ShapeModel::new(0, 20000, 512, Dtype::F32, Dtype::I32).unwrap();
        let plan = zero_shape_plan(&shape, &platform());
        let out = 20000u64 * 512;
        let per_core = ceil_div(out, 64).max(256);
        assert_eq!(plan.used_core_num() as u64, ceil_div(out, per_core));
    }

    struct NeverCapable;
    impl TilingStrategy for NeverCapable {
        fn name(&self) -> &'static str {
            "never"
        }
        fn is_capable(&self, _: &ShapeModel, _: &PlatformInfo) -> bool {
            false
        }
        fn do_tiling(&self, _: &ShapeModel, _: &PlatformInfo) -> TilingResult<TilingPlan> {
            Err(TilingError::Infeasible("unreachable".into()))
        }
    }

    #[test]
    #[should_panic(expected = "no capable terminal fallback")]
    fn misconfigured_list_panics() {
        let selector = StrategySelector::new(vec![Box::new(NeverCapable)]);
        let shape = ShapeModel::new(16, 16, 16, Dtype::F32, Dtype::I32).unwrap();
        let _ = selector.select(&shape, &platform());
    }

    #[test]
    fn first_capable_wins_and_order_is_monotonic() {
        let selector = StrategySelector::reduction_default();
        // Small shape: resident-capable.
        let shape = ShapeModel::new(64, 8, 16, Dtype::F32, Dtype::I32).unwrap();
        let plan = selector.select(&shape, &platform()).unwrap();
        assert_eq!(plan.tiling_key() / 1000, RESIDENT_KEY / 1000);

        // Same shape through a list without the resident strategy must
        // land on a strictly later strategy, never fail.
        let demoted = StrategySelector::new(vec![
            Box::new(SplitStrategy),
            Box::new(RowFallbackStrategy),
        ]);
        let plan2 = demoted.select(&shape, &platform()).unwrap();
        assert_ne!(plan2.tiling_key() / 1000, RESIDENT_KEY / 1000);
    }
}
