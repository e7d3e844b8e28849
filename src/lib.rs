//! npu-tiling: host-side tiling decisions for NPU operator kernels.
//!
//! For each supported operator this crate turns resolved tensor shapes,
//! dtypes and attributes plus the platform facts into a [`TilingPlan`]:
//! how many cores to launch, how every axis splits into UB-sized blocks,
//! and which kernel variant the dispatcher should run.
//!
//! - **Pure decisions**: tiling is a deterministic function of
//!   ([`ShapeModel`], [`PlatformInfo`]); no I/O, no globals.
//! - **Strategy ladder**: specialized strategies first, an always-capable
//!   fallback last, so well-formed shapes always get a plan.
//! - **Budget discipline**: every block size is solved against the UB
//!   byte budget, double buffering included, and aligned to the DMA
//!   transfer granule.
//!
//! # Quick start
//!
//! ```
//! use npu_tiling::{Dtype, PlatformInfo};
//! use npu_tiling::ops::segment_reduce::{tile_segment_reduce, ReduceKind};
//!
//! let platform = PlatformInfo::new(64, 245760).unwrap();
//! let plan = tile_segment_reduce(
//!     &[20000, 512], 20000, ReduceKind::Sum,
//!     Dtype::F32, Dtype::I32, false, &platform,
//! ).unwrap();
//! assert!(plan.used_core_num() <= 64);
//! let mut buf = vec![0u8; plan.serialized_len()];
//! plan.serialize_into(&mut buf);
//! ```

pub mod dtype;
pub mod error;
pub mod math;
pub mod ops;
pub mod plan;
pub mod platform;
pub mod shape;
pub mod sort;
pub mod strategy;
pub mod workspace;

pub use dtype::Dtype;
pub use error::{TilingError, TilingResult};
pub use plan::{PlanField, TilingPlan};
pub use platform::PlatformInfo;
pub use shape::ShapeModel;
pub use strategy::{StrategySelector, TilingStrategy, ZERO_SHAPE_KEY};
