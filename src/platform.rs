//! Platform facts consumed by every tiling strategy.
//!
//! Constructed once per op-compile from the hardware query interface and
//! read-only afterward. The raw UB size is what the platform reports; the
//! usable budget subtracts the bytes the runtime reserves for its own
//! stack and cache shadow, the same discipline the strategies' budget
//! inequalities are written against.

use crate::dtype::Dtype;
use crate::error::{TilingError, TilingResult};

/// Minimum DMA transfer alignment in bytes.
pub const UB_BLOCK_ALIGN: u64 = 32;

/// Cache-line granule used for per-core sync flags and core-split floors.
pub const CACHE_LINE_BYTES: u64 = 128;

/// UB bytes reserved for the runtime; not available to any strategy.
pub const UB_RESERVED_BYTES: u64 = 8 * 1024;

/// Default cube-engine accumulator / operand buffer sizes in bytes.
pub const DEFAULT_L0A_BYTES: u64 = 64 * 1024;
pub const DEFAULT_L0B_BYTES: u64 = 64 * 1024;
pub const DEFAULT_L0C_BYTES: u64 = 128 * 1024;

/// Immutable hardware description for one tiling invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformInfo {
    core_num: u32,
    ub_size: u64,
    block_align: u64,
    cache_line: u64,
    l0a_size: u64,
    l0b_size: u64,
    l0c_size: u64,
}

impl PlatformInfo {
    /// Build from the two facts every platform must report. Cube buffer
    /// sizes default to the current generation's values.
    pub fn new(core_num: u32, ub_size: u64) -> TilingResult<Self> {
        if core_num == 0 {
            return Err(TilingError::InvalidPlatform("core_num is zero".into()));
        }
        if ub_size <= UB_RESERVED_BYTES {
            return Err(TilingError::InvalidPlatform(format!(
                "ub_size {ub_size} does not exceed the reserved {UB_RESERVED_BYTES} bytes"
            )));
        }
        Ok(PlatformInfo {
            core_num,
            ub_size,
            block_align: UB_BLOCK_ALIGN,
            cache_line: CACHE_LINE_BYTES,
            l0a_size: DEFAULT_L0A_BYTES,
            l0b_size: DEFAULT_L0B_BYTES,
            l0c_size: DEFAULT_L0C_BYTES,
        })
    }

    /// Override the cube buffer sizes reported by the platform query.
    pub fn with_cube_sizes(mut self, l0a: u64, l0b: u64, l0c: u64) -> TilingResult<Self> {
        if l0a == 0 || l0b == 0 || l0c == 0 {
            return Err(TilingError::InvalidPlatform(
                "cube buffer sizes must be non-zero".into(),
            ));
        }
        self.l0a_size = l0a;
        self.l0b_size = l0b;
        self.l0c_size = l0c;
        Ok(self)
    }

    pub fn core_num(&self) -> u32 {
        self.core_num
    }

    /// Raw UB size as reported by the platform.
    pub fn ub_size(&self) -> u64 {
        self.ub_size
    }

    /// UB bytes a strategy may actually plan against.
    pub fn usable_ub(&self) -> u64 {
        self.ub_size - UB_RESERVED_BYTES
    }

    pub fn block_align(&self) -> u64 {
        self.block_align
    }

    pub fn cache_line(&self) -> u64 {
        self.cache_line
    }

    pub fn l0a_size(&self) -> u64 {
        self.l0a_size
    }

    pub fn l0b_size(&self) -> u64 {
        self.l0b_size
    }

    pub fn l0c_size(&self) -> u64 {
        self.l0c_size
    }

    /// Elements of `dtype` per alignment block.
    pub fn block_elems(&self, dtype: Dtype) -> u64 {
        self.block_align / dtype.size_bytes()
    }
}
