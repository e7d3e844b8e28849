//! Device workspace accounting.
//!
//! Beyond the UB buffers described by the plan itself, a kernel may need
//! global scratch: cross-core sync flags, f32 accumulation spill, or
//! per-segment counters. The runtime additionally reserves a fixed block
//! for its tooling on every launch; that reservation is always included.

use crate::platform::CACHE_LINE_BYTES;

/// Fixed workspace the runtime claims on every kernel launch.
pub const SYS_WORKSPACE_BYTES: u64 = 16 * 1024 * 1024;

/// Add the fixed system reservation to an op's own scratch request.
pub fn with_system_reserve(user_bytes: u64) -> u64 {
    user_bytes + SYS_WORKSPACE_BYTES
}

/// Bytes for one sync flag per launched core, cache-line padded so the
/// flags never share a line.
pub fn sync_flag_bytes(used_core_num: u32) -> u64 {
    used_core_num as u64 * CACHE_LINE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_reserve_is_always_added() {
        assert_eq!(with_system_reserve(0), SYS_WORKSPACE_BYTES);
        assert_eq!(with_system_reserve(4096), SYS_WORKSPACE_BYTES + 4096);
    }

    #[test]
    fn sync_flags_are_line_padded() {
        assert_eq!(sync_flag_bytes(64), 64 * CACHE_LINE_BYTES);
    }
}
