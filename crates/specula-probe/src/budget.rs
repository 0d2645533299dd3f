//! GPU memory estimates for the backing store and scratch targets.

use specula_core::constants::WORKING_FORMAT;
use specula_core::math::{cubemap_byte_size, mip_level_count};
use specula_core::CacheFormat;

fn slice_bytes(probe_size: u32, format: CacheFormat, mipmapped: bool) -> u64 {
    let mips = if mipmapped {
        mip_level_count(probe_size)
    } else {
        1
    };
    cubemap_byte_size(probe_size, format.texture_format(), mips)
}

/// Approximate size in bytes of a backing store with `capacity` cube slices.
pub fn approx_cache_size_bytes(
    capacity: u32,
    probe_size: u32,
    format: CacheFormat,
    mipmapped: bool,
) -> u64 {
    slice_bytes(probe_size, format, mipmapped) * u64::from(capacity)
}

/// Largest slice count whose backing store fits in `budget_bytes`.
pub fn max_capacity_for_budget(
    budget_bytes: u64,
    probe_size: u32,
    format: CacheFormat,
    mipmapped: bool,
) -> u32 {
    let per_slice = slice_bytes(probe_size, format, mipmapped);
    if per_slice == 0 {
        return 0;
    }
    u32::try_from(budget_bytes / per_slice).unwrap_or(u32::MAX)
}

/// Size in bytes of the two mipmapped scratch cube targets.
pub fn scratch_size_bytes(probe_size: u32) -> u64 {
    2 * cubemap_byte_size(probe_size, WORKING_FORMAT, mip_level_count(probe_size))
}
