//! Mip chain and texture size helpers.

use crate::constants::CUBE_FACE_COUNT;
use crate::types::TextureFormat;

/// Number of levels in a full mip chain for a face edge of `size` pixels.
#[inline]
pub const fn mip_level_count(size: u32) -> u32 {
    if size == 0 {
        0
    } else {
        u32::BITS - size.leading_zeros()
    }
}

/// Edge length of mip `level` for a base edge of `size` pixels.
#[inline]
pub const fn mip_extent(size: u32, level: u32) -> u32 {
    if level >= u32::BITS {
        return 1;
    }
    let extent = size >> level;
    if extent == 0 {
        1
    } else {
        extent
    }
}

/// Byte size of one cubemap (six faces) with `mip_levels` levels.
pub fn cubemap_byte_size(face_size: u32, format: TextureFormat, mip_levels: u32) -> u64 {
    (0..mip_levels.max(1))
        .map(|level| {
            let extent = mip_extent(face_size, level);
            format.image_size(extent, extent) * u64::from(CUBE_FACE_COUNT)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_counts() {
        assert_eq!(mip_level_count(0), 0);
        assert_eq!(mip_level_count(1), 1);
        assert_eq!(mip_level_count(128), 8);
        assert_eq!(mip_level_count(129), 8);
        assert_eq!(mip_level_count(256), 9);
    }

    #[test]
    fn mip_extents_clamp_to_one() {
        assert_eq!(mip_extent(128, 0), 128);
        assert_eq!(mip_extent(128, 3), 16);
        assert_eq!(mip_extent(128, 7), 1);
        assert_eq!(mip_extent(128, 12), 1);
        assert_eq!(mip_extent(128, 40), 1);
    }

    #[test]
    fn cubemap_sizes() {
        // 4x4 + 2x2 + 1x1 texels, 8 bytes each, six faces
        assert_eq!(
            cubemap_byte_size(4, TextureFormat::Rgba16Float, 3),
            (16 + 4 + 1) * 8 * 6
        );
        // Every BC6H level is at least one 16 byte block
        assert_eq!(
            cubemap_byte_size(4, TextureFormat::Bc6hRgbUfloat, 3),
            3 * 16 * 6
        );
    }
}
