#![cfg_attr(not(test), no_std)]

pub mod bsp;
pub mod console;
pub mod cpu;
pub mod driver;
pub mod exception_level;
pub mod handoff;
pub mod loader;
pub mod memory;
pub mod panic;
pub mod print;
pub mod state;
pub mod storage;
pub mod synchronization;
pub mod time;

/// Convert a size into human readable format.
pub const fn size_human_readable_ceil(size: usize) -> (usize, &'static str) {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;
    const GIB: usize = 1024 * 1024 * 1024;

    if (size / GIB) > 0 {
        (size.div_ceil(GIB), "GiB")
    } else if (size / MIB) > 0 {
        (size.div_ceil(MIB), "MiB")
    } else if (size / KIB) > 0 {
        (size.div_ceil(KIB), "KiB")
    } else {
        (size, "Byte")
    }
}

/// Check if a value is aligned to a given size.
#[inline(always)]
pub const fn is_aligned(ptr: usize, alignment: usize) -> bool {
    assert!(alignment.is_power_of_two());

    (ptr & (alignment - 1)) == 0
}

/// Align down.
#[inline(always)]
pub const fn align_down(ptr: usize, alignment: usize) -> usize {
    assert!(alignment.is_power_of_two());

    ptr & !(alignment - 1)
}

/// Read a little-endian `u16` at `offset`.
#[inline(always)]
pub fn read_le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Read a little-endian `u32` at `offset`.
#[inline(always)]
pub fn read_le32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_readable_sizes_round_up() {
        assert_eq!(size_human_readable_ceil(512), (512, "Byte"));
        assert_eq!(size_human_readable_ceil(1536), (2, "KiB"));
        assert_eq!(size_human_readable_ceil(0x3C00_0000), (960, "MiB"));
        assert_eq!(size_human_readable_ceil(1 << 30), (1, "GiB"));
    }

    #[test]
    fn alignment_helpers() {
        assert!(is_aligned(0x8_0000, 16));
        assert!(!is_aligned(0x8_0004, 16));
        assert_eq!(align_down(0x1234_5678, 16), 0x1234_5670);
    }

    #[test]
    fn little_endian_accessors() {
        let bytes = [0x4E, 0x52, 0x4B, 0x4E, 0x00, 0x08];
        assert_eq!(read_le32(&bytes, 0), 0x4E4B_524E);
        assert_eq!(read_le16(&bytes, 4), 0x0800);
    }
}
