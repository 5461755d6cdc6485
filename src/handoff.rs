//! Hand-off from the loader to the loaded kernel.
//!
//! The loader leaves a [`HandoffDescriptor`] at a fixed physical address and enters the kernel
//! with that address in `x0`.

#[cfg(target_arch = "aarch64")]
#[path = "arch/aarch64/handoff.rs"]
mod arch_handoff;

#[cfg(not(target_arch = "aarch64"))]
mod arch_handoff {
    pub unsafe fn dispatch(_entry: usize, _descriptor: usize) -> ! {
        crate::cpu::wait_forever()
    }
}

use crate::{read_le32, state};
use static_assertions::const_assert_eq;

/// Identifies a valid descriptor.
pub const HANDOFF_MAGIC: u32 = 0xB007_B007;

/// Size of the descriptor in memory.
pub const DESCRIPTOR_SIZE: usize = 40;

const VERSION_LEN: usize = 16;

const_assert_eq!(DESCRIPTOR_SIZE, 6 * 4 + VERSION_LEN);

/// Loader identification, NUL padded into the descriptor.
pub const LOADER_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Facts about the board queried from the firmware.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BoardInfo {
    /// Board revision code, 0 under emulation.
    pub revision: u32,
    /// Bytes of RAM visible to the ARM cores.
    pub arm_memory: u32,
}

/// What the kernel learns from the loader.
///
/// Little-endian, packed: magic, board revision, ARM memory, load address, entry address,
/// kernel size (4 bytes each), then a 16-byte version string.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HandoffDescriptor {
    pub magic: u32,
    pub board: BoardInfo,
    pub load_addr: u32,
    pub entry_addr: u32,
    pub kernel_size: u32,
    pub version: [u8; VERSION_LEN],
}

impl HandoffDescriptor {
    pub fn new(board: BoardInfo, load_addr: u32, entry_addr: u32, kernel_size: u32) -> Self {
        let mut version = [0u8; VERSION_LEN];
        // Keep at least one NUL at the end.
        let len = LOADER_VERSION.len().min(VERSION_LEN - 1);
        version[..len].copy_from_slice(&LOADER_VERSION.as_bytes()[..len]);

        Self {
            magic: HANDOFF_MAGIC,
            board,
            load_addr,
            entry_addr,
            kernel_size,
            version,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == HANDOFF_MAGIC
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        let words = [
            self.magic,
            self.board.revision,
            self.board.arm_memory,
            self.load_addr,
            self.entry_addr,
            self.kernel_size,
        ];

        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out[24..].copy_from_slice(&self.version);

        out
    }

    pub fn from_bytes(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let mut version = [0u8; VERSION_LEN];
        version.copy_from_slice(&bytes[24..]);

        Self {
            magic: read_le32(bytes, 0),
            board: BoardInfo {
                revision: read_le32(bytes, 4),
                arm_memory: read_le32(bytes, 8),
            },
            load_addr: read_le32(bytes, 12),
            entry_addr: read_le32(bytes, 16),
            kernel_size: read_le32(bytes, 20),
            version,
        }
    }

    /// The version string up to the first NUL, never past the field.
    pub fn version_str(&self) -> &str {
        let len = self
            .version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_LEN);

        match core::str::from_utf8(&self.version[..len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.version[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

/// Enter the kernel at `entry` with `descriptor` in `x0`. Never returns.
///
/// Marks the boot as handed off first, which also freezes every init-time lock.
///
/// # Safety
///
/// - `entry` must hold valid code for the current exception level.
/// - `descriptor` must point to a written [`HandoffDescriptor`].
pub unsafe fn dispatch(entry: usize, descriptor: usize) -> ! {
    state::state_manager().transition_to(state::BootStage::HandedOff);
    arch_handoff::dispatch(entry, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HandoffDescriptor {
        HandoffDescriptor::new(
            BoardInfo {
                revision: 0x00a0_2082,
                arm_memory: 0x3C00_0000,
            },
            0x20_0000,
            0x20_0000,
            16,
        )
    }

    #[test]
    fn golden_bytes() {
        let bytes = sample().to_bytes();

        assert_eq!(&bytes[0..4], &[0x07, 0xB0, 0x07, 0xB0]);
        assert_eq!(&bytes[4..8], &[0x82, 0x20, 0xa0, 0x00]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x3C]);
        assert_eq!(&bytes[12..16], &[0x00, 0x00, 0x20, 0x00]);
        assert_eq!(&bytes[20..24], &[0x10, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[24..30], b"rpboot");
        assert_eq!(bytes[39], 0);
    }

    #[test]
    fn parses_what_it_writes() {
        let d = sample();
        let back = HandoffDescriptor::from_bytes(&d.to_bytes());

        assert_eq!(back, d);
        assert!(back.is_valid());
        assert_eq!(back.version_str(), LOADER_VERSION);
    }

    #[test]
    fn version_scan_is_bounded() {
        let mut bytes = sample().to_bytes();
        bytes[24..].fill(b'x');
        let d = HandoffDescriptor::from_bytes(&bytes);
        assert_eq!(d.version_str().len(), 16);

        bytes[0] = 0;
        assert!(!HandoffDescriptor::from_bytes(&bytes).is_valid());
    }
}
