//! Board support for the BCM2837 (Raspberry Pi 3, Zero 2 W, QEMU `raspi3b`) and BCM2711
//! (Raspberry Pi 4).

pub mod driver;
pub mod drivers;
pub mod memory;

use core::fmt;

/// Short name of the single file looked up in the root directory of the boot volume.
pub const BOOT_IMAGE_NAME: &str = "KERNEL.BIN";

/// Reference clock of the PL011, set by the firmware.
pub const PL011_UART_CLOCK_HZ: u32 = 48_000_000;

/// Console baud rate.
pub const PL011_UART_BAUD: u32 = 115_200;

/// Base clock of the SD host controller.
pub const EMMC_BASE_CLOCK_HZ: u32 = 41_666_666;

pub fn board_name() -> &'static str {
    #[cfg(feature = "bsp_rpi4")]
    {
        "Raspberry Pi 4"
    }

    #[cfg(not(feature = "bsp_rpi4"))]
    {
        "Raspberry Pi 3"
    }
}

/// Board variant derived from the firmware revision code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoardKind {
    /// The emulator reports no revision.
    Qemu,
    PiZero2W,
    Generic,
}

impl BoardKind {
    const ZERO_2W_REVISION: u32 = 0x0090_2120;
    const ZERO_2W_FAMILY: u32 = 0x0090_0000;

    pub const fn from_revision(revision: u32) -> Self {
        if revision == 0 {
            BoardKind::Qemu
        } else if (revision & 0x00FF_FFFF) == Self::ZERO_2W_REVISION
            || (revision & 0x00FF_0000) == Self::ZERO_2W_FAMILY
        {
            BoardKind::PiZero2W
        } else {
            BoardKind::Generic
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardKind::Qemu => write!(f, "QEMU simulated (raspi3b)"),
            BoardKind::PiZero2W => write!(f, "Raspberry Pi Zero 2W"),
            BoardKind::Generic => write!(f, "Raspberry Pi (generic)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_identification() {
        assert_eq!(BoardKind::from_revision(0), BoardKind::Qemu);
        assert_eq!(BoardKind::from_revision(0x0090_2120), BoardKind::PiZero2W);
        assert_eq!(BoardKind::from_revision(0x0290_2120), BoardKind::PiZero2W);
        assert_eq!(BoardKind::from_revision(0x0090_0093), BoardKind::PiZero2W);
        assert_eq!(BoardKind::from_revision(0x00a0_2082), BoardKind::Generic);
    }
}
