//! Board memory map.
//!
//! Everything is identity mapped with the MMU off, so all addresses are physical.

/// The fixed physical addresses shared by both boot stages.
#[rustfmt::skip]
pub mod map {
    /// Hand-off descriptor consumed by the next stage. Its page is kept out of the boot stack.
    pub const HANDOFF_DESCRIPTOR:    usize = 0x0000_1000;

    /// Lowest address of the boot core stack.
    pub const BOOT_CORE_STACK_START: usize = 0x0000_2000;

    /// The firmware loads the first stage here. The boot stack grows down from it.
    pub const BOOT_CORE_STACK_END:   usize = 0x0008_0000;

    /// The descriptor page, the boot stack and the whole first stage image end below this.
    pub const LOADER_END:            usize = 0x0020_0000;

    /// The raw image file is read here before validation, above any default load region.
    pub const STAGING_START:         usize = 0x0100_0000;

    /// Load and entry address of the test kernel.
    pub const KERNEL_LOAD_DEFAULT:   usize = 0x0020_0000;

    /// Upper bound of a kernel payload.
    pub const KERNEL_MAX_SIZE:       usize = 4 * 1024 * 1024;

    /// Room for the header in front of a maximally sized payload.
    pub const STAGING_SIZE:          usize = KERNEL_MAX_SIZE + crate::loader::header::HEADER_SIZE;

    /// Physical devices.
    #[cfg(not(feature = "bsp_rpi4"))]
    pub mod mmio {
        pub const START:            usize =         0x3F00_0000;
        pub const MAILBOX_START:    usize = START + 0x0000_B880;
        pub const GPIO_START:       usize = START + 0x0020_0000;
        pub const PL011_UART_START: usize = START + 0x0020_1000;
        pub const EMMC_START:       usize = START + 0x0030_0000;
    }

    /// Physical devices.
    #[cfg(feature = "bsp_rpi4")]
    pub mod mmio {
        pub const START:            usize =         0xFE00_0000;
        pub const MAILBOX_START:    usize = START + 0x0000_B880;
        pub const GPIO_START:       usize = START + 0x0020_0000;
        pub const PL011_UART_START: usize = START + 0x0020_1000;
        pub const EMMC_START:       usize = START + 0x0034_0000;
    }
}

/// Exclusive end of the boot core stack.
#[inline(always)]
pub fn boot_core_stack_end() -> usize {
    map::BOOT_CORE_STACK_END
}

#[cfg(test)]
mod tests {
    use super::map;
    use crate::handoff::DESCRIPTOR_SIZE;

    #[test]
    fn descriptor_page_sits_below_the_boot_stack() {
        assert!(map::HANDOFF_DESCRIPTOR + DESCRIPTOR_SIZE <= map::BOOT_CORE_STACK_START);
        assert!(map::BOOT_CORE_STACK_START < map::BOOT_CORE_STACK_END);
        assert!(map::BOOT_CORE_STACK_END < map::LOADER_END);
    }

    #[test]
    fn staging_area_is_disjoint_from_the_default_load_region() {
        assert!(map::KERNEL_LOAD_DEFAULT >= map::LOADER_END);
        assert!(map::KERNEL_LOAD_DEFAULT + map::KERNEL_MAX_SIZE <= map::STAGING_START);
    }
}
