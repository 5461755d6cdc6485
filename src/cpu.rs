//! Processor code.

#[cfg(target_arch = "aarch64")]
#[path = "arch/aarch64/cpu.rs"]
mod arch_cpu;

#[cfg(not(target_arch = "aarch64"))]
mod arch_cpu {
    //! Host stand-ins so the portable parts of the crate can be unit tested.

    #[inline(always)]
    pub fn nop() {
        core::hint::spin_loop()
    }

    #[inline(always)]
    pub fn spin_for_cycles(n: usize) {
        for _ in 0..n {
            nop();
        }
    }

    pub fn wait_forever() -> ! {
        loop {
            nop()
        }
    }

    pub fn core_id() -> u64 {
        0
    }
}

pub use arch_cpu::*;

/// The core that runs the boot sequence. All others are parked by the boot assembly.
pub const BOOT_CORE_ID: u64 = 0;
