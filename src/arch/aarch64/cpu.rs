use aarch64_cpu::{asm, registers::*};
use tock_registers::interfaces::Readable;

pub use asm::nop;

/// Spin for `n` cycles.
#[inline(always)]
pub fn spin_for_cycles(n: usize) {
    for _ in 0..n {
        asm::nop();
    }
}

/// Pause execution on the core.
#[inline(always)]
pub fn wait_forever() -> ! {
    loop {
        asm::wfe()
    }
}

/// Affinity level 0 of the executing core.
#[inline(always)]
pub fn core_id() -> u64 {
    const CORE_MASK: u64 = 0b11;

    MPIDR_EL1.get() & CORE_MASK
}
