//! Boot code of the first stage.

use aarch64_cpu::{
    asm::{self, barrier},
    registers::*,
};
use core::arch::global_asm;
use rpboot::{
    bsp, cpu,
    exception_level::{self, EntryAction},
};
use tock_registers::interfaces::Writeable;

global_asm!(include_str!("boot.s"));

/// Prepare the EL2 to EL1 transition.
///
/// # Safety
///
/// - The `eret` that follows continues in EL1 at `crate::kernel_init()`.
#[inline(always)]
unsafe fn prepare_el2_to_el1_transition(phys_boot_core_stack_end_exclusive_addr: u64) {
    // Enable timer counter registers for EL1.
    CNTHCTL_EL2.write(CNTHCTL_EL2::EL1PCEN::SET + CNTHCTL_EL2::EL1PCTEN::SET);

    // No offset for reading the counters.
    CNTVOFF_EL2.set(0);

    // Set EL1 execution state to AArch64.
    HCR_EL2.write(HCR_EL2::RW::EL1IsAarch64);

    // Fake a saved program status with all interrupts masked and SP_EL1 as stack pointer.
    SPSR_EL2.write(
        SPSR_EL2::D::Masked
            + SPSR_EL2::A::Masked
            + SPSR_EL2::I::Masked
            + SPSR_EL2::F::Masked
            + SPSR_EL2::M::EL1h,
    );

    // Let the link register point to kernel_init().
    ELR_EL2.set(crate::kernel_init as *const () as u64);

    prepare_el1_state();

    // Set up SP_EL1, which will be used by EL1 once we "return" to it. The EL2 stack is no longer
    // needed, so it is reused.
    SP_EL1.set(phys_boot_core_stack_end_exclusive_addr);
}

/// EL1 system state shared by both stages, written from EL2 or EL1.
#[inline(always)]
unsafe fn prepare_el1_state() {
    // Both stages run with the MMU and the caches off.
    SCTLR_EL1.write(
        SCTLR_EL1::M::Disable + SCTLR_EL1::C::NonCacheable + SCTLR_EL1::I::NonCacheable,
    );

    // No traps on FP/SIMD instructions.
    CPACR_EL1.write(CPACR_EL1::FPEN::TrapNothing);
}

/// The Rust entry of the `kernelloader` binary, called from `boot.s`.
///
/// # Safety
///
/// - Exception return from EL2 must continue execution in EL1 with `kernel_init()`.
#[no_mangle]
pub unsafe extern "C" fn _start_rust() -> ! {
    let (level, _) = exception_level::current_privilege_level();

    match level.entry_action() {
        EntryAction::DropToEl1 => {
            prepare_el2_to_el1_transition(bsp::memory::boot_core_stack_end() as u64);

            // Use `eret` to "return" to EL1. This results in execution of kernel_init() in EL1.
            asm::eret()
        }
        EntryAction::Continue => {
            prepare_el1_state();
            barrier::isb(barrier::SY);

            crate::kernel_init()
        }
        EntryAction::Park => cpu::wait_forever(),
    }
}
