use crate::{cpu, info};
use aarch64_cpu::registers::*;
use tock_registers::interfaces::Readable;

use crate::exception_level::PrivilegeLevel;

/// The processing element's current privilege level.
pub fn current_privilege_level() -> (PrivilegeLevel, &'static str) {
    let el = CurrentEL.read_as_enum(CurrentEL::EL);
    match el {
        Some(CurrentEL::EL::Value::EL2) => (PrivilegeLevel::Hypervisor, "EL2"),
        Some(CurrentEL::EL::Value::EL1) => (PrivilegeLevel::Kernel, "EL1"),
        Some(CurrentEL::EL::Value::EL0) => (PrivilegeLevel::User, "EL0"),
        _ => (PrivilegeLevel::Unknown, "Unknown"),
    }
}

/// Print exception level, core identity and the DAIF mask state.
#[rustfmt::skip]
pub fn print_state() {
    let (_, el) = current_privilege_level();

    info!("[CPU] Exception level: {}", el);
    info!("[CPU] MPIDR:           {:#x}", MPIDR_EL1.get());
    info!("[CPU] Core ID:         {}", cpu::core_id());
    info!("[CPU] Debug  masked:   {}", DAIF.is_set(DAIF::D));
    info!("[CPU] SError masked:   {}", DAIF.is_set(DAIF::A));
    info!("[CPU] IRQ    masked:   {}", DAIF.is_set(DAIF::I));
    info!("[CPU] FIQ    masked:   {}", DAIF.is_set(DAIF::F));
}
