//! Exception levels and the CPU state report printed at start-up.

#[cfg(target_arch = "aarch64")]
#[path = "arch/aarch64/exception_level.rs"]
mod arch_exception_level;

#[cfg(not(target_arch = "aarch64"))]
mod arch_exception_level {
    use super::PrivilegeLevel;

    pub fn current_privilege_level() -> (PrivilegeLevel, &'static str) {
        (PrivilegeLevel::Unknown, "Unknown")
    }

    pub fn print_state() {}
}

pub use arch_exception_level::*;

/// Kernel privilege levels.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrivilegeLevel {
    User,
    Kernel,
    Hypervisor,
    Unknown,
}

/// What the first stage does with the level it was entered at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryAction {
    /// Exception return from EL2 into EL1.
    DropToEl1,
    /// Already in EL1, carry on.
    Continue,
    Park,
}

impl PrivilegeLevel {
    /// Only EL2 and EL1 entries are supported; EL3 reads as [`PrivilegeLevel::Unknown`].
    pub const fn entry_action(self) -> EntryAction {
        match self {
            PrivilegeLevel::Hypervisor => EntryAction::DropToEl1,
            PrivilegeLevel::Kernel => EntryAction::Continue,
            PrivilegeLevel::User | PrivilegeLevel::Unknown => EntryAction::Park,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_el2_and_el1_entries_boot() {
        assert_eq!(PrivilegeLevel::Hypervisor.entry_action(), EntryAction::DropToEl1);
        assert_eq!(PrivilegeLevel::Kernel.entry_action(), EntryAction::Continue);
        assert_eq!(PrivilegeLevel::User.entry_action(), EntryAction::Park);
        assert_eq!(PrivilegeLevel::Unknown.entry_action(), EntryAction::Park);
    }
}
