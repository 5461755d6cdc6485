//! Boot stage tracking.
//!
//! The boot sequence is a single forward path. Every stage is entered exactly once and in order;
//! any failure moves the machine into the terminal `Halted` state.

use core::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Stages of the boot sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BootStage {
    PrivilegeInit = 0,
    ConsoleUp = 1,
    BoardInfoQueried = 2,
    StorageReady = 3,
    Mounted = 4,
    FileLoaded = 5,
    Validated = 6,
    Installed = 7,
    HandedOff = 8,
    Halted = 9,
}

impl BootStage {
    const ALL: [BootStage; 10] = [
        BootStage::PrivilegeInit,
        BootStage::ConsoleUp,
        BootStage::BoardInfoQueried,
        BootStage::StorageReady,
        BootStage::Mounted,
        BootStage::FileLoaded,
        BootStage::Validated,
        BootStage::Installed,
        BootStage::HandedOff,
        BootStage::Halted,
    ];

    fn from_raw(raw: u8) -> Self {
        match Self::ALL.get(raw as usize) {
            Some(stage) => *stage,
            None => panic!("Invalid boot stage {}", raw),
        }
    }

    /// The stage that follows on the success path, if any.
    pub const fn successor(self) -> Option<BootStage> {
        match self {
            BootStage::PrivilegeInit => Some(BootStage::ConsoleUp),
            BootStage::ConsoleUp => Some(BootStage::BoardInfoQueried),
            BootStage::BoardInfoQueried => Some(BootStage::StorageReady),
            BootStage::StorageReady => Some(BootStage::Mounted),
            BootStage::Mounted => Some(BootStage::FileLoaded),
            BootStage::FileLoaded => Some(BootStage::Validated),
            BootStage::Validated => Some(BootStage::Installed),
            BootStage::Installed => Some(BootStage::HandedOff),
            BootStage::HandedOff | BootStage::Halted => None,
        }
    }

    /// Whether no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, BootStage::HandedOff | BootStage::Halted)
    }

    pub const fn name(self) -> &'static str {
        match self {
            BootStage::PrivilegeInit => "privilege-init",
            BootStage::ConsoleUp => "console",
            BootStage::BoardInfoQueried => "board-info",
            BootStage::StorageReady => "storage",
            BootStage::Mounted => "mount",
            BootStage::FileLoaded => "file-read",
            BootStage::Validated => "validate",
            BootStage::Installed => "install",
            BootStage::HandedOff => "hand-off",
            BootStage::Halted => "halted",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maintains the current boot stage.
pub struct BootStateManager(AtomicU8);

static STATE_MANAGER: BootStateManager = BootStateManager::new();

/// Return a reference to the global state manager.
pub fn state_manager() -> &'static BootStateManager {
    &STATE_MANAGER
}

impl BootStateManager {
    /// Create a new instance.
    pub const fn new() -> Self {
        Self(AtomicU8::new(BootStage::PrivilegeInit as u8))
    }

    /// Return the current stage.
    pub fn stage(&self) -> BootStage {
        BootStage::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Whether control has been passed on to the next stage.
    pub fn is_handed_off(&self) -> bool {
        self.stage() == BootStage::HandedOff
    }

    /// Advance to `next`, which must be the direct successor of the current stage.
    pub fn transition_to(&self, next: BootStage) {
        let current = self.stage();
        if current.successor() != Some(next) {
            panic!("Boot stage transition {} -> {} not allowed", current, next);
        }

        if self
            .0
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            panic!("Boot stage changed concurrently during {} -> {}", current, next);
        }
    }

    /// Move to `Halted` and return the stage that was being attempted.
    ///
    /// Halting an already terminal machine leaves it untouched.
    pub fn halt(&self) -> BootStage {
        let current = self.stage();
        if current.is_terminal() {
            return current;
        }

        self.0.store(BootStage::Halted as u8, Ordering::Release);
        current.successor().unwrap_or(current)
    }
}

impl Default for BootStateManager {
    fn default() -> Self {
        Self::new()
    }
}
