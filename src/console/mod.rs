//! System console.

use crate::console::interface::Console;
use crate::synchronization::interface::ReadWriteEx;
use crate::synchronization::InitStateLock;

pub mod null_console;

static CUR_CONSOLE: InitStateLock<&'static (dyn Console + Sync)> =
    InitStateLock::new(&null_console::NULL_CONSOLE);

/// Console interfaces.
pub mod interface {
    use core::fmt;

    /// Console write functions.
    pub trait Write {
        /// Write a single character.
        fn write_char(&self, c: char);

        /// Write a string slice, character by character.
        fn write_str(&self, s: &str) {
            for c in s.chars() {
                self.write_char(c);
            }
        }

        /// Write a Rust format string.
        fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result;

        /// Block until the last buffered character has been physically put on the TX wire.
        fn flush(&self);
    }

    /// Console read functions.
    pub trait Read {
        /// Read a single character. Blocks until one is available.
        fn read_char(&self) -> char {
            ' '
        }
    }

    /// Trait alias for a full-fledged console.
    pub trait Console: Write + Read {}
}

/// Register a new console.
pub fn register_console(new_console: &'static (impl Console + Sync)) {
    CUR_CONSOLE.write(|con| *con = new_console);
}

/// Return a reference to the currently registered console.
///
/// This is the global console used by all printing macros.
pub fn console() -> &'static (dyn Console + Sync) {
    CUR_CONSOLE.read(|con| *con)
}
