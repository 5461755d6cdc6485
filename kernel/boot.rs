//! Boot code of the test kernel.

use core::arch::global_asm;

global_asm!(include_str!("boot.s"));

/// The Rust entry of the `kernel` binary, called from `boot.s` with the loader's `x0`.
///
/// # Safety
///
/// - `descriptor` is whatever the previous stage passed; it is checked before use.
#[no_mangle]
pub unsafe extern "C" fn _start_rust(descriptor: usize) -> ! {
    crate::kernel_init(descriptor)
}
