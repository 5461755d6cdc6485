//! A panic handler that prints over the console and parks the core.

#[cfg(target_os = "none")]
use crate::{cpu, println};

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::sync::atomic::{AtomicBool, Ordering};

    // A panic while printing the panic message must not recurse.
    static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
    if PANIC_IN_PROGRESS.swap(true, Ordering::Relaxed) {
        cpu::wait_forever()
    }

    let timestamp = crate::time::uptime();

    match info.location() {
        Some(location) => println!(
            "[{:>3}.{:06}] Kernel panic!\n\n{}:{}:{}\n\n{}",
            timestamp.as_secs(),
            timestamp.subsec_micros(),
            location.file(),
            location.line(),
            location.column(),
            info.message(),
        ),
        None => println!(
            "[{:>3}.{:06}] Kernel panic!\n\n{}",
            timestamp.as_secs(),
            timestamp.subsec_micros(),
            info.message(),
        ),
    }

    crate::state::state_manager().halt();
    cpu::wait_forever()
}
