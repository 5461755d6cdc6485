use aarch64_cpu::asm::barrier;

/// Make every prior write visible, then branch to `entry` with `descriptor` as first argument.
pub unsafe fn dispatch(entry: usize, descriptor: usize) -> ! {
    barrier::dsb(barrier::SY);
    barrier::isb(barrier::SY);

    let kernel: extern "C" fn(usize) = core::mem::transmute(entry);
    kernel(descriptor);

    crate::cpu::wait_forever()
}
