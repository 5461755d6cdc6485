#![no_main]
#![no_std]

//! The test kernel: checks what the loader left behind, prints it and keeps a heartbeat going.

use core::time::Duration;
use rpboot::{
    bsp,
    console::{self, interface::Write},
    cpu,
    handoff::{HandoffDescriptor, DESCRIPTOR_SIZE},
    info,
    memory::{interface::PhysicalMemory, Address, IdentityMapped},
    print, println, time, warn,
};

mod boot;

const HEARTBEAT: Duration = Duration::from_secs(1);

/// Early init code.
///
/// # Safety
///
/// - Only a single core must be active and running this function.
unsafe fn kernel_init(descriptor_addr: usize) -> ! {
    // The loader's console is gone with its image; bring the UART up again.
    let gpio = bsp::driver::gpio();
    if bsp::driver::init_console(&gpio).is_err() {
        cpu::wait_forever()
    }

    let mut raw = [0u8; DESCRIPTOR_SIZE];
    IdentityMapped::new().read_bytes(Address::new(descriptor_addr), &mut raw);

    kernel_main(descriptor_addr, HandoffDescriptor::from_bytes(&raw))
}

fn kernel_main(descriptor_addr: usize, descriptor: HandoffDescriptor) -> ! {
    println!();
    info!("[Kernel] Hello from the loaded kernel");
    info!("[Kernel] Descriptor at {:#x}", descriptor_addr);

    if !descriptor.is_valid() {
        warn!(
            "[Kernel] Bad descriptor magic {:#010x}, nothing to report",
            descriptor.magic
        );
        console::console().flush();
        cpu::wait_forever()
    }

    info!("[Kernel] Loader         : {}", descriptor.version_str());
    info!("[Kernel] Board revision : {:#010x}", descriptor.board.revision);
    info!(
        "[Kernel] ARM memory     : {} MiB",
        descriptor.board.arm_memory / (1024 * 1024)
    );
    info!("[Kernel] Load address   : {:#010x}", descriptor.load_addr);
    info!("[Kernel] Entry address  : {:#010x}", descriptor.entry_addr);
    info!("[Kernel] Kernel size    : {} bytes", descriptor.kernel_size);
    info!("[Kernel] Heartbeat every {:?}", HEARTBEAT);

    loop {
        print!(".");
        if let Err(x) = time::spin_for(HEARTBEAT) {
            warn!("[Kernel] Timer: {}", x);
            cpu::wait_forever()
        }
    }
}
