#![no_main]
#![no_std]

use core::fmt;
use rpboot::{
    bsp::{self, drivers::bcm2xxx_gpio::GPIO, memory::map, BoardKind},
    console::{self, interface::Write},
    cpu, exception_level, handoff, info,
    loader::ImageLoader,
    memory::IdentityMapped,
    println,
    state::{state_manager, BootStage},
    storage::fat32::Fat32,
};

mod boot;

/// Report the failing stage with its error code, then park forever.
fn fatal(code: u32, reason: impl fmt::Display) -> ! {
    let stage = state_manager().halt();

    println!("[Loader] FATAL: stage {} failed (code {}): {}", stage, code, reason);
    console::console().flush();
    cpu::wait_forever()
}

/// Early init code.
///
/// # Safety
///
/// - Only a single core must be active and running this function.
/// - The init calls in this function must appear in the correct order.
unsafe fn kernel_init() -> ! {
    let gpio = bsp::driver::gpio();
    if let Err(x) = bsp::driver::init_console(&gpio) {
        panic!("Error initializing the console: {}", x);
    }
    // println! is usable from here on.
    state_manager().transition_to(BootStage::ConsoleUp);

    kernel_main(gpio)
}

/// The boot sequence, one stage after the other.
fn kernel_main(gpio: GPIO) -> ! {
    println!();
    println!("[Loader] {} on {}", handoff::LOADER_VERSION, bsp::board_name());
    exception_level::print_state();

    let board = {
        let mut mailbox = unsafe { bsp::driver::mailbox() };
        mailbox.board_info()
    };
    let (size, unit) = rpboot::size_human_readable_ceil(board.arm_memory as usize);
    info!("[Loader] Board revision : {:#010x}", board.revision);
    info!("[Loader] Board          : {}", BoardKind::from_revision(board.revision));
    info!("[Loader] ARM memory     : {} {}", size, unit);
    state_manager().transition_to(BootStage::BoardInfoQueried);

    let emmc = unsafe { bsp::driver::emmc() };
    if let Err(x) = unsafe { bsp::driver::init_storage(&gpio, &emmc) } {
        fatal(x.code(), x);
    }
    state_manager().transition_to(BootStage::StorageReady);

    let mut fs = Fat32::new(emmc);
    if let Err(x) = fs.mount() {
        fatal(x.code(), x);
    }
    state_manager().transition_to(BootStage::Mounted);

    // The staging area is plain RAM above the loader image that nothing else uses.
    let staging =
        unsafe { core::slice::from_raw_parts_mut(map::STAGING_START as *mut u8, map::STAGING_SIZE) };
    let len = match fs.read_file(bsp::BOOT_IMAGE_NAME, staging) {
        Ok(len) => len,
        Err(x) => fatal(x.code(), x),
    };
    info!("[Loader] Read {} bytes of {}", len, bsp::BOOT_IMAGE_NAME);
    state_manager().transition_to(BootStage::FileLoaded);

    let loader = ImageLoader::new();
    let image = match loader.validate(&staging[..len]) {
        Ok(image) => image,
        Err(x) => fatal(x.code(), x),
    };
    info!("[Loader] Image valid");
    state_manager().transition_to(BootStage::Validated);

    let mut memory = unsafe { IdentityMapped::new() };
    let descriptor = match loader.install(&image, board, &mut memory) {
        Ok(descriptor) => descriptor,
        Err(x) => fatal(x.code(), x),
    };
    state_manager().transition_to(BootStage::Installed);

    info!("[Loader] Jumping to kernel at {:#010x}\n", descriptor.entry_addr);
    console::console().flush();

    unsafe {
        handoff::dispatch(
            descriptor.entry_addr as usize,
            loader.descriptor_addr().as_usize(),
        )
    }
}
