//! BSP driver support.
//!
//! The UART is the only static driver instance because the console registry needs a `'static`
//! reference. Every other driver is created by the boot sequence and passed around by value or
//! reference.

use super::{
    drivers::{
        bcm2xxx_emmc::{Emmc, EmmcError, Timeouts},
        bcm2xxx_gpio::GPIO,
        bcm2xxx_mailbox::Mailbox,
        bcm2xxx_pl011::PL011Uart,
        common::MmioBus,
    },
    memory::map::mmio::{EMMC_START, GPIO_START, MAILBOX_START, PL011_UART_START},
    EMMC_BASE_CLOCK_HZ, PL011_UART_BAUD, PL011_UART_CLOCK_HZ,
};
use crate::{console, driver, memory::Address, time::SystemTimer};
use core::sync::atomic::{AtomicBool, Ordering};

pub static PL011_UART: PL011Uart = unsafe {
    PL011Uart::new(
        MmioBus::new(Address::new(PL011_UART_START)),
        PL011_UART_CLOCK_HZ,
        PL011_UART_BAUD,
    )
};

/// The GPIO block.
///
/// # Safety
///
/// - Only one instance may be in use at a time.
pub unsafe fn gpio() -> GPIO {
    GPIO::new(MmioBus::new(Address::new(GPIO_START)))
}

/// The VideoCore mailbox.
///
/// # Safety
///
/// - Only one instance may be in use at a time.
pub unsafe fn mailbox() -> Mailbox {
    Mailbox::new(MmioBus::new(Address::new(MAILBOX_START)))
}

/// The SD host controller with the default timeouts.
///
/// # Safety
///
/// - Only one instance may be in use at a time.
pub unsafe fn emmc() -> Emmc {
    Emmc::new(
        MmioBus::new(Address::new(EMMC_START)),
        SystemTimer,
        EMMC_BASE_CLOCK_HZ,
        Timeouts::default(),
    )
}

/// Route the UART pins, bring up the PL011 and make it the console.
///
/// # Safety
///
/// - Must be called once, by the boot core, before anything else touches the UART.
pub unsafe fn init_console(gpio: &GPIO) -> Result<(), &'static str> {
    static INIT_DONE: AtomicBool = AtomicBool::new(false);
    if INIT_DONE.load(Ordering::Relaxed) {
        return Err("Init already done");
    }

    gpio.map_pl011_uart();
    if let Err(x) = driver::init_driver(&PL011_UART) {
        match x {}
    }
    console::register_console(&PL011_UART);

    INIT_DONE.store(true, Ordering::Relaxed);
    Ok(())
}

/// Route the SD card pins and bring up the card.
///
/// # Safety
///
/// - See [`driver::interface::DeviceDriver::init`].
pub unsafe fn init_storage(gpio: &GPIO, emmc: &Emmc) -> Result<(), EmmcError> {
    gpio.map_emmc();
    driver::init_driver(emmc)
}
