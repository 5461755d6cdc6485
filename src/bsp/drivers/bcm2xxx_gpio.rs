//! GPIO driver.

use crate::{
    bsp::drivers::common::{BoundedUsize, MmioBus, RegisterBus},
    bus_registers, cpu, driver,
    synchronization::{interface::Mutex, NullLock},
};
use core::convert::Infallible;
use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields,
};

// GPIO registers.
//
// Descriptions taken from
// - https://github.com/raspberrypi/documentation/files/1888662/BCM2837-ARM-Peripherals.-.Revised.-.V2-1.pdf
// - https://datasheets.raspberrypi.org/bcm2711/bcm2711-peripherals.pdf
register_bitfields! {
    u32,

    /// GPIO Pull-up/down Register (BCM2837)
    GPPUD [
        /// Controls the actuation of the internal pull-up/down control line to ALL the GPIO pins.
        PUD OFFSET(0) NUMBITS(2) [
            Off = 0b00,
            PullDown = 0b01,
            PullUp = 0b10
        ]
    ]
}

/// A GPIO pin number.
pub type Pin = BoundedUsize<53>;

/// Pin function, as encoded in the GPFSELn registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Pull resistor state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pull {
    None,
    Down,
    Up,
}

const GPFSEL0: usize = 0x00;

struct GPIOInner<B> {
    bus: B,
}

impl<B: RegisterBus> GPIOInner<B> {
    bus_registers! {
        GPSET0 @ 0x1C => (),
        GPSET1 @ 0x20 => (),
        GPCLR0 @ 0x28 => (),
        GPCLR1 @ 0x2C => (),
        GPLEV0 @ 0x34 => (),
        GPLEV1 @ 0x38 => (),
        GPPUD @ 0x94 => GPPUD::Register,
        GPPUDCLK0 @ 0x98 => (),
        GPPUDCLK1 @ 0x9C => (),
    }

    fn select_function(&self, pin: Pin, function: Function) {
        let offset = GPFSEL0 + (pin.get() / 10) * 4;
        let shift = (pin.get() % 10) * 3;

        let mut val = self.bus.read32(offset);
        val &= !(0b111 << shift);
        val |= (function as u32) << shift;
        self.bus.write32(offset, val);
    }

    /// BCM2837 sequence: set the control line, clock it into the selected pins, then release.
    #[cfg(not(feature = "bsp_rpi4"))]
    fn set_pull(&self, pins: &[Pin], pull: Pull) {
        let (mut clk0, mut clk1) = (0u32, 0u32);
        for pin in pins {
            match pin.get() {
                n @ 0..=31 => clk0 |= 1 << n,
                n => clk1 |= 1 << (n - 32),
            }
        }

        let pud = match pull {
            Pull::None => GPPUD::PUD::Off,
            Pull::Down => GPPUD::PUD::PullDown,
            Pull::Up => GPPUD::PUD::PullUp,
        };

        self.GPPUD().write(pud);
        cpu::spin_for_cycles(150);

        self.GPPUDCLK0().set(clk0);
        self.GPPUDCLK1().set(clk1);
        cpu::spin_for_cycles(150);

        self.GPPUD().write(GPPUD::PUD::Off);
        self.GPPUDCLK0().set(0);
        self.GPPUDCLK1().set(0);
    }

    /// BCM2711 has one 2-bit field per pin instead.
    #[cfg(feature = "bsp_rpi4")]
    fn set_pull(&self, pins: &[Pin], pull: Pull) {
        const PUP_PDN_CNTRL_REG0: usize = 0xE4;

        let bits = match pull {
            Pull::None => 0b00,
            Pull::Up => 0b01,
            Pull::Down => 0b10,
        };

        for pin in pins {
            let offset = PUP_PDN_CNTRL_REG0 + (pin.get() / 16) * 4;
            let shift = (pin.get() % 16) * 2;

            let mut val = self.bus.read32(offset);
            val &= !(0b11 << shift);
            val |= bits << shift;
            self.bus.write32(offset, val);
        }
    }
}

/// Representation of the GPIO HW.
pub struct GPIO<B = MmioBus> {
    inner: NullLock<GPIOInner<B>>,
}

impl<B: RegisterBus> GPIO<B> {
    pub const COMPATIBLE: &'static str = "BCM GPIO";

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a bus for the correct MMIO start address.
    pub const unsafe fn new(bus: B) -> Self {
        Self {
            inner: NullLock::new(GPIOInner { bus }),
        }
    }

    /// Route `pin` to `function`.
    pub fn select_function(&self, pin: Pin, function: Function) {
        self.inner.lock(|inner| inner.select_function(pin, function))
    }

    /// Configure the pull resistors of `pins`.
    pub fn set_pull(&self, pins: &[Pin], pull: Pull) {
        self.inner.lock(|inner| inner.set_pull(pins, pull))
    }

    /// Drive an output pin high.
    pub fn set(&self, pin: Pin) {
        self.inner.lock(|inner| match pin.get() {
            n @ 0..=31 => inner.GPSET0().set(1 << n),
            n => inner.GPSET1().set(1 << (n - 32)),
        })
    }

    /// Drive an output pin low.
    pub fn clear(&self, pin: Pin) {
        self.inner.lock(|inner| match pin.get() {
            n @ 0..=31 => inner.GPCLR0().set(1 << n),
            n => inner.GPCLR1().set(1 << (n - 32)),
        })
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: Pin) -> bool {
        self.inner.lock(|inner| match pin.get() {
            n @ 0..=31 => inner.GPLEV0().get() & (1 << n) != 0,
            n => inner.GPLEV1().get() & (1 << (n - 32)) != 0,
        })
    }

    /// Map PL011 UART as standard output.
    ///
    /// TX to pin 14
    /// RX to pin 15
    pub fn map_pl011_uart(&self) {
        let pins = [Pin::new(14), Pin::new(15)];

        for pin in pins {
            self.select_function(pin, Function::Alt0);
        }
        self.set_pull(&pins, Pull::None);
    }

    /// Map the SD card slot to the EMMC controller.
    ///
    /// Pin 47 is card detect, 48 CLK, 49 CMD, 50-53 DAT0-3.
    #[cfg(not(feature = "bsp_rpi4"))]
    pub fn map_emmc(&self) {
        let detect = Pin::new(47);
        self.select_function(detect, Function::Input);
        self.set_pull(&[detect], Pull::Up);

        let lines = [48, 49, 50, 51, 52, 53].map(Pin::new);
        for pin in lines {
            self.select_function(pin, Function::Alt3);
        }
        self.set_pull(&lines, Pull::Up);
    }

    /// The BCM2711 EMMC2 controller is wired to the slot internally.
    #[cfg(feature = "bsp_rpi4")]
    pub fn map_emmc(&self) {}
}

impl<B: RegisterBus> driver::interface::DeviceDriver for GPIO<B> {
    type Error = Infallible;

    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }
}
