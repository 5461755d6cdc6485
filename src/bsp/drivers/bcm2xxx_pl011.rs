//! PL011 UART driver.
//!
//! Fully polled. Transmit and receive waits are unbounded: a console that never drains blocks
//! the caller.

use crate::{
    bsp::drivers::common::{MmioBus, RegisterBus},
    bus_registers, console, cpu, driver,
    synchronization::{interface::Mutex, NullLock},
};
use core::{convert::Infallible, fmt};
use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields,
};

// PL011 UART registers.
//
// Descriptions taken from "PrimeCell UART (PL011) Technical Reference Manual" r1p5.
register_bitfields! {
    u32,

    /// Flag Register.
    FR [
        /// Transmit FIFO empty.
        TXFE OFFSET(7) NUMBITS(1) [],

        /// Transmit FIFO full.
        TXFF OFFSET(5) NUMBITS(1) [],

        /// Receive FIFO empty.
        RXFE OFFSET(4) NUMBITS(1) [],

        /// UART busy transmitting.
        BUSY OFFSET(3) NUMBITS(1) []
    ],

    /// Integer Baud Rate Divisor.
    IBRD [
        BAUD_DIVINT OFFSET(0) NUMBITS(16) []
    ],

    /// Fractional Baud Rate Divisor.
    FBRD [
        BAUD_DIVFRAC OFFSET(0) NUMBITS(6) []
    ],

    /// Line Control Register.
    LCR_H [
        /// Word length.
        WLEN OFFSET(5) NUMBITS(2) [
            FiveBit = 0b00,
            SixBit = 0b01,
            SevenBit = 0b10,
            EightBit = 0b11
        ],

        /// Enable FIFOs.
        FEN  OFFSET(4) NUMBITS(1) [
            FifosDisabled = 0,
            FifosEnabled = 1
        ]
    ],

    /// Control Register.
    CR [
        /// Receive enable.
        RXE OFFSET(9) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// Transmit enable.
        TXE OFFSET(8) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ],

        /// UART enable.
        UARTEN OFFSET(0) NUMBITS(1) [
            Disabled = 0,
            Enabled = 1
        ]
    ],

    /// Interrupt Mask Set/Clear Register.
    IMSC [
        ALL OFFSET(0) NUMBITS(11) []
    ],

    /// Interrupt Clear Register.
    ICR [
        /// Meta field for all pending interrupts.
        ALL OFFSET(0) NUMBITS(11) []
    ]
}

/// Integer and fractional baud rate divisors for `clock_hz` and `baud`.
///
/// `divisor = clock / (16 * baud)`, the 6-bit fraction is the rounded remainder times 64.
pub const fn baud_divisors(clock_hz: u32, baud: u32) -> (u32, u32) {
    let div = 16 * baud as u64;
    let clock = clock_hz as u64;

    let mut ibrd = clock / div;
    let mut fbrd = ((clock % div) * 64 + div / 2) / div;

    if fbrd == 64 {
        ibrd += 1;
        fbrd = 0;
    }

    (ibrd as u32, fbrd as u32)
}

struct PL011UartInner<B> {
    bus: B,
}

impl<B: RegisterBus> PL011UartInner<B> {
    bus_registers! {
        DR @ 0x00 => (),
        FR @ 0x18 => FR::Register,
        IBRD @ 0x24 => IBRD::Register,
        FBRD @ 0x28 => FBRD::Register,
        LCR_H @ 0x2C => LCR_H::Register,
        CR @ 0x30 => CR::Register,
        IMSC @ 0x38 => IMSC::Register,
        ICR @ 0x44 => ICR::Register,
    }

    const fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Set up baud rate and characteristics: 8N1, FIFOs on, no interrupts.
    fn init(&mut self, clock_hz: u32, baud: u32) {
        let (ibrd, fbrd) = baud_divisors(clock_hz, baud);

        // Turn it off temporarily.
        self.CR().set(0);

        self.ICR().write(ICR::ALL.val(0x7FF));
        self.IBRD().write(IBRD::BAUD_DIVINT.val(ibrd));
        self.FBRD().write(FBRD::BAUD_DIVFRAC.val(fbrd));
        self.LCR_H()
            .write(LCR_H::WLEN::EightBit + LCR_H::FEN::FifosEnabled);
        self.IMSC().set(0);
        self.CR()
            .write(CR::UARTEN::Enabled + CR::TXE::Enabled + CR::RXE::Enabled);
    }

    /// Send a character. A line feed is preceded by a carriage return.
    fn put_char(&mut self, c: u8) {
        if c == b'\n' {
            self.put_char(b'\r');
        }

        // Spin while TX FIFO full is set, waiting for an empty slot.
        while self.FR().is_set(FR::TXFF) {
            cpu::nop();
        }

        self.DR().set(c as u32);
    }

    /// Receive a character.
    fn get_char(&mut self) -> u8 {
        // Spin while RX FIFO empty is set.
        while self.FR().is_set(FR::RXFE) {
            cpu::nop();
        }

        (self.DR().get() & 0xFF) as u8
    }

    fn flush(&self) {
        while !self.FR().is_set(FR::TXFE) || self.FR().is_set(FR::BUSY) {
            cpu::nop();
        }
    }
}

impl<B: RegisterBus> fmt::Write for PL011UartInner<B> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.put_char(b);
        }

        Ok(())
    }
}

/// Representation of the UART.
pub struct PL011Uart<B = MmioBus> {
    inner: NullLock<PL011UartInner<B>>,
    clock_hz: u32,
    baud: u32,
}

impl<B: RegisterBus> PL011Uart<B> {
    pub const COMPATIBLE: &'static str = "BCM PL011 UART";

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a bus for the correct MMIO start address.
    pub const unsafe fn new(bus: B, clock_hz: u32, baud: u32) -> Self {
        Self {
            inner: NullLock::new(PL011UartInner::new(bus)),
            clock_hz,
            baud,
        }
    }

    /// Blocking transmit of one byte.
    pub fn put_char(&self, c: u8) {
        self.inner.lock(|inner| inner.put_char(c))
    }

    /// Blocking receive of one byte.
    pub fn get_char(&self) -> u8 {
        self.inner.lock(|inner| inner.get_char())
    }

    pub fn put_string(&self, s: &str) {
        self.inner.lock(|inner| {
            for b in s.bytes() {
                inner.put_char(b);
            }
        })
    }
}

impl<B: RegisterBus> driver::interface::DeviceDriver for PL011Uart<B> {
    type Error = Infallible;

    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }

    unsafe fn init(&self) -> Result<(), Self::Error> {
        self.inner.lock(|inner| inner.init(self.clock_hz, self.baud));

        Ok(())
    }
}

impl<B: RegisterBus> console::interface::Write for PL011Uart<B> {
    fn write_char(&self, c: char) {
        let mut buf = [0u8; 4];
        self.put_string(c.encode_utf8(&mut buf));
    }

    fn write_str(&self, s: &str) {
        self.put_string(s)
    }

    fn write_fmt(&self, args: core::fmt::Arguments) -> fmt::Result {
        self.inner.lock(|inner| fmt::Write::write_fmt(inner, args))
    }

    fn flush(&self) {
        self.inner.lock(|inner| inner.flush())
    }
}

impl<B: RegisterBus> console::interface::Read for PL011Uart<B> {
    fn read_char(&self) -> char {
        self.get_char() as char
    }
}

impl<B: RegisterBus + Send> console::interface::Console for PL011Uart<B> {}
