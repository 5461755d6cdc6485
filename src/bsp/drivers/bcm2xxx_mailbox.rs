//! VideoCore mailbox, property channel.
//!
//! The request buffer is owned by the driver value. Its address, which must be 16-byte aligned,
//! is handed to the firmware through the doorbell register together with the channel number.

use crate::{
    bsp::drivers::common::{MmioBus, RegisterBus},
    bus_registers, cpu, driver,
    handoff::BoardInfo,
    warn,
};
use core::fmt;
use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields,
};

register_bitfields! {
    u32,

    STATUS [
        FULL  OFFSET(31) NUMBITS(1) [],
        EMPTY OFFSET(30) NUMBITS(1) []
    ]
}

/// Mailbox channels.
pub mod channel {
    /// ARM to VideoCore property tags.
    pub const PROPERTY: u8 = 8;
}

/// Property tags.
pub mod tag {
    pub const GET_BOARD_REVISION: u32 = 0x0001_0002;
    pub const GET_ARM_MEMORY: u32 = 0x0001_0005;
    pub const LAST: u32 = 0;
}

const REQUEST: u32 = 0;
const RESPONSE_SUCCESS: u32 = 0x8000_0000;

/// Polls of a status bit before giving up.
const MAX_POLLS: usize = 1_000_000;

const BUFFER_WORDS: usize = 36;

/// Mailbox errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MailboxError {
    /// The FULL or EMPTY status bit never cleared.
    Timeout,
    /// The firmware did not answer with the success code.
    Protocol,
}

impl MailboxError {
    pub const fn code(self) -> u32 {
        match self {
            MailboxError::Timeout => 1,
            MailboxError::Protocol => 2,
        }
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::Timeout => write!(f, "mailbox timeout"),
            MailboxError::Protocol => write!(f, "mailbox protocol error"),
        }
    }
}

#[repr(C, align(16))]
struct MessageBuffer([u32; BUFFER_WORDS]);

/// Representation of the mailbox.
pub struct Mailbox<B = MmioBus> {
    bus: B,
    buffer: MessageBuffer,
}

impl<B: RegisterBus> Mailbox<B> {
    pub const COMPATIBLE: &'static str = "BCM VideoCore Mailbox";

    bus_registers! {
        READ @ 0x00 => (),
        STATUS @ 0x18 => STATUS::Register,
        WRITE @ 0x20 => (),
    }

    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a bus for the correct MMIO start address.
    pub const unsafe fn new(bus: B) -> Self {
        Self {
            bus,
            buffer: MessageBuffer([0; BUFFER_WORDS]),
        }
    }

    /// Address of the message buffer as seen by the firmware.
    pub fn buffer_address(&self) -> usize {
        self.buffer.0.as_ptr() as usize
    }

    fn store(&mut self, index: usize, value: u32) {
        let slot = &mut self.buffer.0[index] as *mut u32;
        unsafe { core::ptr::write_volatile(slot, value) }
    }

    fn load(&self, index: usize) -> u32 {
        unsafe { core::ptr::read_volatile(&self.buffer.0[index]) }
    }

    fn wait_while(&self, field: tock_registers::fields::Field<u32, STATUS::Register>) -> bool {
        for _ in 0..MAX_POLLS {
            if !self.STATUS().is_set(field) {
                return true;
            }
            cpu::nop();
        }

        false
    }

    /// Ring the doorbell for the message in the buffer and wait for the answer.
    pub fn call(&mut self, channel: u8) -> Result<(), MailboxError> {
        let channel = u32::from(channel & 0xF);
        let message = (self.buffer_address() as u32 & !0xF) | channel;

        if !self.wait_while(STATUS::FULL) {
            return Err(MailboxError::Timeout);
        }

        self.WRITE().set(message);

        for _ in 0..MAX_POLLS {
            if !self.wait_while(STATUS::EMPTY) {
                return Err(MailboxError::Timeout);
            }

            // Answers for other channels are dropped.
            let response = self.READ().get();
            if response & 0xF == channel {
                return match self.load(1) {
                    RESPONSE_SUCCESS => Ok(()),
                    _ => Err(MailboxError::Protocol),
                };
            }
        }

        Err(MailboxError::Timeout)
    }

    /// Run a single-tag property request with `value_words` of value space.
    ///
    /// Returns the index of the first value word on success.
    fn property(&mut self, tag: u32, value_words: usize) -> Result<usize, MailboxError> {
        const VALUE_START: usize = 5;
        let total_words = VALUE_START + value_words + 1;

        self.store(0, (total_words * 4) as u32);
        self.store(1, REQUEST);
        self.store(2, tag);
        self.store(3, (value_words * 4) as u32);
        self.store(4, 0);
        for i in 0..value_words {
            self.store(VALUE_START + i, 0);
        }
        self.store(VALUE_START + value_words, tag::LAST);

        self.call(channel::PROPERTY)?;
        Ok(VALUE_START)
    }

    /// Board revision code, or 0 if the query failed.
    pub fn board_revision(&mut self) -> u32 {
        match self.property(tag::GET_BOARD_REVISION, 1) {
            Ok(at) => self.load(at),
            Err(x) => {
                warn!("[MBOX] Board revision query failed: {}", x);
                0
            }
        }
    }

    /// Size of the ARM-visible memory in bytes, or 0 if the query failed.
    pub fn arm_memory(&mut self) -> u32 {
        match self.property(tag::GET_ARM_MEMORY, 2) {
            // Base address first, then size.
            Ok(at) => self.load(at + 1),
            Err(x) => {
                warn!("[MBOX] ARM memory query failed: {}", x);
                0
            }
        }
    }

    /// Both facts in one go.
    pub fn board_info(&mut self) -> BoardInfo {
        BoardInfo {
            revision: self.board_revision(),
            arm_memory: self.arm_memory(),
        }
    }
}

impl<B: RegisterBus> driver::interface::DeviceDriver for Mailbox<B> {
    type Error = MailboxError;

    fn compatible(&self) -> &'static str {
        Self::COMPATIBLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::drivers::common::test_support::FakeBus;
    use std::{cell::Cell, rc::Rc};

    const EMPTY: u32 = 1 << 30;
    const FULL: u32 = 1 << 31;

    /// Answer property requests the way the firmware does.
    fn attach_firmware(bus: &FakeBus, buffer: usize, revision: u32, memory: u32, code: u32) {
        bus.poke(0x18, EMPTY);
        bus.on_write(move |regs, offset, value| {
            if offset != 0x20 {
                return;
            }

            let buf = buffer as *mut u32;
            unsafe {
                match *buf.add(2) {
                    tag::GET_BOARD_REVISION => *buf.add(5) = revision,
                    tag::GET_ARM_MEMORY => {
                        *buf.add(5) = 0;
                        *buf.add(6) = memory;
                    }
                    _ => {}
                }
                *buf.add(4) |= 0x8000_0000;
                *buf.add(1) = code;
            }

            regs[0] = value;
            regs[0x18 / 4] = 0;
        });
    }

    #[test]
    fn buffer_is_16_byte_aligned() {
        let bus = FakeBus::new();
        let mbox = unsafe { Mailbox::new(&bus) };
        assert!(crate::is_aligned(mbox.buffer_address(), 16));
    }

    #[test]
    fn board_revision_request_layout() {
        let bus = FakeBus::new();
        let mut mbox = unsafe { Mailbox::new(&bus) };
        attach_firmware(&bus, mbox.buffer_address(), 0x00a0_2082, 0, RESPONSE_SUCCESS);

        assert_eq!(mbox.board_revision(), 0x00a0_2082);

        let words: std::vec::Vec<u32> = (0..7).map(|i| mbox.load(i)).collect();
        assert_eq!(
            words,
            [7 * 4, RESPONSE_SUCCESS, 0x0001_0002, 4, 0x8000_0000, 0x00a0_2082, 0]
        );

        let doorbell = bus.writes_to(0x20)[0];
        assert_eq!(doorbell & 0xF, 8);
        assert_eq!(doorbell & !0xF, mbox.buffer_address() as u32);
    }

    #[test]
    fn arm_memory_reads_size_word() {
        let bus = FakeBus::new();
        let mut mbox = unsafe { Mailbox::new(&bus) };
        attach_firmware(&bus, mbox.buffer_address(), 0, 0x3C00_0000, RESPONSE_SUCCESS);

        assert_eq!(mbox.arm_memory(), 0x3C00_0000);
        assert_eq!(mbox.load(0), 8 * 4);
        assert_eq!(mbox.load(3), 8);
    }

    #[test]
    fn error_response_is_a_protocol_failure() {
        let bus = FakeBus::new();
        let mut mbox = unsafe { Mailbox::new(&bus) };
        attach_firmware(&bus, mbox.buffer_address(), 0x1234, 0, 0x8000_0001);

        assert_eq!(mbox.property(tag::GET_BOARD_REVISION, 1), Err(MailboxError::Protocol));
        assert_eq!(mbox.board_revision(), 0);
    }

    #[test]
    fn full_mailbox_times_out_without_ringing() {
        let bus = FakeBus::new();
        bus.poke(0x18, FULL);
        let mut mbox = unsafe { Mailbox::new(&bus) };

        assert_eq!(mbox.call(channel::PROPERTY), Err(MailboxError::Timeout));
        assert!(bus.writes_to(0x20).is_empty());
        assert_eq!(mbox.board_info(), BoardInfo { revision: 0, arm_memory: 0 });
    }

    #[test]
    fn answers_on_other_channels_are_skipped() {
        let bus = FakeBus::new();
        let mut mbox = unsafe { Mailbox::new(&bus) };
        let buffer = mbox.buffer_address();
        attach_firmware(&bus, buffer, 0x42, 0, RESPONSE_SUCCESS);

        // First answer arrives on channel 1, the second one is ours.
        let reads = Rc::new(Cell::new(0));
        let seen = reads.clone();
        bus.on_read(move |regs, offset| {
            if offset != 0x00 {
                return None;
            }
            seen.set(seen.get() + 1);
            if seen.get() == 1 {
                Some(1)
            } else {
                Some(regs[0])
            }
        });

        assert_eq!(mbox.board_revision(), 0x42);
        assert_eq!(reads.get(), 2);
    }
}
