//! Common device driver code.

use crate::memory::{Address, Physical};
use core::marker::PhantomData;
use tock_registers::{
    interfaces::{Readable, Writeable},
    RegisterLongName,
};

/// Access to a block of 32-bit device registers addressed by byte offset.
///
/// Every call must result in exactly one bus access.
pub trait RegisterBus {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

impl<B: RegisterBus + ?Sized> RegisterBus for &B {
    #[inline(always)]
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    #[inline(always)]
    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Volatile access to a memory-mapped register block.
#[derive(Copy, Clone)]
pub struct MmioBus {
    start_addr: Address<Physical>,
}

impl MmioBus {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(start_addr: Address<Physical>) -> Self {
        Self { start_addr }
    }
}

impl RegisterBus for MmioBus {
    #[inline(always)]
    fn read32(&self, offset: usize) -> u32 {
        let addr = (self.start_addr + offset).as_usize() as *const u32;
        unsafe { core::ptr::read_volatile(addr) }
    }

    #[inline(always)]
    fn write32(&self, offset: usize, value: u32) {
        let addr = (self.start_addr + offset).as_usize() as *mut u32;
        unsafe { core::ptr::write_volatile(addr, value) }
    }
}

/// A single register of a [`RegisterBus`], typed with its bitfield layout.
pub struct BusRegister<'a, B: ?Sized, R: RegisterLongName = ()> {
    bus: &'a B,
    offset: usize,
    _layout: PhantomData<R>,
}

impl<'a, B: RegisterBus + ?Sized, R: RegisterLongName> BusRegister<'a, B, R> {
    #[inline(always)]
    pub fn new(bus: &'a B, offset: usize) -> Self {
        Self {
            bus,
            offset,
            _layout: PhantomData,
        }
    }
}

impl<B: RegisterBus + ?Sized, R: RegisterLongName> Readable for BusRegister<'_, B, R> {
    type T = u32;
    type R = R;

    #[inline(always)]
    fn get(&self) -> u32 {
        self.bus.read32(self.offset)
    }
}

impl<B: RegisterBus + ?Sized, R: RegisterLongName> Writeable for BusRegister<'_, B, R> {
    type T = u32;
    type R = R;

    #[inline(always)]
    fn set(&self, value: u32) {
        self.bus.write32(self.offset, value)
    }
}

/// Generate typed register accessors over the driver's `bus` field.
///
/// Used inside an `impl<B: RegisterBus> ...` block.
#[macro_export]
macro_rules! bus_registers {
    ($($name:ident @ $offset:literal => $layout:ty),* $(,)?) => {
        $(
            #[allow(non_snake_case)]
            #[inline(always)]
            fn $name(&self) -> $crate::bsp::drivers::common::BusRegister<'_, B, $layout> {
                $crate::bsp::drivers::common::BusRegister::new(&self.bus, $offset)
            }
        )*
    };
}

/// A wrapper type for usize with integrated range bound check.
#[derive(Copy, Clone)]
pub struct BoundedUsize<const MAX_INCLUSIVE: usize>(usize);

impl<const MAX_INCLUSIVE: usize> BoundedUsize<{ MAX_INCLUSIVE }> {
    pub const MAX_INCLUSIVE: usize = MAX_INCLUSIVE;

    /// Creates a new instance if number <= MAX_INCLUSIVE.
    pub const fn new(number: usize) -> Self {
        assert!(number <= MAX_INCLUSIVE);

        Self(number)
    }

    /// Return the wrapped number.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl<const MAX_INCLUSIVE: usize> core::fmt::Display for BoundedUsize<{ MAX_INCLUSIVE }> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
pub mod test_support {
    //! A register file standing in for real hardware.

    use super::RegisterBus;
    use std::{boxed::Box, cell::RefCell, vec::Vec};

    /// Number of 32-bit registers a fake device exposes.
    pub const FAKE_BUS_WORDS: usize = 64;

    pub type Registers = [u32; FAKE_BUS_WORDS];
    type WriteHook = Box<dyn FnMut(&mut Registers, usize, u32)>;
    type ReadHook = Box<dyn FnMut(&mut Registers, usize) -> Option<u32>>;

    /// Fake register bus. Reads return the last written value unless a read hook overrides it.
    pub struct FakeBus {
        regs: RefCell<Registers>,
        writes: RefCell<Vec<(usize, u32)>>,
        reads: RefCell<usize>,
        on_write: RefCell<Option<WriteHook>>,
        on_read: RefCell<Option<ReadHook>>,
    }

    impl FakeBus {
        pub fn new() -> Self {
            Self {
                regs: RefCell::new([0; FAKE_BUS_WORDS]),
                writes: RefCell::new(Vec::new()),
                reads: RefCell::new(0),
                on_write: RefCell::new(None),
                on_read: RefCell::new(None),
            }
        }

        /// Preset a register without logging a write.
        pub fn poke(&self, offset: usize, value: u32) {
            self.regs.borrow_mut()[offset / 4] = value;
        }

        /// Current register value without going through the read hook.
        pub fn peek(&self, offset: usize) -> u32 {
            self.regs.borrow()[offset / 4]
        }

        /// Called after every write with the register file and the written offset and value.
        pub fn on_write(&self, hook: impl FnMut(&mut Registers, usize, u32) + 'static) {
            *self.on_write.borrow_mut() = Some(Box::new(hook));
        }

        /// Called on every read. Returning `Some` overrides the stored value.
        pub fn on_read(&self, hook: impl FnMut(&mut Registers, usize) -> Option<u32> + 'static) {
            *self.on_read.borrow_mut() = Some(Box::new(hook));
        }

        /// All writes in order.
        pub fn writes(&self) -> Vec<(usize, u32)> {
            self.writes.borrow().clone()
        }

        /// Writes to a single register in order.
        pub fn writes_to(&self, offset: usize) -> Vec<u32> {
            self.writes
                .borrow()
                .iter()
                .filter(|(o, _)| *o == offset)
                .map(|(_, v)| *v)
                .collect()
        }

        pub fn read_count(&self) -> usize {
            *self.reads.borrow()
        }
    }

    impl Default for FakeBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RegisterBus for FakeBus {
        fn read32(&self, offset: usize) -> u32 {
            *self.reads.borrow_mut() += 1;

            let mut regs = self.regs.borrow_mut();
            if let Some(hook) = self.on_read.borrow_mut().as_mut() {
                if let Some(value) = hook(&mut *regs, offset) {
                    return value;
                }
            }
            regs[offset / 4]
        }

        fn write32(&self, offset: usize, value: u32) {
            self.writes.borrow_mut().push((offset, value));

            let mut regs = self.regs.borrow_mut();
            regs[offset / 4] = value;
            if let Some(hook) = self.on_write.borrow_mut().as_mut() {
                hook(&mut *regs, offset, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeBus;
    use super::*;
    use tock_registers::{interfaces::ReadWriteable, register_bitfields};

    register_bitfields! {
        u32,
        CTRL [
            ENABLE OFFSET(0) NUMBITS(1) [],
            MODE OFFSET(4) NUMBITS(3) []
        ]
    }

    struct Device<B> {
        bus: B,
    }

    impl<B: RegisterBus> Device<B> {
        crate::bus_registers! {
            CTRL @ 0x08 => CTRL::Register,
            DATA @ 0x0c => (),
        }
    }

    #[test]
    fn bus_register_supports_bitfield_access() {
        let bus = FakeBus::new();
        let dev = Device { bus: &bus };

        dev.CTRL().write(CTRL::MODE.val(5));
        dev.CTRL().modify(CTRL::ENABLE::SET);
        dev.DATA().set(0xdead_beef);

        assert_eq!(bus.peek(0x08), 0x51);
        assert!(dev.CTRL().is_set(CTRL::ENABLE));
        assert_eq!(dev.CTRL().read(CTRL::MODE), 5);
        assert_eq!(bus.writes_to(0x0c), [0xdead_beef]);
    }

    #[test]
    fn bounded_usize_accepts_upper_bound() {
        assert_eq!(BoundedUsize::<53>::new(53).get(), 53);
    }

    #[test]
    #[should_panic]
    fn bounded_usize_rejects_out_of_range() {
        BoundedUsize::<53>::new(54);
    }
}
