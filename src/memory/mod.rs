//! Physical memory access.
//!
//! Caches and the MMU are off during both boot stages, so every access is a direct, uncached bus
//! access to the given physical address.

use core::{marker::PhantomData, ops::Add};

/// Metadata trait for marking the type of an address.
pub trait AddressType: Copy + Clone + PartialOrd + PartialEq + Ord + Eq {}

/// Zero-sized type to mark a physical address.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub struct Physical {}

impl AddressType for Physical {}

/// Generic address type.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub struct Address<T: AddressType> {
    value: usize,
    _address_type: PhantomData<fn() -> T>,
}

impl<T: AddressType> Address<T> {
    /// Create an instance.
    pub const fn new(value: usize) -> Self {
        Self {
            value,
            _address_type: PhantomData,
        }
    }

    /// Convert to usize.
    pub const fn as_usize(self) -> usize {
        self.value
    }
}

impl<T: AddressType> Add<usize> for Address<T> {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: usize) -> Self::Output {
        match self.value.checked_add(rhs) {
            None => panic!("Overflow on Address::add"),
            Some(x) => Self::new(x),
        }
    }
}

impl core::fmt::Display for Address<Physical> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let q2: u16 = ((self.value >> 16) & 0xffff) as u16;
        let q1: u16 = (self.value & 0xffff) as u16;

        write!(f, "0x{:04x}_{:04x}", q2, q1)
    }
}

/// Memory interfaces.
pub mod interface {
    use super::{Address, Physical};

    /// Byte access to physical memory outside of any Rust object.
    pub trait PhysicalMemory {
        /// Copy `src` to `dst`, one byte at a time.
        fn write_bytes(&mut self, dst: Address<Physical>, src: &[u8]);

        /// Fill `dst` from physical memory starting at `src`.
        fn read_bytes(&self, src: Address<Physical>, dst: &mut [u8]);
    }
}

/// Direct access to the identity-mapped address space.
pub struct IdentityMapped {
    _private: (),
}

impl IdentityMapped {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The MMU must be off or identity mapping everything that is accessed.
    /// - Targeted regions must not be in use by live Rust objects.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl interface::PhysicalMemory for IdentityMapped {
    fn write_bytes(&mut self, dst: Address<Physical>, src: &[u8]) {
        let dst = dst.as_usize() as *mut u8;

        for (i, byte) in src.iter().enumerate() {
            unsafe { core::ptr::write_volatile(dst.add(i), *byte) }
        }
    }

    fn read_bytes(&self, src: Address<Physical>, dst: &mut [u8]) {
        let src = src.as_usize() as *const u8;

        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! Sparse RAM for exercising code that writes to fixed physical addresses.

    use super::{interface::PhysicalMemory, Address, Physical};
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct FakeRam {
        bytes: BTreeMap<usize, u8>,
        writes: usize,
    }

    impl FakeRam {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `write_bytes` calls so far.
        pub fn write_calls(&self) -> usize {
            self.writes
        }

        pub fn is_untouched(&self) -> bool {
            self.bytes.is_empty()
        }

        /// Bytes at `[addr, addr + len)`; unwritten bytes read as zero.
        pub fn slice(&self, addr: usize, len: usize) -> std::vec::Vec<u8> {
            (addr..addr + len)
                .map(|a| *self.bytes.get(&a).unwrap_or(&0))
                .collect()
        }
    }

    impl PhysicalMemory for FakeRam {
        fn write_bytes(&mut self, dst: Address<Physical>, src: &[u8]) {
            self.writes += 1;
            for (i, byte) in src.iter().enumerate() {
                self.bytes.insert(dst.as_usize() + i, *byte);
            }
        }

        fn read_bytes(&self, src: Address<Physical>, dst: &mut [u8]) {
            for (i, byte) in dst.iter_mut().enumerate() {
                *byte = *self.bytes.get(&(src.as_usize() + i)).unwrap_or(&0);
            }
        }
    }
}
