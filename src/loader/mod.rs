//! Kernel image validation and installation.
//!
//! An image is checked completely before any byte of it is written to its load address.

pub mod crc32;
pub mod header;

use crate::{
    bsp::memory::map,
    handoff::{BoardInfo, HandoffDescriptor},
    info,
    memory::{interface::PhysicalMemory, Address, Physical},
};
use core::{fmt, ops::Range};
use crc32::{Checksum, Crc32};
use header::{KernelHeader, HEADER_SIZE, KERNEL_MAGIC};

/// Image errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadError {
    BadMagic(u32),
    /// Zero, above the limit, or running past 4 GiB from the load address.
    TooLarge(u32),
    BadChecksum { expected: u32, computed: u32 },
    /// The image ends before its header or its payload does.
    Truncated,
    /// The load region covers the first stage or the payload being copied.
    Overlap { load: u32, size: u32 },
}

impl LoadError {
    pub const fn code(self) -> u32 {
        match self {
            LoadError::BadMagic(_) => 2,
            LoadError::TooLarge(_) => 3,
            LoadError::BadChecksum { .. } => 4,
            LoadError::Truncated => 5,
            LoadError::Overlap { .. } => 6,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::BadMagic(m) => {
                write!(f, "bad magic {:#010x} (expected {:#010x})", m, KERNEL_MAGIC)
            }
            LoadError::TooLarge(s) => write!(f, "image size {} out of range", s),
            LoadError::BadChecksum { expected, computed } => write!(
                f,
                "CRC32 mismatch: expected {:#010x}, computed {:#010x}",
                expected, computed
            ),
            LoadError::Truncated => write!(f, "image truncated"),
            LoadError::Overlap { load, size } => write!(
                f,
                "load region {:#010x}..{:#010x} overlaps memory in use",
                load,
                u64::from(*load) + u64::from(*size)
            ),
        }
    }
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}

/// An image that passed every check. Only [`ImageLoader::validate`] creates one.
#[derive(Copy, Clone)]
pub struct ValidatedImage<'a> {
    header: KernelHeader<'a>,
    payload: &'a [u8],
}

impl<'a> ValidatedImage<'a> {
    pub fn header(&self) -> &KernelHeader<'a> {
        &self.header
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

/// Checks images and installs them into physical memory.
pub struct ImageLoader<C = Crc32> {
    checksum: C,
    max_size: usize,
    descriptor_addr: Address<Physical>,
    /// Memory owned by the first stage: descriptor page, stack and image.
    reserved: Range<u64>,
}

impl ImageLoader<Crc32> {
    pub const fn new() -> Self {
        Self::with_checksum(Crc32)
    }
}

impl Default for ImageLoader<Crc32> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Checksum> ImageLoader<C> {
    pub const fn with_checksum(checksum: C) -> Self {
        Self {
            checksum,
            max_size: map::KERNEL_MAX_SIZE,
            descriptor_addr: Address::new(map::HANDOFF_DESCRIPTOR),
            reserved: 0..map::LOADER_END as u64,
        }
    }

    /// Check magic, size and checksum, strictly in that order.
    pub fn validate<'a>(&self, image: &'a [u8]) -> Result<ValidatedImage<'a>, LoadError> {
        let header = KernelHeader::parse(image).ok_or(LoadError::Truncated)?;

        if header.magic() != KERNEL_MAGIC {
            return Err(LoadError::BadMagic(header.magic()));
        }

        info!("[Loader] Kernel name    : {}", header.name());
        info!(
            "[Loader] Version        : {}.{}",
            header.version_major(),
            header.version_minor()
        );
        info!("[Loader] Load address   : {:#010x}", header.load_addr());
        info!("[Loader] Entry address  : {:#010x}", header.entry_addr());
        info!("[Loader] Payload size   : {} bytes", header.image_size());

        let size = header.image_size();
        if size == 0 || size as usize > self.max_size {
            return Err(LoadError::TooLarge(size));
        }

        let payload = image
            .get(HEADER_SIZE..HEADER_SIZE + size as usize)
            .ok_or(LoadError::Truncated)?;

        let computed = self.checksum.checksum(payload);
        info!("[Loader] CRC32 expected : {:#010x}", header.crc32());
        info!("[Loader] CRC32 computed : {:#010x}", computed);
        if computed != header.crc32() {
            return Err(LoadError::BadChecksum {
                expected: header.crc32(),
                computed,
            });
        }

        Ok(ValidatedImage { header, payload })
    }

    /// Copy a validated payload to its load address and leave the hand-off descriptor behind.
    ///
    /// The load region must be fresh memory: it may neither touch the first stage nor the
    /// payload it is copied from.
    pub fn install<M: PhysicalMemory>(
        &self,
        image: &ValidatedImage<'_>,
        board: BoardInfo,
        memory: &mut M,
    ) -> Result<HandoffDescriptor, LoadError> {
        let header = image.header();
        let load = header.load_addr() as usize;
        let region = u64::from(header.load_addr())
            ..u64::from(header.load_addr()) + u64::from(header.image_size());
        // Addresses in the descriptor are 32 bits wide.
        if region.end > 1 << 32 {
            return Err(LoadError::TooLarge(header.image_size()));
        }

        let source = image.payload().as_ptr() as u64;
        self.check_free(&region, &(source..source + image.payload().len() as u64))?;

        info!(
            "[Loader] Copying {} bytes to {}",
            image.payload().len(),
            Address::<Physical>::new(load)
        );
        memory.write_bytes(Address::new(load), image.payload());

        let descriptor = HandoffDescriptor::new(
            board,
            header.load_addr(),
            header.entry_addr(),
            header.image_size(),
        );
        memory.write_bytes(self.descriptor_addr, &descriptor.to_bytes());
        info!("[Loader] Hand-off descriptor at {}", self.descriptor_addr);

        Ok(descriptor)
    }

    fn check_free(&self, region: &Range<u64>, source: &Range<u64>) -> Result<(), LoadError> {
        if overlaps(region, &self.reserved) || overlaps(region, source) {
            return Err(LoadError::Overlap {
                load: region.start as u32,
                size: (region.end - region.start) as u32,
            });
        }

        Ok(())
    }

    /// [`validate`](Self::validate), then [`install`](Self::install).
    pub fn load<M: PhysicalMemory>(
        &self,
        image: &[u8],
        board: BoardInfo,
        memory: &mut M,
    ) -> Result<HandoffDescriptor, LoadError> {
        let validated = self.validate(image)?;
        self.install(&validated, board, memory)
    }

    pub fn descriptor_addr(&self) -> Address<Physical> {
        self.descriptor_addr
    }
}
