//! Kernel image header.
//!
//! | Offset | Size | Field                                 |
//! |--------|------|---------------------------------------|
//! | 0x00   | 4    | Magic, `NKRN`                         |
//! | 0x04   | 4    | Version, major << 16 \| minor         |
//! | 0x08   | 4    | Load address                          |
//! | 0x0C   | 4    | Entry address                         |
//! | 0x10   | 4    | Payload size                          |
//! | 0x14   | 4    | CRC-32 of the payload                 |
//! | 0x18   | 40   | Name, not necessarily NUL terminated  |
//!
//! All fields are little-endian. The payload follows at [`HEADER_SIZE`].

use crate::read_le32;
use static_assertions::const_assert_eq;

pub const HEADER_SIZE: usize = 0x40;
pub const KERNEL_MAGIC: u32 = 0x4E4B_524E;

const MAGIC: usize = 0x00;
const VERSION: usize = 0x04;
const LOAD_ADDR: usize = 0x08;
const ENTRY_ADDR: usize = 0x0C;
const IMAGE_SIZE: usize = 0x10;
const CRC32: usize = 0x14;
const NAME: usize = 0x18;
const NAME_LEN: usize = 40;

const_assert_eq!(NAME + NAME_LEN, HEADER_SIZE);

/// A view on the first [`HEADER_SIZE`] bytes of an image.
#[derive(Copy, Clone)]
pub struct KernelHeader<'a> {
    bytes: &'a [u8; HEADER_SIZE],
}

impl<'a> KernelHeader<'a> {
    /// `None` if `image` is shorter than a header.
    pub fn parse(image: &'a [u8]) -> Option<Self> {
        let bytes = image.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn magic(&self) -> u32 {
        read_le32(self.bytes, MAGIC)
    }

    pub fn version(&self) -> u32 {
        read_le32(self.bytes, VERSION)
    }

    pub fn version_major(&self) -> u16 {
        (self.version() >> 16) as u16
    }

    pub fn version_minor(&self) -> u16 {
        self.version() as u16
    }

    pub fn load_addr(&self) -> u32 {
        read_le32(self.bytes, LOAD_ADDR)
    }

    pub fn entry_addr(&self) -> u32 {
        read_le32(self.bytes, ENTRY_ADDR)
    }

    pub fn image_size(&self) -> u32 {
        read_le32(self.bytes, IMAGE_SIZE)
    }

    pub fn crc32(&self) -> u32 {
        read_le32(self.bytes, CRC32)
    }

    /// The name up to the first NUL or the end of the field, whichever comes first.
    pub fn name(&self) -> &'a str {
        let field = &self.bytes[NAME..NAME + NAME_LEN];
        let len = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);

        match core::str::from_utf8(&field[..len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&field[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! Image construction.

    use super::*;
    use crate::loader::crc32::crc32;
    use std::vec::Vec;

    /// A packed image around `payload` with a correct checksum.
    pub fn image(load: u32, entry: u32, name: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&KERNEL_MAGIC.to_le_bytes());
        out.extend_from_slice(&0x0001_0002u32.to_le_bytes());
        out.extend_from_slice(&load.to_le_bytes());
        out.extend_from_slice(&entry.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32(payload).to_le_bytes());

        let mut field = [0u8; NAME_LEN];
        let n = name.len().min(NAME_LEN);
        field[..n].copy_from_slice(&name[..n]);
        out.extend_from_slice(&field);

        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOLDEN: [u8; HEADER_SIZE] = {
        let mut h = [0u8; HEADER_SIZE];
        let fixed: [u8; 24] = [
            0x4E, 0x52, 0x4B, 0x4E, // magic
            0x03, 0x00, 0x02, 0x00, // 2.3
            0x00, 0x00, 0x20, 0x00, // load
            0x40, 0x00, 0x20, 0x00, // entry
            0x10, 0x00, 0x00, 0x00, // size
            0x26, 0x39, 0xF4, 0xCB, // crc
        ];
        let mut i = 0;
        while i < fixed.len() {
            h[i] = fixed[i];
            i += 1;
        }
        h[NAME] = b'T';
        h[NAME + 1] = b'e';
        h[NAME + 2] = b's';
        h[NAME + 3] = b't';
        h
    };

    #[test]
    fn golden_fields() {
        let h = KernelHeader::parse(&GOLDEN).unwrap();

        assert_eq!(h.magic(), KERNEL_MAGIC);
        assert_eq!((h.version_major(), h.version_minor()), (2, 3));
        assert_eq!(h.load_addr(), 0x0020_0000);
        assert_eq!(h.entry_addr(), 0x0020_0040);
        assert_eq!(h.image_size(), 16);
        assert_eq!(h.crc32(), 0xCBF4_3926);
        assert_eq!(h.name(), "Test");
    }

    #[test]
    fn short_images_have_no_header() {
        assert!(KernelHeader::parse(&GOLDEN[..HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn unterminated_name_stays_in_its_field() {
        let mut raw = GOLDEN;
        raw[NAME..].fill(b'A');

        let h = KernelHeader::parse(&raw).unwrap();
        assert_eq!(h.name().len(), NAME_LEN);
    }
}
