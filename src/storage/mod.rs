//! Block storage.

pub mod fat32;

use core::fmt;

/// Size of one addressable block.
pub const SECTOR_SIZE: usize = 512;

/// A device that reads fixed-size blocks.
pub trait BlockDevice {
    type Error: Copy + fmt::Debug + fmt::Display;

    /// Read `count` consecutive blocks starting at `lba` into the front of `dest`.
    ///
    /// `dest` must hold at least `count * SECTOR_SIZE` bytes.
    fn read_blocks(&mut self, lba: u32, count: u32, dest: &mut [u8]) -> Result<(), Self::Error>;

    fn read_block(&mut self, lba: u32, dest: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.read_blocks(lba, 1, dest)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Error = T::Error;

    fn read_blocks(&mut self, lba: u32, count: u32, dest: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read_blocks(lba, count, dest)
    }
}


#[cfg(test)]
mod tests {
    use super::{test_support::*, *};

    fn read_owned<D: BlockDevice>(mut dev: D, lba: u32, buf: &mut [u8; SECTOR_SIZE]) {
        dev.read_block(lba, buf).unwrap();
    }

    #[test]
    fn read_block_goes_through_a_borrowed_device() {
        let mut disk = MemDisk::new(4);
        disk.sector_mut(2)[0] = 0x5A;
        disk.sector_mut(2)[SECTOR_SIZE - 1] = 0xA5;

        let mut buf = [0u8; SECTOR_SIZE];
        read_owned(&mut disk, 2, &mut buf);

        assert_eq!((buf[0], buf[SECTOR_SIZE - 1]), (0x5A, 0xA5));
        assert_eq!(disk.reads, [(2, 1)]);
    }

    #[test]
    fn reads_past_the_end_fail_without_copying() {
        let mut disk = MemDisk::new(2);
        let mut buf = [0xEEu8; 2 * SECTOR_SIZE];

        assert_eq!(disk.read_blocks(1, 2, &mut buf), Err(OutOfRange(2)));
        assert!(buf.iter().all(|&b| b == 0xEE));
        assert_eq!(disk.blocks_read(), 0);
    }
}
