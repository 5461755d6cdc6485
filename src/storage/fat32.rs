//! Read-only FAT32 access to a single file in the root directory of the first partition.

use super::{BlockDevice, SECTOR_SIZE};
use crate::{info, read_le16, read_le32};
use core::{fmt, ops::RangeInclusive};

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const PARTITION_ENTRY: usize = 0x1BE;
const PARTITION_TYPE: usize = PARTITION_ENTRY + 0x04;
const PARTITION_LBA: usize = PARTITION_ENTRY + 0x08;

/// FAT32 with CHS and with LBA addressing.
const FAT32_PARTITION_TYPES: [u8; 2] = [0x0C, 0x0E];

/// Offsets of the file system type string. FAT12/16 tools put it at the first, FAT32 at the
/// second.
const FS_TYPE_OFFSETS: [usize; 2] = [0x36, 0x52];

mod bpb {
    pub const BYTES_PER_SECTOR: usize = 11;
    pub const SECTORS_PER_CLUSTER: usize = 13;
    pub const RESERVED_SECTORS: usize = 14;
    pub const NUM_FATS: usize = 16;
    pub const TOTAL_SECTORS_16: usize = 19;
    pub const SECTORS_PER_FAT_16: usize = 22;
    pub const TOTAL_SECTORS_32: usize = 32;
    pub const SECTORS_PER_FAT_32: usize = 36;
    pub const ROOT_CLUSTER: usize = 44;
}

const DIR_ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

const ENTRY_END: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

mod attr {
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const LONG_NAME: u8 = 0x0F;
}

const CLUSTER_MASK: u32 = 0x0FFF_FFFF;
const CLUSTER_BAD: u32 = 0x0FFF_FFF7;
const CLUSTER_END: u32 = 0x0FFF_FFF8;
const FIRST_DATA_CLUSTER: u32 = 2;

/// FAT errors, generic over the error of the block device below.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FatError<E> {
    /// Sector 0 does not end in 0x55 0xAA.
    BadBootSignature,
    /// The first partition is not a FAT32 one.
    BadPartitionType(u8),
    /// The first partition entry has no start block.
    NoPartition,
    /// No FAT signature in the volume boot record.
    UnknownFilesystem,
    /// A FAT12/16 volume.
    NotFat32,
    UnsupportedSectorSize(u16),
    /// `read_file` before a successful `mount`.
    NotMounted,
    /// No matching entry in the root directory.
    NotFound,
    /// The file does not fit the destination.
    TooLarge { size: u32, capacity: usize },
    /// The block device failed.
    Io(E),
}

impl<E> FatError<E> {
    pub const fn code(&self) -> u32 {
        match self {
            FatError::BadBootSignature
            | FatError::BadPartitionType(_)
            | FatError::NoPartition
            | FatError::NotMounted => 1,
            FatError::UnknownFilesystem
            | FatError::NotFat32
            | FatError::UnsupportedSectorSize(_) => 2,
            FatError::NotFound => 3,
            FatError::Io(_) => 4,
            FatError::TooLarge { .. } => 5,
        }
    }
}

impl<E> From<E> for FatError<E> {
    fn from(x: E) -> Self {
        FatError::Io(x)
    }
}

impl<E: fmt::Display> fmt::Display for FatError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatError::BadBootSignature => write!(f, "bad boot signature"),
            FatError::BadPartitionType(t) => write!(f, "partition type {:#04x} is not FAT32", t),
            FatError::NoPartition => write!(f, "no partition"),
            FatError::UnknownFilesystem => write!(f, "unknown file system"),
            FatError::NotFat32 => write!(f, "FAT12/16 volume"),
            FatError::UnsupportedSectorSize(s) => write!(f, "unsupported sector size {}", s),
            FatError::NotMounted => write!(f, "not mounted"),
            FatError::NotFound => write!(f, "file not found"),
            FatError::TooLarge { size, capacity } => {
                write!(f, "file of {} bytes exceeds buffer of {}", size, capacity)
            }
            FatError::Io(x) => write!(f, "I/O: {}", x),
        }
    }
}

/// One 32-byte short-name record of a directory.
#[derive(Copy, Clone, Debug)]
pub struct DirectoryEntry {
    name: [u8; 11],
    attributes: u8,
    first_cluster: u32,
    size: u32,
}

impl DirectoryEntry {
    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);

        let hi = u32::from(read_le16(raw, 20));
        let lo = u32::from(read_le16(raw, 26));

        Self {
            name,
            attributes: raw[11],
            first_cluster: ((hi << 16) | lo) & CLUSTER_MASK,
            size: read_le32(raw, 28),
        }
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == ENTRY_END
    }

    /// Deleted records, long-name fragments, directories and the volume label.
    pub fn is_skipped(&self) -> bool {
        self.name[0] == ENTRY_DELETED
            || self.attributes == attr::LONG_NAME
            || self.attributes & (attr::DIRECTORY | attr::VOLUME_ID) != 0
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether this is a regular file called `name`, compared case-insensitively.
    pub fn name_matches(&self, name: &str) -> bool {
        if self.is_end() || self.is_skipped() {
            return false;
        }

        match short_name(name) {
            Some(wanted) => self.name.eq_ignore_ascii_case(&wanted),
            None => false,
        }
    }
}

/// `NAME.EXT` as the space-padded 11-byte on-disk form, uppercased.
fn short_name(name: &str) -> Option<[u8; 11]> {
    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) => (base, ext),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }

    let mut out = [b' '; 11];
    for (slot, b) in out[..8].iter_mut().zip(base.bytes()) {
        *slot = b.to_ascii_uppercase();
    }
    for (slot, b) in out[8..].iter_mut().zip(ext.bytes()) {
        *slot = b.to_ascii_uppercase();
    }

    Some(out)
}

/// Volume layout, derived from the boot record.
#[derive(Copy, Clone, Debug)]
struct Geometry {
    fat_start: u32,
    data_start: u32,
    sectors_per_cluster: u32,
    root_cluster: u32,
    /// One past the highest valid cluster number.
    cluster_limit: u32,
}

impl Geometry {
    fn from_boot_record<E>(partition_lba: u32, vbr: &[u8]) -> Result<Self, FatError<E>> {
        let sectors_per_cluster = u32::from(vbr[bpb::SECTORS_PER_CLUSTER]);
        if sectors_per_cluster == 0 {
            return Err(FatError::UnknownFilesystem);
        }

        let reserved = u32::from(read_le16(vbr, bpb::RESERVED_SECTORS));
        let fats = u32::from(vbr[bpb::NUM_FATS]);
        let sectors_per_fat = read_le32(vbr, bpb::SECTORS_PER_FAT_32);
        let total = match read_le32(vbr, bpb::TOTAL_SECTORS_32) {
            0 => u32::from(read_le16(vbr, bpb::TOTAL_SECTORS_16)),
            n => n,
        };

        let fat_start = partition_lba
            .checked_add(reserved)
            .ok_or(FatError::UnknownFilesystem)?;
        let data_start = fats
            .checked_mul(sectors_per_fat)
            .and_then(|n| n.checked_add(fat_start))
            .ok_or(FatError::UnknownFilesystem)?;

        let data_sectors = total.saturating_sub(data_start - partition_lba);
        let cluster_limit =
            (data_sectors / sectors_per_cluster + FIRST_DATA_CLUSTER).min(CLUSTER_BAD);

        Ok(Self {
            fat_start,
            data_start,
            sectors_per_cluster,
            root_cluster: read_le32(vbr, bpb::ROOT_CLUSTER) & CLUSTER_MASK,
            cluster_limit,
        })
    }

    fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    fn is_data_cluster(&self, cluster: u32) -> bool {
        (FIRST_DATA_CLUSTER..self.cluster_limit).contains(&cluster)
    }

    /// Sectors of `cluster`, if all of them are addressable.
    fn cluster_sectors(&self, cluster: u32) -> Option<RangeInclusive<u32>> {
        let first = cluster
            .checked_sub(FIRST_DATA_CLUSTER)?
            .checked_mul(self.sectors_per_cluster)?
            .checked_add(self.data_start)?;
        let last = first.checked_add(self.sectors_per_cluster - 1)?;

        Some(first..=last)
    }

    /// Allocation table sector holding the entry of `cluster`.
    fn fat_sector(&self, cluster: u32) -> Option<u32> {
        self.fat_start.checked_add(cluster / (SECTOR_SIZE / 4) as u32)
    }
}

/// A mounted (or mountable) FAT32 volume.
pub struct Fat32<D> {
    device: D,
    partition_lba: Option<u32>,
    sector: [u8; SECTOR_SIZE],
}

impl<D: BlockDevice> Fat32<D> {
    pub const fn new(device: D) -> Self {
        Self {
            device,
            partition_lba: None,
            sector: [0; SECTOR_SIZE],
        }
    }

    /// Start block of the mounted partition.
    pub fn partition_lba(&self) -> Option<u32> {
        self.partition_lba
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    fn load_sector(&mut self, lba: u32) -> Result<(), FatError<D::Error>> {
        self.device.read_block(lba, &mut self.sector)?;
        Ok(())
    }

    /// Locate the first partition and check that it holds a FAT32 volume.
    pub fn mount(&mut self) -> Result<(), FatError<D::Error>> {
        self.partition_lba = None;

        self.load_sector(0)?;
        if self.sector[510..512] != BOOT_SIGNATURE {
            return Err(FatError::BadBootSignature);
        }

        let partition_type = self.sector[PARTITION_TYPE];
        if !FAT32_PARTITION_TYPES.contains(&partition_type) {
            return Err(FatError::BadPartitionType(partition_type));
        }

        let lba = read_le32(&self.sector, PARTITION_LBA);
        if lba == 0 {
            return Err(FatError::NoPartition);
        }

        self.load_sector(lba)?;
        let signed = FS_TYPE_OFFSETS
            .iter()
            .any(|&at| &self.sector[at..at + 3] == b"FAT");
        if !signed {
            return Err(FatError::UnknownFilesystem);
        }

        let bytes_per_sector = read_le16(&self.sector, bpb::BYTES_PER_SECTOR);
        if usize::from(bytes_per_sector) != SECTOR_SIZE {
            return Err(FatError::UnsupportedSectorSize(bytes_per_sector));
        }

        if read_le16(&self.sector, bpb::SECTORS_PER_FAT_16) != 0 {
            return Err(FatError::NotFat32);
        }

        info!("[FAT] FAT32 partition at LBA {}", lba);
        self.partition_lba = Some(lba);
        Ok(())
    }

    fn geometry(&mut self) -> Result<Geometry, FatError<D::Error>> {
        let lba = self.partition_lba.ok_or(FatError::NotMounted)?;
        self.load_sector(lba)?;
        Geometry::from_boot_record(lba, &self.sector)
    }

    /// Table entry of `cluster`, or `None` once the chain ends or leaves the volume.
    fn next_cluster(
        &mut self,
        geometry: &Geometry,
        cluster: u32,
    ) -> Result<Option<u32>, FatError<D::Error>> {
        let lba = geometry
            .fat_sector(cluster)
            .ok_or(FatError::UnknownFilesystem)?;
        self.load_sector(lba)?;

        let offset = cluster as usize * 4 % SECTOR_SIZE;
        let next = read_le32(&self.sector, offset) & CLUSTER_MASK;
        if next >= CLUSTER_END || next == CLUSTER_BAD || !geometry.is_data_cluster(next) {
            return Ok(None);
        }

        Ok(Some(next))
    }

    fn find_entry(
        &mut self,
        geometry: &Geometry,
        name: &str,
    ) -> Result<DirectoryEntry, FatError<D::Error>> {
        let mut cluster = geometry.root_cluster;
        // A chain can't be longer than the number of clusters.
        let mut budget = geometry.cluster_limit;

        while geometry.is_data_cluster(cluster) && budget > 0 {
            budget -= 1;
            let sectors = geometry
                .cluster_sectors(cluster)
                .ok_or(FatError::UnknownFilesystem)?;

            for lba in sectors {
                self.load_sector(lba)?;

                for i in 0..ENTRIES_PER_SECTOR {
                    let at = i * DIR_ENTRY_SIZE;
                    let entry = DirectoryEntry::parse(&self.sector[at..at + DIR_ENTRY_SIZE]);
                    if entry.is_end() {
                        return Err(FatError::NotFound);
                    }
                    if entry.name_matches(name) {
                        return Ok(entry);
                    }
                }
            }

            match self.next_cluster(geometry, cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }

        Err(FatError::NotFound)
    }

    /// Copy the file `name` from the root directory into `buf`.
    ///
    /// Returns the number of bytes transferred, which is less than the file size if its cluster
    /// chain ends early.
    pub fn read_file(&mut self, name: &str, buf: &mut [u8]) -> Result<usize, FatError<D::Error>> {
        let geometry = self.geometry()?;
        let entry = self.find_entry(&geometry, name)?;

        let size = entry.size() as usize;
        if size > buf.len() {
            return Err(FatError::TooLarge {
                size: entry.size(),
                capacity: buf.len(),
            });
        }
        info!("[FAT] {}: {} bytes from cluster {}", name, size, entry.first_cluster());

        let mut cluster = entry.first_cluster();
        let mut copied = 0;
        let mut budget = geometry.cluster_limit;

        while copied < size && geometry.is_data_cluster(cluster) && budget > 0 {
            budget -= 1;
            let lba = *geometry
                .cluster_sectors(cluster)
                .ok_or(FatError::UnknownFilesystem)?
                .start();
            let chunk = (size - copied).min(geometry.cluster_bytes());

            let whole = chunk / SECTOR_SIZE;
            if whole > 0 {
                let len = whole * SECTOR_SIZE;
                self.device
                    .read_blocks(lba, whole as u32, &mut buf[copied..copied + len])?;
                copied += len;
            }

            let tail = chunk % SECTOR_SIZE;
            if tail > 0 {
                self.load_sector(lba + whole as u32)?;
                buf[copied..copied + tail].copy_from_slice(&self.sector[..tail]);
                copied += tail;
            }

            if copied == size {
                break;
            }

            match self.next_cluster(&geometry, cluster)? {
                Some(next) => cluster = next,
                None => break,
            }
        }

        if copied < size {
            info!("[FAT] Cluster chain ended after {} of {} bytes", copied, size);
        }

        Ok(copied)
    }
}
