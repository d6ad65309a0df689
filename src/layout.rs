//! On-disk layout of the filesystem.
//!
//! The device is partitioned, in order, into the superblock, the inode bitmap,
//! the data bitmap, the inode table and the data region. Region sizes are
//! fixed at format time; the superblock stores the derived byte offsets so a
//! later mount does not have to re-derive them.
//!
//! The records in this module are the exact byte images persisted on disk.
//! Multi-byte integers use the native representation of the platform the
//! filesystem was created on.

use crate::device::Device;
use crate::errno::Result;
use crate::util::{reinterpret, reinterpret_mut};
use std::mem;

/// The superblock signature.
pub const MAGIC: u32 = 0x52415453;
/// The byte offset of the superblock on the device.
pub const SUPERBLOCK_OFFSET: u64 = 0;

/// Number of logical blocks reserved for the superblock.
pub const SUPERBLOCK_BLOCKS: u32 = 1;
/// Number of logical blocks of the inode bitmap.
pub const INODE_BITMAP_BLOCKS: u32 = 1;
/// Number of logical blocks of the data bitmap.
pub const DATA_BITMAP_BLOCKS: u32 = 1;
/// Number of logical blocks of the inode table.
pub const INODE_BLOCKS: u32 = 585;
/// Number of logical blocks of the data region.
pub const DATA_BLOCKS: u32 = 3508;

/// Maximum length of a filename in bytes.
pub const NAME_MAX: usize = 128;
/// Nominal number of packed inodes per logical block.
///
/// The inode table is addressed one inode per block (see
/// [`InodeRecord`]); this packing factor is part of the on-disk contract but
/// not enforced.
pub const INODES_PER_BLOCK: u32 = 16;
/// Number of data-block slots of a single inode.
pub const DATA_BLOCKS_PER_INODE: usize = 6;
/// Inode number of the root directory.
pub const ROOT_INO: u32 = 0;

/// Kind of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum FileType {
    /// A regular file.
    Regular = 0,
    /// A directory.
    Directory = 1,
}

impl TryFrom<u32> for FileType {
    type Error = crate::errno::Errno;

    fn try_from(val: u32) -> Result<Self> {
        match val {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Directory),
            _ => Err(crate::errno::Errno::Inval),
        }
    }
}

/// On-disk image of the superblock.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SuperblockRecord {
    /// The superblock signature.
    pub magic: u32,
    /// Usage counter.
    pub usage: i32,
    /// Number of blocks of the inode bitmap.
    pub inode_bitmap_blocks: i32,
    /// Byte offset of the inode bitmap.
    pub inode_bitmap_off: i32,
    /// Byte offset of the data bitmap.
    pub data_bitmap_off: i32,
    /// Number of blocks of the data bitmap.
    pub data_bitmap_blocks: i32,
    /// Byte offset of the data region.
    pub data_off: i32,
    /// Byte offset of the inode table.
    pub inode_off: i32,
}

impl SuperblockRecord {
    /// Reads the superblock record from the device.
    pub fn read(dev: &mut Device) -> Result<Self> {
        read_record(dev, SUPERBLOCK_OFFSET)
    }

    /// Writes the superblock record to the device.
    pub fn write(&self, dev: &mut Device) -> Result<()> {
        write_record(dev, SUPERBLOCK_OFFSET, self)
    }
}

/// On-disk image of an inode.
///
/// The record of inode `i` lives at `inode_off + i × BLOCK`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct InodeRecord {
    /// The inode number.
    pub ino: u32,
    /// File size in bytes.
    pub size: i32,
    /// Number of hard links.
    pub link: i32,
    /// Kind of the file, one of the [`FileType`] values.
    pub ftype: u32,
    /// Indices of the data blocks used by the file, `-1` for unused slots.
    pub used_blocks: [i32; DATA_BLOCKS_PER_INODE],
    /// Number of directory entries, for directories.
    pub dir_cnt: i32,
}

impl InodeRecord {
    /// Reads an inode record at the given byte offset.
    pub fn read(dev: &mut Device, offset: u64) -> Result<Self> {
        read_record(dev, offset)
    }

    /// Writes the inode record at the given byte offset.
    pub fn write(&self, dev: &mut Device, offset: u64) -> Result<()> {
        write_record(dev, offset, self)
    }
}

/// On-disk image of a directory entry.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct DentryRecord {
    /// The filename, padded with zeros.
    pub name: [u8; NAME_MAX],
    /// The inode number the entry points to, `u32::MAX` if unassigned.
    pub ino: u32,
    /// Kind of the file, one of the [`FileType`] values.
    pub ftype: u32,
}

impl DentryRecord {
    /// Reads a dentry record at the given byte offset.
    pub fn read(dev: &mut Device, offset: u64) -> Result<Self> {
        read_record(dev, offset)
    }

    /// Writes the dentry record at the given byte offset.
    pub fn write(&self, dev: &mut Device, offset: u64) -> Result<()> {
        write_record(dev, offset, self)
    }

    /// Returns the filename bytes, up to the first NUL.
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_MAX);
        &self.name[..len]
    }
}

/// Reads the record at the given byte offset.
fn read_record<T>(dev: &mut Device, offset: u64) -> Result<T> {
    let mut record: T = unsafe { mem::zeroed() };
    dev.read_at(offset, reinterpret_mut(&mut record))?;
    Ok(record)
}

/// Writes the record at the given byte offset.
fn write_record<T>(dev: &mut Device, offset: u64, record: &T) -> Result<()> {
    dev.write_at(offset, reinterpret(record))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn record_sizes() {
        assert_eq!(size_of::<SuperblockRecord>(), 32);
        assert_eq!(size_of::<InodeRecord>(), 44);
        assert_eq!(size_of::<DentryRecord>(), 136);
        // nominal packing factor of the inode table
        assert!(INODES_PER_BLOCK as usize * size_of::<InodeRecord>() <= 1024);
    }

    #[test]
    fn regions_fill_the_device() {
        let blocks = SUPERBLOCK_BLOCKS
            + INODE_BITMAP_BLOCKS
            + DATA_BITMAP_BLOCKS
            + INODE_BLOCKS
            + DATA_BLOCKS;
        // 4 MiB device, 1024-byte logical blocks
        assert_eq!(blocks as u64 * 1024, 4 * 1024 * 1024);
    }

    #[test]
    fn dentry_record_name() {
        let mut rec: DentryRecord = unsafe { std::mem::zeroed() };
        rec.name[..5].copy_from_slice(b"hello");
        assert_eq!(rec.name(), b"hello");

        rec.name.fill(b'x');
        assert_eq!(rec.name().len(), NAME_MAX);
    }
}
