//! Live inode and dentry entities.
//!
//! The in-memory tree is held in two arenas owned by the filesystem value,
//! addressed by [`InodeId`] and [`DentryId`] handles. Parent, sibling and
//! inode references are handles rather than pointers, so the dentry ↔ inode
//! cycle of the on-disk model needs no bookkeeping: the arenas own
//! everything, the handles just point.

use crate::errno::{Errno, Result};
use crate::layout::{DATA_BLOCKS_PER_INODE, DentryRecord, FileType, NAME_MAX};
use std::array;

/// Handle on a live inode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InodeId(pub(crate) usize);

/// Handle on a live dentry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DentryId(pub(crate) usize);

/// A name-to-inode binding in the directory namespace.
pub struct Dentry {
    /// The filename.
    name: Vec<u8>,
    /// The inode number the entry points to, `None` until an inode is bound.
    pub ino: Option<u32>,
    /// Kind of the file.
    pub ftype: FileType,
    /// The parent directory's dentry.
    pub parent: Option<DentryId>,
    /// The next sibling in the parent directory's child chain.
    pub brother: Option<DentryId>,
    /// The resolved inode, `None` until lazily materialized.
    pub inode: Option<InodeId>,
}

impl Dentry {
    /// Creates a detached dentry with the given name and kind.
    pub(crate) fn new(name: &[u8], ftype: FileType) -> Result<Self> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Errno::Inval);
        }
        if name.contains(&b'/') || name.contains(&0) {
            return Err(Errno::Inval);
        }
        Ok(Self {
            name: name.to_vec(),
            ino: None,
            ftype,
            parent: None,
            brother: None,
            inode: None,
        })
    }

    /// Creates the root dentry.
    pub(crate) fn root() -> Self {
        Self {
            name: b"/".to_vec(),
            ino: None,
            ftype: FileType::Directory,
            parent: None,
            brother: None,
            inode: None,
        }
    }

    /// Builds a detached dentry from its on-disk record.
    pub(crate) fn from_record(record: &DentryRecord) -> Result<Self> {
        let ftype = FileType::try_from(record.ftype)?;
        Ok(Self {
            name: record.name().to_vec(),
            ino: (record.ino != u32::MAX).then_some(record.ino),
            ftype,
            parent: None,
            brother: None,
            inode: None,
        })
    }

    /// Serializes the dentry to its on-disk record.
    pub(crate) fn to_record(&self) -> DentryRecord {
        let mut name = [0u8; NAME_MAX];
        name[..self.name.len()].copy_from_slice(&self.name);
        DentryRecord {
            name,
            ino: self.ino.unwrap_or(u32::MAX),
            ftype: self.ftype as u32,
        }
    }

    /// Returns the filename bytes.
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

/// Metadata and content of one file or directory.
///
/// A regular file owns up to [`DATA_BLOCKS_PER_INODE`] block-sized data
/// buffers; a directory owns a chain of child dentries threaded through their
/// `brother` handles.
pub struct Inode {
    /// The inode number.
    pub ino: u32,
    /// File size in bytes.
    pub size: u32,
    /// Number of hard links.
    pub link: u32,
    /// Indices of the data blocks backing this file, per slot.
    used_blocks: [Option<u32>; DATA_BLOCKS_PER_INODE],
    /// In-memory data buffers, per slot.
    data: [Option<Vec<u8>>; DATA_BLOCKS_PER_INODE],
    /// The dentry this inode was reached through.
    pub dentry: DentryId,
    /// Head of the child dentry chain, for directories.
    pub children: Option<DentryId>,
    /// Number of child dentries, for directories.
    pub dir_cnt: u32,
}

impl Inode {
    /// Creates an empty inode bound to its back-dentry.
    pub(crate) fn new(ino: u32, dentry: DentryId) -> Self {
        Self {
            ino,
            size: 0,
            link: 1,
            used_blocks: [None; DATA_BLOCKS_PER_INODE],
            data: array::from_fn(|_| None),
            dentry,
            children: None,
            dir_cnt: 0,
        }
    }

    /// Returns the data-block index recorded in the given slot.
    pub fn used_block(&self, slot: usize) -> Option<u32> {
        self.used_blocks[slot]
    }

    pub(crate) fn set_used_block(&mut self, slot: usize, dno: u32) {
        self.used_blocks[slot] = Some(dno);
    }

    /// Serializes the block slots, `-1` marking the unused ones.
    pub(crate) fn used_blocks_record(&self) -> [i32; DATA_BLOCKS_PER_INODE] {
        self.used_blocks.map(|slot| match slot {
            Some(dno) => dno as i32,
            None => -1,
        })
    }

    /// Returns the data buffer of the given slot, if populated.
    pub fn data(&self, slot: usize) -> Option<&[u8]> {
        self.data[slot].as_deref()
    }

    /// Returns the mutable data buffer of the given slot, if populated.
    pub fn data_mut(&mut self, slot: usize) -> Option<&mut [u8]> {
        self.data[slot].as_deref_mut()
    }

    pub(crate) fn set_data(&mut self, slot: usize, buf: Vec<u8>) {
        self.data[slot] = Some(buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dentry_name_validation() {
        assert!(Dentry::new(b"a", FileType::Regular).is_ok());
        assert!(Dentry::new(&[b'x'; NAME_MAX], FileType::Regular).is_ok());
        assert_eq!(
            Dentry::new(b"", FileType::Regular).err(),
            Some(Errno::Inval)
        );
        assert_eq!(
            Dentry::new(&[b'x'; NAME_MAX + 1], FileType::Regular).err(),
            Some(Errno::Inval)
        );
        assert_eq!(
            Dentry::new(b"a/b", FileType::Regular).err(),
            Some(Errno::Inval)
        );
        assert_eq!(
            Dentry::new(b"a\0b", FileType::Regular).err(),
            Some(Errno::Inval)
        );
    }

    #[test]
    fn dentry_record_roundtrip() {
        let mut dentry = Dentry::new(b"notes.txt", FileType::Regular).unwrap();
        dentry.ino = Some(17);
        let record = dentry.to_record();
        assert_eq!(record.name(), b"notes.txt");

        let back = Dentry::from_record(&record).unwrap();
        assert_eq!(back.name(), b"notes.txt");
        assert_eq!(back.ino, Some(17));
        assert_eq!(back.ftype, FileType::Regular);
        assert!(back.inode.is_none());
    }

    #[test]
    fn unassigned_ino_roundtrip() {
        let dentry = Dentry::new(b"fresh", FileType::Directory).unwrap();
        let record = dentry.to_record();
        assert_eq!({ record.ino }, u32::MAX);
        assert_eq!(Dentry::from_record(&record).unwrap().ino, None);
    }

    #[test]
    fn used_blocks_record_marks_unused_slots() {
        let mut inode = Inode::new(3, DentryId(0));
        inode.set_used_block(0, 42);
        inode.set_used_block(1, 7);
        assert_eq!(inode.used_blocks_record(), [42, 7, -1, -1, -1, -1]);
    }
}
