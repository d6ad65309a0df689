//! The live filesystem: mount, lookup, allocation and write-back.
//!
//! All state lives in a [`NewFs`] value: the device handle, the two bitmaps,
//! the region offsets and the arenas holding the materialized inode/dentry
//! tree. Operations are serialized by the caller; nothing here locks.
//!
//! The tree is built lazily: mounting materializes only the root inode, and
//! [`NewFs::lookup`] pulls directories in from disk as the path walk first
//! traverses them. [`NewFs::umount`] pushes the whole reachable tree back out
//! and writes the superblock and bitmaps last.

use crate::bitmap::Bitmap;
use crate::device::Device;
use crate::errno::{Errno, Result};
use crate::layout::{
    DATA_BITMAP_BLOCKS, DATA_BLOCKS, DATA_BLOCKS_PER_INODE, DentryRecord, FileType,
    INODE_BITMAP_BLOCKS, INODE_BLOCKS, InodeRecord, MAGIC, ROOT_INO, SUPERBLOCK_BLOCKS,
    SUPERBLOCK_OFFSET, SuperblockRecord,
};
use crate::node::{Dentry, DentryId, Inode, InodeId};
use std::mem::size_of;
use std::path::PathBuf;

/// Mount configuration.
///
/// The backing device path is the only recognized option.
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// Path to the backing block device or image file.
    pub device: PathBuf,
}

/// Outcome of a path lookup.
#[derive(Clone, Copy, Debug)]
pub struct LookupResult {
    /// The dentry the walk ended on: the named entry if `found`, otherwise
    /// the deepest directory reached.
    pub dentry: DentryId,
    /// Whether the full path resolved.
    pub found: bool,
    /// Whether the path named the root itself.
    pub is_root: bool,
}

/// A mounted filesystem.
pub struct NewFs {
    device: Device,
    /// Usage counter carried through the superblock.
    usage: i32,
    /// Capacity of the inode table.
    max_inodes: usize,
    /// Capacity of the data region.
    max_data: usize,
    inode_bitmap: Bitmap,
    inode_bitmap_blocks: u32,
    inode_bitmap_off: u64,
    data_bitmap: Bitmap,
    data_bitmap_blocks: u32,
    data_bitmap_off: u64,
    /// Byte offset of the inode table.
    inode_off: u64,
    /// Byte offset of the data region.
    data_off: u64,
    root: DentryId,
    dentries: Vec<Dentry>,
    inodes: Vec<Inode>,
}

impl NewFs {
    /// Mounts the filesystem on the device named by `options`.
    ///
    /// A device without the filesystem signature is formatted in memory: the
    /// region offsets are derived, both bitmaps are cleared and a root inode
    /// is allocated and written out. The root inode is then read back through
    /// the regular path either way.
    pub fn mount(options: &MountOptions) -> Result<Self> {
        let mut device = Device::open(&options.device)?;
        let block_size = device.block_size();

        let mut record = SuperblockRecord::read(&mut device)?;
        let is_init = record.magic != MAGIC;
        if is_init {
            log::debug!(
                "no filesystem signature on {}, formatting",
                options.device.display()
            );
            record.magic = MAGIC;
            record.usage = 0;
            record.inode_bitmap_blocks = INODE_BITMAP_BLOCKS as i32;
            record.data_bitmap_blocks = DATA_BITMAP_BLOCKS as i32;
            record.inode_bitmap_off =
                (SUPERBLOCK_OFFSET + SUPERBLOCK_BLOCKS as u64 * block_size) as i32;
            record.data_bitmap_off =
                record.inode_bitmap_off + (INODE_BITMAP_BLOCKS as u64 * block_size) as i32;
            record.inode_off =
                record.data_bitmap_off + (DATA_BITMAP_BLOCKS as u64 * block_size) as i32;
            record.data_off = record.inode_off + (INODE_BLOCKS as u64 * block_size) as i32;
        }

        let inode_bitmap_len = (record.inode_bitmap_blocks as u64 * block_size) as usize;
        let data_bitmap_len = (record.data_bitmap_blocks as u64 * block_size) as usize;
        let mut fs = Self {
            usage: record.usage,
            max_inodes: INODE_BLOCKS as usize,
            max_data: DATA_BLOCKS as usize,
            inode_bitmap: Bitmap::zeroed(inode_bitmap_len),
            inode_bitmap_blocks: record.inode_bitmap_blocks as u32,
            inode_bitmap_off: record.inode_bitmap_off as u64,
            data_bitmap: Bitmap::zeroed(data_bitmap_len),
            data_bitmap_blocks: record.data_bitmap_blocks as u32,
            data_bitmap_off: record.data_bitmap_off as u64,
            inode_off: record.inode_off as u64,
            data_off: record.data_off as u64,
            device,
            root: DentryId(0),
            dentries: Vec::new(),
            inodes: Vec::new(),
        };

        // a fresh format keeps the cleared bitmaps, so first-fit starts at 0
        if !is_init {
            let mut bytes = vec![0; inode_bitmap_len];
            fs.device.read_at(fs.inode_bitmap_off, &mut bytes)?;
            fs.inode_bitmap = Bitmap::from_bytes(bytes);
            let mut bytes = vec![0; data_bitmap_len];
            fs.device.read_at(fs.data_bitmap_off, &mut bytes)?;
            fs.data_bitmap = Bitmap::from_bytes(bytes);
        }

        let root = fs.insert_dentry(Dentry::root());
        fs.root = root;
        if is_init {
            let root_inode = fs.alloc_inode(root)?;
            fs.sync_inode(root_inode)?;
        }
        fs.read_inode(root, ROOT_INO)?;
        Ok(fs)
    }

    /// Unmounts the filesystem.
    ///
    /// Recursively writes the reachable tree back, then the superblock, then
    /// both bitmaps. The device closes when the value is dropped; a failure
    /// skips the remaining steps.
    pub fn umount(mut self) -> Result<()> {
        let root_inode = self.dentries[self.root.0].inode.ok_or(Errno::Inval)?;
        self.sync_inode(root_inode)?;

        let record = SuperblockRecord {
            magic: MAGIC,
            usage: self.usage,
            inode_bitmap_blocks: self.inode_bitmap_blocks as i32,
            inode_bitmap_off: self.inode_bitmap_off as i32,
            data_bitmap_off: self.data_bitmap_off as i32,
            data_bitmap_blocks: self.data_bitmap_blocks as i32,
            data_off: self.data_off as i32,
            inode_off: self.inode_off as i32,
        };
        record.write(&mut self.device)?;
        self.device
            .write_at(self.inode_bitmap_off, self.inode_bitmap.as_bytes())?;
        self.device
            .write_at(self.data_bitmap_off, self.data_bitmap.as_bytes())?;
        Ok(())
    }

    /// Resolves an absolute, '/'-separated path.
    ///
    /// Directories are materialized from disk as the walk traverses them.
    /// A missing component does not fail the call: it returns the deepest
    /// directory reached with `found` unset, so a caller can create the entry
    /// there.
    pub fn lookup(&mut self, path: &str) -> Result<LookupResult> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let total = components.len();
        if total == 0 {
            return Ok(LookupResult {
                dentry: self.root,
                found: true,
                is_root: true,
            });
        }

        let mut cursor = self.root;
        let mut result = self.root;
        let mut found = false;
        for (i, name) in components.iter().enumerate() {
            let lvl = i + 1;
            self.materialize(cursor)?;
            if self.dentries[cursor.0].ftype == FileType::Regular {
                // a file cannot have children, the rest of the path is bogus
                log::debug!(
                    "lookup: {} is not a directory",
                    String::from_utf8_lossy(self.dentries[cursor.0].name())
                );
                result = cursor;
                break;
            }
            let dir_inode = self.dentries[cursor.0].inode.ok_or(Errno::Inval)?;
            match self.find_child(dir_inode, name.as_bytes()) {
                None => {
                    log::debug!("lookup: {name} not found");
                    result = cursor;
                    break;
                }
                Some(child) if lvl == total => {
                    result = child;
                    found = true;
                    break;
                }
                Some(child) => cursor = child,
            }
        }

        if self.dentries[result.0].ino.is_some() {
            self.materialize(result)?;
        }
        Ok(LookupResult {
            dentry: result,
            found,
            is_root: false,
        })
    }

    /// Creates a detached dentry in the arena.
    ///
    /// The name must be non-empty, at most NAME_MAX bytes, and free of '/'
    /// and NUL.
    pub fn create_dentry(&mut self, name: &str, ftype: FileType) -> Result<DentryId> {
        let dentry = Dentry::new(name.as_bytes(), ftype)?;
        Ok(self.insert_dentry(dentry))
    }

    /// Allocates an inode for the given dentry.
    ///
    /// Claims the lowest free slot of the inode bitmap. For a regular file,
    /// all data-block slots are reserved in the data bitmap up front and
    /// their in-memory buffers are zero-filled.
    pub fn alloc_inode(&mut self, dentry: DentryId) -> Result<InodeId> {
        let ftype = self.dentries[dentry.0].ftype;
        let index = self
            .inode_bitmap
            .allocate(self.max_inodes)
            .ok_or(Errno::NoSpace)?;

        let mut inode = Inode::new(index as u32, dentry);
        if ftype == FileType::Regular {
            let block_size = self.device.block_size() as usize;
            for slot in 0..DATA_BLOCKS_PER_INODE {
                match self.data_bitmap.allocate(self.max_data) {
                    Some(dno) => {
                        inode.set_used_block(slot, dno as u32);
                        inode.set_data(slot, vec![0; block_size]);
                    }
                    None => {
                        for prev in 0..slot {
                            if let Some(dno) = inode.used_block(prev) {
                                self.data_bitmap.clear(dno as usize);
                            }
                        }
                        self.inode_bitmap.clear(index);
                        return Err(Errno::NoSpace);
                    }
                }
            }
        }

        let id = InodeId(self.inodes.len());
        self.inodes.push(inode);
        let dentry = &mut self.dentries[dentry.0];
        dentry.inode = Some(id);
        dentry.ino = Some(index as u32);
        Ok(id)
    }

    /// Inserts `child` into the directory `dir` and returns the new entry
    /// count.
    ///
    /// Insertion is at the head of the sibling chain. When the count crosses
    /// into a new data block, a block is claimed from the data bitmap and
    /// recorded in the directory's next free slot; a directory that has used
    /// all its slots fails with NOSPACE.
    pub fn alloc_dentry(&mut self, dir: InodeId, child: DentryId) -> Result<u32> {
        self.attach_dentry(dir, child);
        let dir_cnt = self.inodes[dir.0].dir_cnt;

        let per_block = self.dentries_per_block() as u32;
        if dir_cnt % per_block == 1 {
            let block_slot = (dir_cnt / per_block) as usize;
            if block_slot >= DATA_BLOCKS_PER_INODE {
                return Err(Errno::NoSpace);
            }
            let dno = self
                .data_bitmap
                .allocate(self.max_data)
                .ok_or(Errno::NoSpace)?;
            self.inodes[dir.0].set_used_block(block_slot, dno as u32);
        }
        Ok(dir_cnt)
    }

    /// Returns the `index`-th child of the directory `dir`, in chain order.
    pub fn get_dentry(&self, dir: InodeId, index: usize) -> Option<DentryId> {
        let mut cursor = self.inodes[dir.0].children;
        let mut cnt = 0;
        while let Some(id) = cursor {
            if cnt == index {
                return Some(id);
            }
            cnt += 1;
            cursor = self.dentries[id.0].brother;
        }
        None
    }

    /// Materializes inode `ino` from disk and binds it to `dentry`.
    ///
    /// A directory's children are rebuilt from its recorded data blocks; the
    /// bitmaps are left untouched, the on-disk block assignment is
    /// authoritative. A regular file's data blocks are read into fresh
    /// buffers.
    pub fn read_inode(&mut self, dentry: DentryId, ino: u32) -> Result<InodeId> {
        let offset = self.inode_offset(ino);
        let record = InodeRecord::read(&mut self.device, offset)?;

        let mut inode = Inode::new({ record.ino }, dentry);
        inode.size = { record.size }.max(0) as u32;
        inode.link = { record.link }.max(0) as u32;
        for (slot, &dno) in { record.used_blocks }.iter().enumerate() {
            if dno >= 0 {
                inode.set_used_block(slot, dno as u32);
            }
        }

        let ftype = self.dentries[dentry.0].ftype;
        let id = InodeId(self.inodes.len());
        self.inodes.push(inode);
        self.dentries[dentry.0].inode = Some(id);
        self.dentries[dentry.0].ino = Some(ino);

        match ftype {
            FileType::Directory => {
                let per_block = self.dentries_per_block();
                let mut remaining = { record.dir_cnt }.max(0) as usize;
                let mut block_slot = 0;
                while remaining > 0 && block_slot < DATA_BLOCKS_PER_INODE {
                    let Some(dno) = self.inodes[id.0].used_block(block_slot) else {
                        return Err(Errno::Inval);
                    };
                    let base = self.data_offset(dno);
                    let mut entry = 0;
                    while remaining > 0 && entry < per_block {
                        let offset = base + (entry * size_of::<DentryRecord>()) as u64;
                        let record = DentryRecord::read(&mut self.device, offset)?;
                        let child = Dentry::from_record(&record)?;
                        let child_id = self.insert_dentry(child);
                        self.attach_dentry(id, child_id);
                        entry += 1;
                        remaining -= 1;
                    }
                    block_slot += 1;
                }
            }
            FileType::Regular => {
                let block_size = self.device.block_size() as usize;
                for slot in 0..DATA_BLOCKS_PER_INODE {
                    let Some(dno) = self.inodes[id.0].used_block(slot) else {
                        continue;
                    };
                    let offset = self.data_offset(dno);
                    let mut buf = vec![0; block_size];
                    self.device.read_at(offset, &mut buf)?;
                    self.inodes[id.0].set_data(slot, buf);
                }
            }
        }
        Ok(id)
    }

    /// Writes the inode and everything beneath it back to disk.
    ///
    /// A regular file's populated buffers go to their reserved data blocks. A
    /// directory serializes its child chain across its data blocks in chain
    /// order and recurses into every child whose inode is materialized.
    pub fn sync_inode(&mut self, inode: InodeId) -> Result<()> {
        let node = &self.inodes[inode.0];
        let ftype = self.dentries[node.dentry.0].ftype;
        let ino = node.ino;
        let record = InodeRecord {
            ino,
            size: node.size as i32,
            link: node.link as i32,
            ftype: ftype as u32,
            used_blocks: node.used_blocks_record(),
            dir_cnt: node.dir_cnt as i32,
        };
        log::debug!("sync inode {ino}");
        let offset = self.inode_offset(ino);
        record.write(&mut self.device, offset)?;

        match ftype {
            FileType::Regular => {
                for slot in 0..DATA_BLOCKS_PER_INODE {
                    let Some(dno) = self.inodes[inode.0].used_block(slot) else {
                        continue;
                    };
                    let offset = self.data_offset(dno);
                    if let Some(buf) = self.inodes[inode.0].data(slot) {
                        self.device.write_at(offset, buf)?;
                    }
                }
            }
            FileType::Directory => {
                let per_block = self.dentries_per_block();
                let mut chain = Vec::new();
                let mut cursor = self.inodes[inode.0].children;
                while let Some(id) = cursor {
                    chain.push(id);
                    cursor = self.dentries[id.0].brother;
                }
                for (i, child) in chain.into_iter().enumerate() {
                    let block_slot = i / per_block;
                    if block_slot >= DATA_BLOCKS_PER_INODE {
                        log::warn!("inode {ino}: children past the last block slot not synced");
                        break;
                    }
                    let Some(dno) = self.inodes[inode.0].used_block(block_slot) else {
                        return Err(Errno::Inval);
                    };
                    let offset =
                        self.data_offset(dno) + (i % per_block * size_of::<DentryRecord>()) as u64;
                    self.dentries[child.0]
                        .to_record()
                        .write(&mut self.device, offset)?;
                    if let Some(child_inode) = self.dentries[child.0].inode {
                        self.sync_inode(child_inode)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Byte-granular read from the device.
    pub fn driver_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.device.read_at(offset, buf)
    }

    /// Byte-granular write to the device.
    pub fn driver_write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.device.write_at(offset, buf)
    }

    /// Returns the root dentry.
    pub fn root(&self) -> DentryId {
        self.root
    }

    /// Returns the root inode.
    pub fn root_inode(&self) -> InodeId {
        self.dentries[self.root.0]
            .inode
            .expect("the root inode is bound at mount")
    }

    /// Returns the dentry behind a handle.
    pub fn dentry(&self, id: DentryId) -> &Dentry {
        &self.dentries[id.0]
    }

    /// Returns the inode behind a handle.
    pub fn inode(&self, id: InodeId) -> &Inode {
        &self.inodes[id.0]
    }

    /// Returns the mutable inode behind a handle.
    pub fn inode_mut(&mut self, id: InodeId) -> &mut Inode {
        &mut self.inodes[id.0]
    }

    /// Returns the logical block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.device.block_size()
    }

    /// Returns the device capacity in bytes.
    pub fn disk_size(&self) -> u64 {
        self.device.size()
    }

    /// Returns the usage counter carried through the superblock.
    pub fn usage(&self) -> i32 {
        self.usage
    }

    /// Returns the capacity of the inode table.
    pub fn max_inodes(&self) -> usize {
        self.max_inodes
    }

    /// Returns the capacity of the data region.
    pub fn max_data_blocks(&self) -> usize {
        self.max_data
    }

    /// Returns the number of allocated inode slots.
    pub fn allocated_inodes(&self) -> usize {
        self.inode_bitmap.count_set()
    }

    /// Returns the number of allocated data blocks.
    pub fn allocated_data_blocks(&self) -> usize {
        self.data_bitmap.count_set()
    }

    /// Returns how many dentry records fit in one logical block.
    pub fn dentries_per_block(&self) -> usize {
        self.device.block_size() as usize / size_of::<DentryRecord>()
    }

    /// Byte offset of inode `ino` in the inode table.
    fn inode_offset(&self, ino: u32) -> u64 {
        self.inode_off + ino as u64 * self.device.block_size()
    }

    /// Byte offset of data block `dno` in the data region.
    fn data_offset(&self, dno: u32) -> u64 {
        self.data_off + dno as u64 * self.device.block_size()
    }

    fn insert_dentry(&mut self, dentry: Dentry) -> DentryId {
        let id = DentryId(self.dentries.len());
        self.dentries.push(dentry);
        id
    }

    /// Links `child` at the head of `dir`'s sibling chain and bumps the entry
    /// count. Does not touch the data bitmap.
    fn attach_dentry(&mut self, dir: InodeId, child: DentryId) {
        let head = self.inodes[dir.0].children;
        let parent = self.inodes[dir.0].dentry;
        let dentry = &mut self.dentries[child.0];
        dentry.brother = head;
        dentry.parent = Some(parent);
        self.inodes[dir.0].children = Some(child);
        self.inodes[dir.0].dir_cnt += 1;
    }

    /// Finds a child of `dir` whose full name equals `name`.
    fn find_child(&self, dir: InodeId, name: &[u8]) -> Option<DentryId> {
        let mut cursor = self.inodes[dir.0].children;
        while let Some(id) = cursor {
            if self.dentries[id.0].name() == name {
                return Some(id);
            }
            cursor = self.dentries[id.0].brother;
        }
        None
    }

    /// Reads the dentry's inode in if it has not been materialized yet.
    fn materialize(&mut self, dentry: DentryId) -> Result<()> {
        if self.dentries[dentry.0].inode.is_some() {
            return Ok(());
        }
        let ino = self.dentries[dentry.0].ino.ok_or(Errno::Inval)?;
        self.read_inode(dentry, ino)?;
        Ok(())
    }
}

/// Returns the final component of a path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    const DISK_SIZE: u64 = 4 * 1024 * 1024;
    const BLOCK: u64 = 1024;

    fn temp_device() -> PathBuf {
        let path = env::temp_dir().join(format!("newfs-fs-{}.img", Uuid::new_v4()));
        let file = File::create(&path).unwrap();
        file.set_len(DISK_SIZE).unwrap();
        path
    }

    fn mount(path: &Path) -> NewFs {
        NewFs::mount(&MountOptions {
            device: path.to_path_buf(),
        })
        .unwrap()
    }

    /// Creates the entry `name` under `dir` and returns its inode.
    fn create(fs: &mut NewFs, dir: InodeId, name: &str, ftype: FileType) -> InodeId {
        let dentry = fs.create_dentry(name, ftype).unwrap();
        let inode = fs.alloc_inode(dentry).unwrap();
        fs.alloc_dentry(dir, dentry).unwrap();
        inode
    }

    #[test]
    fn fresh_format_then_remount() {
        let path = temp_device();

        let fs = mount(&path);
        assert_eq!(fs.allocated_inodes(), 1);
        assert_eq!(fs.inode(fs.root_inode()).ino, ROOT_INO);
        assert_eq!(fs.inode(fs.root_inode()).dir_cnt, 0);
        fs.umount().unwrap();

        let mut dev = Device::open(&path).unwrap();
        let record = SuperblockRecord::read(&mut dev).unwrap();
        assert_eq!({ record.magic }, MAGIC);
        drop(dev);

        let mut fs = mount(&path);
        assert_eq!(fs.inode(fs.root_inode()).dir_cnt, 0);
        let res = fs.lookup("/").unwrap();
        assert!(res.found);
        assert!(res.is_root);
        fs.umount().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn single_file_roundtrip() {
        let path = temp_device();
        let payload = b"hello!\n\0";

        let mut fs = mount(&path);
        let root = fs.root_inode();
        let inode = create(&mut fs, root, "a", FileType::Regular);
        fs.inode_mut(inode).data_mut(0).unwrap()[..payload.len()].copy_from_slice(payload);
        fs.inode_mut(inode).size = payload.len() as u32;
        fs.umount().unwrap();

        let mut fs = mount(&path);
        let res = fs.lookup("/a").unwrap();
        assert!(res.found);
        assert!(!res.is_root);
        let dentry = fs.dentry(res.dentry);
        assert_eq!(dentry.name(), b"a");
        assert_eq!(dentry.ftype, FileType::Regular);
        let inode = fs.inode(dentry.inode.unwrap());
        assert_eq!(inode.size, payload.len() as u32);
        assert_eq!(&inode.data(0).unwrap()[..payload.len()], payload);
        fs.umount().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn nested_directories_roundtrip() {
        let path = temp_device();

        let mut fs = mount(&path);
        let root = fs.root_inode();
        let d1 = create(&mut fs, root, "d1", FileType::Directory);
        let d2 = create(&mut fs, d1, "d2", FileType::Directory);
        let f = create(&mut fs, d2, "f", FileType::Regular);
        let f_ino = fs.inode(f).ino;
        fs.umount().unwrap();

        let mut fs = mount(&path);
        let res = fs.lookup("/d1/d2/f").unwrap();
        assert!(res.found);
        let dentry = fs.dentry(res.dentry);
        assert_eq!(dentry.ftype, FileType::Regular);
        assert_eq!(dentry.ino, Some(f_ino));
        fs.umount().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn directory_block_transition() {
        let path = temp_device();

        let mut fs = mount(&path);
        let per_block = fs.dentries_per_block();
        assert_eq!(per_block, 7);

        let root = fs.root_inode();
        for i in 0..per_block {
            create(&mut fs, root, &format!("d{i}"), FileType::Directory);
        }
        let first = fs.inode(root).used_block(0).unwrap();
        assert!(fs.inode(root).used_block(1).is_none());

        create(&mut fs, root, "one-more", FileType::Directory);
        let second = fs.inode(root).used_block(1).unwrap();
        assert_eq!(fs.inode(root).used_block(0), Some(first));
        assert_ne!(first, second);
        fs.umount().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn directory_overflow_nospace() {
        let path = temp_device();

        let mut fs = mount(&path);
        let capacity = DATA_BLOCKS_PER_INODE * fs.dentries_per_block();
        let root = fs.root_inode();
        for i in 0..capacity {
            create(&mut fs, root, &format!("d{i}"), FileType::Directory);
        }
        let extra = fs.create_dentry("overflow", FileType::Directory).unwrap();
        fs.alloc_inode(extra).unwrap();
        assert_eq!(fs.alloc_dentry(root, extra), Err(Errno::NoSpace));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn inode_exhaustion_nospace() {
        let path = temp_device();

        let mut fs = mount(&path);
        // the root already holds one slot
        for i in 1..fs.max_inodes() {
            let dentry = fs
                .create_dentry(&format!("d{i}"), FileType::Directory)
                .unwrap();
            fs.alloc_inode(dentry).unwrap();
        }
        assert_eq!(fs.allocated_inodes(), fs.max_inodes());

        let dentry = fs.create_dentry("full", FileType::Directory).unwrap();
        assert_eq!(fs.alloc_inode(dentry), Err(Errno::NoSpace));
        assert_eq!(fs.allocated_inodes(), fs.max_inodes());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn lookup_miss_returns_deepest_dir() {
        let path = temp_device();

        let mut fs = mount(&path);
        let root = fs.root_inode();
        create(&mut fs, root, "a", FileType::Regular);

        let res = fs.lookup("/b").unwrap();
        assert!(!res.found);
        assert_eq!(res.dentry, fs.root());

        // an intermediate component that is a regular file stops the walk
        let res = fs.lookup("/a/b").unwrap();
        assert!(!res.found);
        assert_eq!(fs.dentry(res.dentry).name(), b"a");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn sync_is_idempotent() {
        let path = temp_device();

        let mut fs = mount(&path);
        let root = fs.root_inode();
        let file = create(&mut fs, root, "a", FileType::Regular);
        fs.inode_mut(file).data_mut(0).unwrap()[..5].copy_from_slice(b"bytes");
        fs.inode_mut(file).size = 5;
        create(&mut fs, root, "d", FileType::Directory);

        fs.sync_inode(root).unwrap();
        let mut first = vec![0u8; DISK_SIZE as usize];
        fs.driver_read(0, &mut first).unwrap();

        fs.sync_inode(root).unwrap();
        let mut second = vec![0u8; DISK_SIZE as usize];
        fs.driver_read(0, &mut second).unwrap();

        assert_eq!(first, second);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn child_order_reverses_per_mount() {
        let path = temp_device();

        let mut fs = mount(&path);
        let root = fs.root_inode();
        for name in ["x1", "x2", "x3"] {
            create(&mut fs, root, name, FileType::Directory);
        }
        // head insertion: the chain is the reverse of creation order
        let names: Vec<_> = (0..3)
            .map(|i| fs.dentry(fs.get_dentry(root, i).unwrap()).name().to_vec())
            .collect();
        assert_eq!(names, [b"x3".to_vec(), b"x2".to_vec(), b"x1".to_vec()]);
        fs.umount().unwrap();

        // reloading head-inserts again, which restores creation order
        let mut fs = mount(&path);
        let root = fs.root_inode();
        assert_eq!(fs.inode(root).dir_cnt, 3);
        let names: Vec<_> = (0..3)
            .map(|i| fs.dentry(fs.get_dentry(root, i).unwrap()).name().to_vec())
            .collect();
        assert_eq!(names, [b"x1".to_vec(), b"x2".to_vec(), b"x3".to_vec()]);
        assert!(fs.get_dentry(root, 3).is_none());
        fs.umount().unwrap();
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn inode_records_match_bitmap() {
        let path = temp_device();

        let mut fs = mount(&path);
        let root = fs.root_inode();
        create(&mut fs, root, "a", FileType::Regular);
        create(&mut fs, root, "d", FileType::Directory);
        let allocated = fs.allocated_inodes();
        assert_eq!(allocated, 3);
        fs.umount().unwrap();

        // every allocated slot holds a record carrying its own number
        let mut dev = Device::open(&path).unwrap();
        let bitmap_blocks = (SUPERBLOCK_BLOCKS + INODE_BITMAP_BLOCKS + DATA_BITMAP_BLOCKS) as u64;
        let inode_off = bitmap_blocks * BLOCK;
        for ino in 0..allocated as u32 {
            let record = InodeRecord::read(&mut dev, inode_off + ino as u64 * BLOCK).unwrap();
            assert_eq!({ record.ino }, ino);
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_name_component() {
        assert_eq!(file_name("/d1/d2/f"), "f");
        assert_eq!(file_name("/a"), "a");
        assert_eq!(file_name("plain"), "plain");
    }
}
