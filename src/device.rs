//! Access to the backing block device.
//!
//! The device only accepts transfers of its I/O unit, issued at seek positions
//! it controls. [`Device`] reconciles that with the byte-granular requests the
//! filesystem layers make: every request is widened to the logical block
//! boundaries around it, moved through a scratch buffer, and carved into
//! back-to-back I/O-unit transfers. Writes first read the affected region so
//! that the bytes surrounding the request survive.

use crate::errno::{Errno, Result};
use crate::util::{round_down, round_up};
use std::ffi::c_long;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of the device in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);
/// ioctl command: Get the logical sector size of the device.
const BLKSSZGET: c_long = 0x1268;

/// The I/O unit assumed for regular image files.
const FILE_IO_SIZE: u64 = 512;

/// Handle on the backing device, either a block device or a regular image
/// file.
pub struct Device {
    file: File,
    /// Device capacity in bytes.
    size: u64,
    /// Transfer quantum of the device.
    io_size: u64,
    /// Logical block size, twice the I/O unit.
    block_size: u64,
}

impl Device {
    /// Opens the device at `path` and queries its geometry.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let metadata = file.metadata().map_err(|_| Errno::Access)?;
        let file_type = metadata.file_type();
        let (size, io_size) = if file_type.is_block_device() || file_type.is_char_device() {
            let mut size: u64 = 0;
            let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
            if ret < 0 {
                return Err(Errno::Access);
            }
            let mut sector_size: libc::c_int = 0;
            let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET as _, &mut sector_size) };
            if ret < 0 {
                return Err(Errno::Access);
            }
            (size, sector_size as u64)
        } else if file_type.is_file() {
            (metadata.len(), FILE_IO_SIZE)
        } else {
            return Err(Errno::Inval);
        };
        Ok(Self {
            file,
            size,
            io_size,
            block_size: 2 * io_size,
        })
    }

    /// Returns the device capacity in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the device's transfer quantum in bytes.
    pub fn io_size(&self) -> u64 {
        self.io_size
    }

    /// Returns the logical block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Reads `buf.len()` bytes at the given byte offset.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let size = buf.len() as u64;
        self.check_range(offset, size)?;
        let aligned_off = round_down(offset, self.block_size);
        let bias = (offset - aligned_off) as usize;
        let aligned_size = round_up(bias as u64 + size, self.block_size);
        let mut scratch = vec![0u8; aligned_size as usize];
        self.read_units(aligned_off, &mut scratch)?;
        buf.copy_from_slice(&scratch[bias..bias + buf.len()]);
        Ok(())
    }

    /// Writes `buf` at the given byte offset.
    ///
    /// The surrounding bytes of the affected blocks are preserved.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let size = buf.len() as u64;
        self.check_range(offset, size)?;
        let aligned_off = round_down(offset, self.block_size);
        let bias = (offset - aligned_off) as usize;
        let aligned_size = round_up(bias as u64 + size, self.block_size);
        let mut scratch = vec![0u8; aligned_size as usize];
        self.read_units(aligned_off, &mut scratch)?;
        scratch[bias..bias + buf.len()].copy_from_slice(buf);
        self.write_units(aligned_off, &scratch)?;
        Ok(())
    }

    /// Checks that the requested byte range lies on the device.
    fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        if offset.checked_add(size).is_none_or(|end| end > self.size) {
            return Err(Errno::Inval);
        }
        Ok(())
    }

    /// Seeks to `offset`, then reads I/O-unit transfers until `buf` is full.
    ///
    /// `offset` and `buf.len()` must be block-aligned.
    fn read_units(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.seek_to(offset)?;
        for unit in buf.chunks_mut(self.io_size as usize) {
            self.file.read_exact(unit).map_err(|e| {
                log::error!("device read failed at {offset}: {e}");
                Errno::Io
            })?;
        }
        Ok(())
    }

    /// Seeks to `offset`, then writes I/O-unit transfers until `buf` is
    /// consumed.
    ///
    /// `offset` and `buf.len()` must be block-aligned.
    fn write_units(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.seek_to(offset)?;
        for unit in buf.chunks(self.io_size as usize) {
            self.file.write_all(unit).map_err(|e| {
                log::error!("device write failed at {offset}: {e}");
                Errno::Io
            })?;
        }
        Ok(())
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|_| Errno::Seek)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_image(len: u64) -> PathBuf {
        let path = env::temp_dir().join(format!("newfs-dev-{}.img", Uuid::new_v4()));
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();
        path
    }

    #[test]
    fn geometry_of_image_file() {
        let path = temp_image(64 * 1024);
        let dev = Device::open(&path).unwrap();
        assert_eq!(dev.size(), 64 * 1024);
        assert_eq!(dev.io_size(), 512);
        assert_eq!(dev.block_size(), 1024);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unaligned_read_matches_full_read() {
        let path = temp_image(16 * 1024);
        let mut dev = Device::open(&path).unwrap();

        let pattern: Vec<u8> = (0..16 * 1024u32).map(|i| (i % 251) as u8).collect();
        dev.write_at(0, &pattern).unwrap();

        let mut full = vec![0u8; 16 * 1024];
        dev.read_at(0, &mut full).unwrap();
        assert_eq!(full, pattern);

        for (offset, size) in [(0usize, 1usize), (1, 1), (511, 2), (1023, 1030), (4095, 7)] {
            let mut window = vec![0u8; size];
            dev.read_at(offset as u64, &mut window).unwrap();
            assert_eq!(window, full[offset..offset + size]);
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unaligned_write_preserves_surroundings() {
        let path = temp_image(8 * 1024);
        let mut dev = Device::open(&path).unwrap();

        dev.write_at(0, &[0xaa; 8 * 1024]).unwrap();
        dev.write_at(1000, &[0x55; 100]).unwrap();

        let mut full = vec![0u8; 8 * 1024];
        dev.read_at(0, &mut full).unwrap();
        assert!(full[..1000].iter().all(|&b| b == 0xaa));
        assert!(full[1000..1100].iter().all(|&b| b == 0x55));
        assert!(full[1100..].iter().all(|&b| b == 0xaa));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn out_of_range_access() {
        let path = temp_image(4 * 1024);
        let mut dev = Device::open(&path).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(dev.read_at(4 * 1024 - 8, &mut buf), Err(Errno::Inval));
        assert_eq!(dev.write_at(u64::MAX, &buf), Err(Errno::Inval));
        fs::remove_file(&path).unwrap();
    }
}
