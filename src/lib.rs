//! A small block-structured filesystem persisted on a fixed-size virtual
//! block device.
//!
//! The device is partitioned into a superblock, two allocation bitmaps, an
//! inode table and a data region (see [`layout`]). Mounting loads the
//! superblock and bitmaps, formatting the device first when the signature is
//! missing, and materializes the rest of the tree lazily as paths are looked
//! up. Unmounting writes the whole reachable tree, the bitmaps and the
//! superblock back out.
//!
//! The crate covers the on-disk format, the block-alignment I/O layer, the
//! inode/dentry graph with its bitmap allocators, and the
//! mount/lookup/sync algorithms. Binding these primitives to VFS operations
//! is the caller's concern; see [`fs::NewFs`] for the operations exposed to
//! such a binding.

pub mod bitmap;
pub mod device;
pub mod errno;
pub mod fs;
pub mod layout;
pub mod node;
pub mod util;

pub use errno::{Errno, Result};
pub use fs::{LookupResult, MountOptions, NewFs};
