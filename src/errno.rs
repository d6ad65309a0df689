//! Error kinds shared by every filesystem operation.
//!
//! Errors map one-to-one onto the errno values a VFS binding hands back to the
//! kernel, so a caller can propagate them with [`Errno::to_raw`] without any
//! translation table of its own.

use std::ffi::c_int;
use std::fmt;
use std::io;

/// A filesystem operation result.
pub type Result<T> = std::result::Result<T, Errno>;

/// Failure kind of a filesystem operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Errno {
    /// Permission denied, or the device could not be opened.
    Access,
    /// Seeking the device failed.
    Seek,
    /// The operation expected a regular file but found a directory.
    IsDir,
    /// A bitmap scan found no free slot.
    NoSpace,
    /// The entry already exists.
    Exists,
    /// No such file or directory.
    NotFound,
    /// The operation is not supported.
    Unsupported,
    /// A device transfer failed.
    Io,
    /// Invalid argument, name or on-disk state.
    Inval,
}

impl Errno {
    /// Returns the negative errno value to propagate to a VFS binding.
    pub fn to_raw(self) -> c_int {
        let errno = match self {
            Self::Access => libc::EACCES,
            Self::Seek => libc::ESPIPE,
            Self::IsDir => libc::EISDIR,
            Self::NoSpace => libc::ENOSPC,
            Self::Exists => libc::EEXIST,
            Self::NotFound => libc::ENOENT,
            Self::Unsupported => libc::ENXIO,
            Self::Io => libc::EIO,
            Self::Inval => libc::EINVAL,
        };
        -errno
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::Access,
            io::ErrorKind::AlreadyExists => Self::Exists,
            io::ErrorKind::InvalidInput => Self::Inval,
            _ => Self::Io,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Access => "permission denied",
            Self::Seek => "illegal seek",
            Self::IsDir => "is a directory",
            Self::NoSpace => "no space left on device",
            Self::Exists => "file exists",
            Self::NotFound => "no such file or directory",
            Self::Unsupported => "no such device or address",
            Self::Io => "input/output error",
            Self::Inval => "invalid argument",
        };
        fmt.write_str(msg)
    }
}
