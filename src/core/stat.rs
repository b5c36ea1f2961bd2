//! Fixed-field snapshots of filesystem metadata.
//!
//! A `StatRecord` is the unit of comparison between the walker stream and the
//! stored index: two records are equal iff every field is equal. Times are
//! integer nanoseconds since the epoch so equality survives a round trip
//! through the store without float truncation.

#![allow(missing_docs)]

use std::path::Path;

/// Immutable `lstat` snapshot of one filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRecord {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

const fn to_ns(sec: i64, nsec: i64) -> i64 {
    sec * NANOS_PER_SEC + nsec
}

impl StatRecord {
    /// File-type bits of the mode.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn file_type(&self) -> u32 {
        self.mode & (libc::S_IFMT as u32)
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn is_regular(&self) -> bool {
        self.file_type() == libc::S_IFREG as u32
    }

    /// Snapshot `path` without following a terminal symlink.
    ///
    /// Returns the raw errno so callers can tell a vanished entry (ENOENT)
    /// from a real failure.
    #[cfg(unix)]
    pub fn lstat(path: &Path) -> std::result::Result<Self, nix::errno::Errno> {
        nix::sys::stat::lstat(path).map(|st| Self::from(&st))
    }
}

#[cfg(unix)]
impl From<&nix::sys::stat::FileStat> for StatRecord {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_lossless,
        clippy::cast_possible_wrap
    )]
    fn from(st: &nix::sys::stat::FileStat) -> Self {
        Self {
            mode: st.st_mode as u32,
            ino: st.st_ino as u64,
            dev: st.st_dev as u64,
            nlink: st.st_nlink as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            size: st.st_size as i64,
            atime_ns: to_ns(st.st_atime as i64, st.st_atime_nsec as i64),
            mtime_ns: to_ns(st.st_mtime as i64, st.st_mtime_nsec as i64),
            ctime_ns: to_ns(st.st_ctime as i64, st.st_ctime_nsec as i64),
        }
    }
}
