//! Race-free recursive directory walker.
//!
//! The walker descends with directory file descriptors rather than path
//! strings: each directory is opened relative to its parent's descriptor and
//! listed through that descriptor. The kernel never re-resolves an absolute
//! path, and an adversary swapping a directory for a symlink between listing
//! and descent cannot redirect the walk — the descriptor already names the
//! directory that was listed. Terminal symlinks are never followed.
//!
//! Output is a lazy pre-order stream of `(name, depth, stat)` with siblings
//! in ascending raw-byte name order. The iterator owns one descriptor per
//! open level; dropping it on any exit path closes them all.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::{AtFlags, OFlag, open, openat};
use nix::sys::stat::{Mode, fstatat};

use crate::core::errors::{ErrorLedger, FslError, Result};
use crate::core::paths::{compute_depth, normalize_path};
use crate::core::stat::StatRecord;
use crate::crawl::exclude::ExcludeMatcher;
use crate::logger::journal::{EventType, Journal};

/// Open flags for every directory descriptor: read-only, never follow a
/// terminal symlink, never block on a FIFO-like object, close on exec.
fn open_mask() -> OFlag {
    OFlag::O_RDONLY | OFlag::O_NOFOLLOW | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC
}

/// Walker behavior switches.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Don't descend into directories on a different device than their root.
    pub xdev: bool,
    /// Repository directory to skip entirely.
    pub repo_dir: Option<PathBuf>,
    /// Emit full paths instead of bare names.
    pub full_paths: bool,
    /// Seeded depths, consumed one per root; remaining roots use
    /// [`compute_depth`]. Seeded values are opaque and never re-normalized.
    pub depths: Vec<usize>,
}

/// A single entry in the walker stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Bare name or full path, per [`WalkOptions::full_paths`].
    pub name: OsString,
    pub depth: usize,
    pub stat: StatRecord,
}

/// One open directory level: its descriptor, its full path, and the sorted
/// not-yet-yielded children.
struct Frame {
    fd: OwnedFd,
    base: PathBuf,
    /// Depth of this directory's children.
    depth: usize,
    entries: std::vec::IntoIter<(OsString, StatRecord)>,
}

/// Lazy pre-order walker over one or more roots.
pub struct Walker {
    roots: VecDeque<PathBuf>,
    seeded_depths: VecDeque<usize>,
    stack: Vec<Frame>,
    excludes: Arc<ExcludeMatcher>,
    xdev: bool,
    repo_dir: Option<PathBuf>,
    full_paths: bool,
    current_dev: Option<u64>,
    journal: Arc<Journal>,
    ledger: Arc<ErrorLedger>,
    interrupt: Option<Arc<AtomicBool>>,
    failed: bool,
}

impl Walker {
    pub fn new(
        roots: impl IntoIterator<Item = PathBuf>,
        excludes: Arc<ExcludeMatcher>,
        options: WalkOptions,
        journal: Arc<Journal>,
        ledger: Arc<ErrorLedger>,
    ) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            seeded_depths: options.depths.into(),
            stack: Vec::new(),
            excludes,
            xdev: options.xdev,
            repo_dir: options.repo_dir.as_deref().map(normalize_path),
            full_paths: options.full_paths,
            current_dev: None,
            journal,
            ledger,
            interrupt: None,
            failed: false,
        }
    }

    /// Observe an external interrupt flag between entries; when it is set
    /// the stream ends with [`FslError::Interrupted`].
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn entry(&self, name: &OsString, path: &Path, depth: usize, stat: StatRecord) -> WalkEntry {
        let emitted = if self.full_paths {
            path.as_os_str().to_os_string()
        } else {
            name.clone()
        };
        WalkEntry {
            name: emitted,
            depth,
            stat,
        }
    }

    fn is_repo(&self, path: &Path) -> bool {
        self.repo_dir
            .as_deref()
            .is_some_and(|repo| normalize_path(path) == repo)
    }

    fn record_skip(&self, path: &Path, detail: &str) {
        self.ledger
            .record(format!("{}: {detail}", path.display()));
        self.journal
            .debug(EventType::WalkSkip, path.display().to_string(), detail);
    }

    /// List a directory through its own descriptor: names via a fd-relative
    /// `Dir` handle, stats via `fstatat(…, AT_SYMLINK_NOFOLLOW)`, sorted by
    /// raw byte name. Entries that vanish between listing and stat are
    /// skipped; a directory deleted beneath us lists as empty.
    fn list_directory(&self, fd: &OwnedFd, dir_path: &Path) -> Result<Vec<(OsString, StatRecord)>> {
        let names = match Dir::openat(fd, ".", OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
            Ok(mut dir) => {
                let mut names = Vec::new();
                let mut listing_died = false;
                for entry in dir.iter() {
                    match entry {
                        Ok(entry) => {
                            let bytes = entry.file_name().to_bytes();
                            if bytes == b"." || bytes == b".." {
                                continue;
                            }
                            names.push(OsString::from_vec(bytes.to_vec()));
                        }
                        // The directory got deleted while we were reading it.
                        Err(Errno::EINVAL | Errno::ENOENT) => {
                            listing_died = true;
                            break;
                        }
                        Err(errno) => return Err(FslError::os(dir_path, errno)),
                    }
                }
                if listing_died {
                    self.record_skip(dir_path, "directory vanished during listing");
                    Vec::new()
                } else {
                    names
                }
            }
            Err(Errno::EINVAL | Errno::ENOENT) => {
                self.record_skip(dir_path, "directory vanished before listing");
                Vec::new()
            }
            Err(errno) => return Err(FslError::os(dir_path, errno)),
        };

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            match fstatat(fd, name.as_os_str(), AtFlags::AT_SYMLINK_NOFOLLOW) {
                Ok(st) => entries.push((name, StatRecord::from(&st))),
                Err(Errno::ENOENT) => {
                    // Vanished between listing and stat.
                    self.record_skip(&dir_path.join(&name), "entry vanished before stat");
                }
                Err(errno) => return Err(FslError::os(dir_path.join(&name), errno)),
            }
        }

        entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        Ok(entries)
    }

    /// Yield the next entry from the open frame stack, if any.
    fn next_from_stack(&mut self) -> Option<Result<WalkEntry>> {
        while !self.stack.is_empty() {
            let top = self.stack.len() - 1;
            let Some((name, stat)) = self.stack[top].entries.next() else {
                // Level exhausted; dropping the frame closes its descriptor.
                self.stack.pop();
                continue;
            };
            let path = self.stack[top].base.join(&name);
            let depth = self.stack[top].depth;

            if self.excludes.excludes(&path) {
                self.journal
                    .debug(EventType::Excluded, path.display().to_string(), "excluded");
                continue;
            }

            if !stat.is_dir() {
                return Some(Ok(self.entry(&name, &path, depth, stat)));
            }

            if self.is_repo(&path) {
                self.journal.debug(
                    EventType::RepoSkip,
                    path.display().to_string(),
                    "repository directory",
                );
                continue;
            }

            let entry = self.entry(&name, &path, depth, stat);

            if let Some(root_dev) = self.current_dev
                && stat.dev != root_dev
            {
                self.journal.debug(
                    EventType::FsBoundary,
                    path.display().to_string(),
                    "different filesystem",
                );
                return Some(Ok(entry));
            }

            match openat(&self.stack[top].fd, name.as_os_str(), open_mask(), Mode::empty()) {
                Ok(fd) => {
                    let children = match self.list_directory(&fd, &path) {
                        Ok(children) => children,
                        Err(err) => return Some(Err(err)),
                    };
                    self.stack.push(Frame {
                        fd,
                        base: path,
                        depth: depth + 1,
                        entries: children.into_iter(),
                    });
                    return Some(Ok(entry));
                }
                // Swapped for a symlink, or vanished: skip the subtree, the
                // entry itself was still observed.
                Err(Errno::ELOOP | Errno::ENOENT) => {
                    self.record_skip(&path, "subtree became unopenable");
                    return Some(Ok(entry));
                }
                Err(errno) => return Some(Err(FslError::os(&path, errno))),
            }
        }
        None
    }

    /// Begin the next root, yielding its entry when it is walkable.
    fn start_next_root(&mut self) -> Option<Result<WalkEntry>> {
        loop {
            let root = self.roots.pop_front()?;

            let stat = match StatRecord::lstat(&root) {
                Ok(stat) => stat,
                Err(Errno::ENOENT) => {
                    self.record_skip(&root, "root does not exist");
                    continue;
                }
                Err(errno) => return Some(Err(FslError::os(&root, errno))),
            };

            let depth = self
                .seeded_depths
                .pop_front()
                .unwrap_or_else(|| compute_depth(&root));

            // Bare-name mode uses the final component; the filesystem root
            // itself has none, so it stays as its own name.
            let name = root
                .file_name()
                .map_or_else(|| root.as_os_str().to_os_string(), |n| n.to_os_string());

            if !stat.is_dir() {
                return Some(Ok(self.entry(&name, &root, depth, stat)));
            }

            if self.is_repo(&root) {
                self.journal.debug(
                    EventType::RepoSkip,
                    root.display().to_string(),
                    "repository directory",
                );
                continue;
            }

            self.current_dev = self.xdev.then_some(stat.dev);
            let entry = self.entry(&name, &root, depth, stat);

            match open(&root, open_mask(), Mode::empty()) {
                Ok(fd) => {
                    let children = match self.list_directory(&fd, &root) {
                        Ok(children) => children,
                        Err(err) => return Some(Err(err)),
                    };
                    self.stack.push(Frame {
                        fd,
                        base: root,
                        depth: depth + 1,
                        entries: children.into_iter(),
                    });
                    return Some(Ok(entry));
                }
                Err(Errno::ELOOP | Errno::ENOENT) => {
                    self.record_skip(&root, "root became unopenable");
                    return Some(Ok(entry));
                }
                Err(errno) => return Some(Err(FslError::os(&root, errno))),
            }
        }
    }
}

impl Iterator for Walker {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(flag) = &self.interrupt
            && flag.load(Ordering::Relaxed)
        {
            self.failed = true;
            self.stack.clear();
            return Some(Err(FslError::Interrupted));
        }

        let item = match self.next_from_stack() {
            Some(item) => Some(item),
            None => self.start_next_root(),
        };

        if matches!(item, Some(Err(_))) {
            // The stream is dead after a propagated error; release
            // descriptors now rather than at drop time.
            self.failed = true;
            self.stack.clear();
        }
        item
    }
}
