//! Lockstep reconciliation of the walker stream and the stored index stream.
//!
//! Both streams are depth-first pre-order with byte-sorted siblings, so one
//! pass comparing `(depth, name)` cursors produces the minimal set of
//! add/update/delete mutations. The same driver powers the mutating merge
//! (`update_index`) and the read-only diff behind `--status`/`--modified`
//! (`diff_index`); only the sink differs.

#![allow(missing_docs)]

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::core::errors::{ErrorLedger, FslError, Result};
use crate::core::paths::{compute_depth, split_components};
use crate::core::stat::StatRecord;
use crate::crawl::exclude::ExcludeMatcher;
use crate::crawl::walker::{WalkEntry, WalkOptions, Walker};
use crate::index::store::{Index, ReadOnlyIndex, StoredEntry};
use crate::logger::journal::{EventType, Journal};

#[cfg(unix)]
fn os_bytes(name: &OsStr) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes()
}

#[cfg(unix)]
fn bytes_os(name: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(name.to_vec())
}

/// Per-run merge settings shared by `update_index` and `diff_index`.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Don't cross filesystem boundaries.
    pub xdev: bool,
    /// Repository directory the walker must skip.
    pub repo_dir: Option<PathBuf>,
    /// External interrupt flag; aborts the run between entries.
    pub interrupt: Option<Arc<AtomicBool>>,
}

/// Mutation counts of one merge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Outcome classification of one entry in a read-only diff pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Present in the filesystem, absent from the index.
    Added,
    /// Present in the index, absent from the filesystem.
    Deleted,
    /// Present in both with differing stat records.
    Modified,
    /// Present in both with identical stat records.
    Unchanged,
}

/// One entry-level result of a diff pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEvent {
    pub kind: DiffKind,
    pub path: PathBuf,
}

/// Receiver of the driver's case-analysis decisions.
trait MergeSink {
    fn add(
        &mut self,
        parent: Option<i64>,
        name: &[u8],
        depth: usize,
        stat: &StatRecord,
    ) -> Result<i64>;
    fn update(&mut self, id: i64, name: &[u8], depth: usize, stat: &StatRecord) -> Result<()>;
    fn delete(&mut self, id: i64, name: &[u8], depth: usize) -> Result<()>;
}

/// `depth → node id` of the most recent index-side ancestor chain. A child
/// is only ever added after its parent was processed one level up, so the
/// slot below an add is always populated.
#[derive(Default)]
struct AncestorMap {
    ids: Vec<i64>,
}

impl AncestorMap {
    fn set(&mut self, depth: usize, id: i64) {
        if self.ids.len() <= depth {
            self.ids.resize(depth + 1, -1);
        }
        self.ids[depth] = id;
    }

    fn parent_of(&self, depth: usize) -> Option<i64> {
        depth
            .checked_sub(1)
            .and_then(|d| self.ids.get(d).copied())
            .filter(|&id| id >= 0)
    }
}

/// Walk the union of both pre-order streams, applying the case analysis.
fn drive<I, F, S>(mut iiter: I, mut fsiter: F, sink: &mut S) -> Result<()>
where
    I: Iterator<Item = Result<StoredEntry>>,
    F: Iterator<Item = Result<WalkEntry>>,
    S: MergeSink,
{
    let mut pids = AncestorMap::default();

    let mut ientry = iiter.next().transpose()?;
    let mut fentry = fsiter.next().transpose()?;

    if let Some(entry) = &ientry {
        pids.set(entry.depth, entry.id);
    }

    loop {
        match (ientry.take(), fentry.take()) {
            (None, None) => break,

            // Index outlived the filesystem: the rest of the subtree is gone.
            (Some(i), None) => {
                sink.delete(i.id, &i.name, i.depth)?;
                ientry = iiter.next().transpose()?;
            }

            // Filesystem outlived the index: the rest is new.
            (None, Some(fs)) => {
                let id = sink.add(pids.parent_of(fs.depth), os_bytes(&fs.name), fs.depth, &fs.stat)?;
                pids.set(fs.depth, id);
                fentry = fsiter.next().transpose()?;
            }

            (Some(i), Some(fs)) => {
                let fsname = os_bytes(&fs.name);
                if i.depth < fs.depth {
                    let id = sink.add(pids.parent_of(fs.depth), fsname, fs.depth, &fs.stat)?;
                    pids.set(fs.depth, id);
                    ientry = Some(i);
                    fentry = fsiter.next().transpose()?;
                } else if i.depth == fs.depth {
                    match i.name.as_slice().cmp(fsname) {
                        std::cmp::Ordering::Less => {
                            sink.delete(i.id, &i.name, i.depth)?;
                            ientry = iiter.next().transpose()?;
                            fentry = Some(fs);
                        }
                        std::cmp::Ordering::Equal => {
                            sink.update(i.id, &i.name, i.depth, &fs.stat)?;
                            pids.set(i.depth, i.id);
                            ientry = iiter.next().transpose()?;
                            fentry = fsiter.next().transpose()?;
                        }
                        std::cmp::Ordering::Greater => {
                            let id =
                                sink.add(pids.parent_of(fs.depth), fsname, fs.depth, &fs.stat)?;
                            pids.set(fs.depth, id);
                            ientry = Some(i);
                            fentry = fsiter.next().transpose()?;
                        }
                    }
                } else {
                    sink.delete(i.id, &i.name, i.depth)?;
                    ientry = iiter.next().transpose()?;
                    fentry = Some(fs);
                }
            }
        }
    }

    Ok(())
}

/// Mutating sink: applies the decisions to the read/write store.
struct IndexSink<'a> {
    index: &'a Index,
    stats: MergeStats,
}

impl MergeSink for IndexSink<'_> {
    fn add(
        &mut self,
        parent: Option<i64>,
        name: &[u8],
        _depth: usize,
        stat: &StatRecord,
    ) -> Result<i64> {
        let parent = parent.ok_or_else(|| FslError::Runtime {
            details: "merge produced a child with no recorded parent".to_string(),
        })?;
        self.stats.added += 1;
        self.index.add_node(Some(parent), name, stat)
    }

    fn update(&mut self, id: i64, _name: &[u8], _depth: usize, stat: &StatRecord) -> Result<()> {
        self.stats.updated += 1;
        self.index.update_node(id, stat)
    }

    fn delete(&mut self, id: i64, _name: &[u8], _depth: usize) -> Result<()> {
        self.stats.deleted += 1;
        self.index.delete_node(id)
    }
}

/// Read-only sink: reconstructs paths and reports entry-level outcomes.
struct DiffSink<'a, F: FnMut(DiffEvent)> {
    store: Option<&'a ReadOnlyIndex>,
    root_parent: PathBuf,
    base_depth: usize,
    segments: Vec<Vec<u8>>,
    emit: F,
    next_synthetic: i64,
}

impl<F: FnMut(DiffEvent)> DiffSink<'_, F> {
    fn path_for(&mut self, depth: usize, name: &[u8]) -> PathBuf {
        let pos = depth - self.base_depth;
        self.segments.truncate(pos);
        self.segments.push(name.to_vec());
        let mut path = self.root_parent.clone();
        for segment in &self.segments {
            path.push(bytes_os(segment));
        }
        path
    }
}

impl<F: FnMut(DiffEvent)> MergeSink for DiffSink<'_, F> {
    fn add(
        &mut self,
        _parent: Option<i64>,
        name: &[u8],
        depth: usize,
        _stat: &StatRecord,
    ) -> Result<i64> {
        let path = self.path_for(depth, name);
        (self.emit)(DiffEvent {
            kind: DiffKind::Added,
            path,
        });
        self.next_synthetic -= 1;
        Ok(self.next_synthetic)
    }

    fn update(&mut self, id: i64, name: &[u8], depth: usize, stat: &StatRecord) -> Result<()> {
        let path = self.path_for(depth, name);
        let stored = self
            .store
            .ok_or_else(|| FslError::Runtime {
                details: "diff update without a store".to_string(),
            })?
            .stat_of(id)?;
        (self.emit)(DiffEvent {
            kind: if stored == *stat {
                DiffKind::Unchanged
            } else {
                DiffKind::Modified
            },
            path,
        });
        Ok(())
    }

    fn delete(&mut self, id: i64, name: &[u8], depth: usize) -> Result<()> {
        let _ = id;
        let path = self.path_for(depth, name);
        (self.emit)(DiffEvent {
            kind: DiffKind::Deleted,
            path,
        });
        Ok(())
    }
}

fn walker_for(
    root: &Path,
    base_depth: usize,
    excludes: &Arc<ExcludeMatcher>,
    options: &MergeOptions,
    journal: &Arc<Journal>,
    ledger: &Arc<ErrorLedger>,
) -> Walker {
    let walker = Walker::new(
        vec![root.to_path_buf()],
        Arc::clone(excludes),
        WalkOptions {
            xdev: options.xdev,
            repo_dir: options.repo_dir.clone(),
            full_paths: false,
            depths: vec![base_depth],
        },
        Arc::clone(journal),
        Arc::clone(ledger),
    );
    match &options.interrupt {
        Some(flag) => walker.with_interrupt(Arc::clone(flag)),
        None => walker,
    }
}

/// Bring the index subtree rooted at `root` in line with the filesystem.
///
/// On return the subtree exactly reflects what the walker produced: new
/// entries added, surviving entries' stats refreshed, entries no longer
/// observed deleted. The caller owns the commit.
pub fn update_index(
    index: &Index,
    root: &Path,
    excludes: &Arc<ExcludeMatcher>,
    options: &MergeOptions,
    journal: &Arc<Journal>,
    ledger: &Arc<ErrorLedger>,
) -> Result<MergeStats> {
    let components = split_components(root);
    index.add_ancestors(&components)?;

    let iiter = index.pre_order_iter(Some(&components))?;
    let base_depth = iiter.base_depth();
    let fsiter = walker_for(root, base_depth, excludes, options, journal, ledger);

    let mut sink = IndexSink {
        index,
        stats: MergeStats::default(),
    };
    drive(iiter, fsiter, &mut sink)?;

    journal.info(
        EventType::MergeSummary,
        format!(
            "root={} added={} updated={} deleted={}",
            root.display(),
            sink.stats.added,
            sink.stats.updated,
            sink.stats.deleted
        ),
    );
    Ok(sink.stats)
}

/// Read-only lockstep pass: classify every entry as added, deleted, modified,
/// or unchanged without touching the store. A root that is not in the index
/// reports its whole subtree as added.
pub fn diff_index<F: FnMut(DiffEvent)>(
    store: &ReadOnlyIndex,
    root: &Path,
    excludes: &Arc<ExcludeMatcher>,
    options: &MergeOptions,
    journal: &Arc<Journal>,
    ledger: &Arc<ErrorLedger>,
    emit: F,
) -> Result<()> {
    let components = split_components(root);
    let indexed = store.get(&components)?.is_some();

    let (iiter, base_depth) = if indexed {
        let iter = store.pre_order_iter(Some(&components))?;
        let depth = iter.base_depth();
        (Some(iter), depth)
    } else {
        (None, compute_depth(root))
    };

    let fsiter = walker_for(root, base_depth, excludes, options, journal, ledger);

    let mut sink = DiffSink {
        store: indexed.then_some(store),
        root_parent: root.parent().map_or_else(PathBuf::new, Path::to_path_buf),
        base_depth,
        segments: Vec::new(),
        emit,
        next_synthetic: 0,
    };
    drive(iiter.into_iter().flatten(), fsiter, &mut sink)
}
