//! Persistent tree index: nodes + parent/child edges + stat snapshots in a
//! single SQLite file.
//!
//! Logical shape:
//! - `nodes(id, name, info_id)` — one row per entry, `name` is a raw BLOB;
//! - `edges(parent, child)` — `child` is the primary key, so a node has at
//!   most one parent; roots carry an edge with a NULL parent;
//! - `info(id, mode, ino, dev, nlink, uid, gid, size, atime, mtime, ctime)`.
//!
//! A read/write handle spans one indexer invocation with a single deferred
//! transaction: `commit()` publishes everything, dropping the handle without
//! committing rolls everything back.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{FslError, Result};
use crate::core::stat::StatRecord;

/// One stored entry as yielded by the traversal iterators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: i64,
    /// Raw name bytes, exactly as inserted.
    pub name: Vec<u8>,
    /// Depth relative to the true root, independent of any iteration base.
    pub depth: usize,
}

#[cfg(unix)]
fn os_bytes(name: &OsStr) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes()
}

const SCHEMA: &str = "
    CREATE TABLE edges (
        parent  INTEGER,
        child   INTEGER,
        PRIMARY KEY(child)
    );
    CREATE INDEX parent_idx ON edges (parent);
    CREATE TABLE nodes (
        id      INTEGER,
        name    BLOB,
        info_id INTEGER,
        PRIMARY KEY(id)
    );
    CREATE TABLE info (
        id      INTEGER,
        mode    INTEGER,
        ino     INTEGER,
        dev     INTEGER,
        nlink   INTEGER,
        uid     INTEGER,
        gid     INTEGER,
        size    INTEGER,
        atime   INTEGER,
        mtime   INTEGER,
        ctime   INTEGER,
        PRIMARY KEY(id)
    );
";

const EXPECTED_TABLES: &[(&str, &[&str])] = &[
    ("edges", &["parent", "child"]),
    ("nodes", &["id", "name", "info_id"]),
    (
        "info",
        &[
            "id", "mode", "ino", "dev", "nlink", "uid", "gid", "size", "atime", "mtime", "ctime",
        ],
    ),
];

/// Read-only handle over an existing index file.
#[derive(Debug)]
pub struct ReadOnlyIndex {
    conn: Connection,
    path: PathBuf,
}

impl ReadOnlyIndex {
    /// Open an existing index read-only. A missing file is an error.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(FslError::MissingIndex {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        if store.table_count()? != EXPECTED_TABLES.len() {
            return Err(store.corrupt("missing tables"));
        }
        store.validate_shape()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn corrupt(&self, details: &str) -> FslError {
        FslError::CorruptIndex {
            path: self.path.clone(),
            details: details.to_string(),
        }
    }

    fn table_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('edges', 'nodes', 'info')",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as usize)
    }

    /// The on-disk format is versioned implicitly by table shape; any
    /// mismatch is fatal.
    fn validate_shape(&self) -> Result<()> {
        for (table, expected) in EXPECTED_TABLES {
            let mut stmt = self
                .conn
                .prepare(&format!("PRAGMA table_info({table})"))?;
            let mut columns: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<_, _>>()?;
            columns.sort();
            let mut wanted: Vec<String> = expected.iter().map(ToString::to_string).collect();
            wanted.sort();
            if columns != wanted {
                return Err(self.corrupt(&format!(
                    "table {table} has columns {columns:?}, expected {wanted:?}"
                )));
            }
        }
        Ok(())
    }

    /// Find a child of `parent` (NULL parent = root level) by exact name.
    fn child_by_name(&self, parent: Option<i64>, name: &[u8]) -> Result<Option<i64>> {
        let mut stmt = self.conn.prepare_cached(match parent {
            Some(_) => {
                "SELECT nodes.id FROM edges, nodes
                 WHERE edges.parent = ?1 AND edges.child = nodes.id AND nodes.name = ?2"
            }
            None => {
                "SELECT nodes.id FROM edges, nodes
                 WHERE edges.parent IS NULL AND edges.child = nodes.id AND nodes.name = ?1"
            }
        })?;
        let result = match parent {
            Some(pid) => stmt.query_row(params![pid, name], |row| row.get(0)),
            None => stmt.query_row(params![name], |row| row.get(0)),
        };
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Existing prefixes of `path`, deepest first, as `(id, depth)`.
    pub fn ancestors(&self, path: &[OsString]) -> Result<Vec<(i64, usize)>> {
        let mut chain = Vec::new();
        let mut parent = None;
        for (depth, component) in path.iter().enumerate() {
            match self.child_by_name(parent, os_bytes(component))? {
                Some(id) => {
                    chain.push((id, depth));
                    parent = Some(id);
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// The deepest existing prefix of `path`, or `None`.
    pub fn closest_ancestor(&self, path: &[OsString]) -> Result<Option<(i64, usize)>> {
        Ok(self.ancestors(path)?.into_iter().next())
    }

    /// The node at exactly `path`, or `None`.
    pub fn get(&self, path: &[OsString]) -> Result<Option<(i64, usize)>> {
        let target_depth = path.len().checked_sub(1).ok_or_else(|| FslError::Runtime {
            details: "empty path".to_string(),
        })?;
        Ok(self
            .closest_ancestor(path)?
            .filter(|&(_, depth)| depth == target_depth))
    }

    /// Stat snapshot of a node.
    #[allow(clippy::cast_sign_loss)]
    pub fn stat_of(&self, id: i64) -> Result<StatRecord> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT info.mode, info.ino, info.dev, info.nlink, info.uid,
                    info.gid, info.size, info.atime, info.mtime, info.ctime
             FROM info, nodes
             WHERE nodes.id = ?1 AND info.id = nodes.info_id",
        )?;
        let record = stmt.query_row(params![id], |row| {
            Ok(StatRecord {
                mode: row.get::<_, i64>(0)? as u32,
                ino: row.get::<_, i64>(1)? as u64,
                dev: row.get::<_, i64>(2)? as u64,
                nlink: row.get::<_, i64>(3)? as u64,
                uid: row.get::<_, i64>(4)? as u32,
                gid: row.get::<_, i64>(5)? as u32,
                size: row.get(6)?,
                atime_ns: row.get(7)?,
                mtime_ns: row.get(8)?,
                ctime_ns: row.get(9)?,
            })
        });
        match record {
            Ok(record) => Ok(record),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(self.corrupt(&format!("node {id} has no info record")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Children of `parent` in ascending raw-byte name order (BLOB comparison
    /// in SQLite is memcmp, which is exactly the walker's sibling order).
    pub(crate) fn children_of(&self, parent: Option<i64>, depth: usize) -> Result<Vec<StoredEntry>> {
        let mut stmt = self.conn.prepare_cached(match parent {
            Some(_) => {
                "SELECT edges.child, nodes.name FROM edges, nodes
                 WHERE edges.parent = ?1 AND edges.child = nodes.id
                 ORDER BY nodes.name ASC"
            }
            None => {
                "SELECT edges.child, nodes.name FROM edges, nodes
                 WHERE edges.parent IS NULL AND edges.child = nodes.id
                 ORDER BY nodes.name ASC"
            }
        })?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(StoredEntry {
                id: row.get(0)?,
                name: row.get(1)?,
                depth,
            })
        };
        let rows = match parent {
            Some(pid) => stmt
                .query_map(params![pid], map)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], map)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Depth-first pre-order over the stored tree (or the subtree at `base`).
    ///
    /// Lazy: one child-list query per visited directory, buffered per level.
    /// Depths are always relative to the true root.
    pub fn pre_order_iter(&self, base: Option<&[OsString]>) -> Result<PreOrderIter<'_>> {
        let (seed, base_depth) = match base {
            None => (self.children_of(None, 0)?, 0),
            Some(path) => {
                let (id, depth) = self.get(path)?.ok_or_else(|| FslError::Runtime {
                    details: format!("{} is not in index", join_display(path)),
                })?;
                let last = path.last().map(|c| os_bytes(c).to_vec()).unwrap_or_default();
                (
                    vec![StoredEntry {
                        id,
                        name: last,
                        depth,
                    }],
                    depth,
                )
            }
        };
        Ok(PreOrderIter {
            store: self,
            stack: vec![seed.into_iter()],
            descend_from: None,
            base_depth,
            dead: false,
        })
    }

    /// Same entries as [`Self::pre_order_iter`] in post-order: every parent
    /// after all of its descendants, sibling order unchanged. Buffers at most
    /// `max_depth` entries.
    pub fn post_order_iter(&self, base: Option<&[OsString]>) -> Result<PostOrderIter<'_>> {
        let inner = self.pre_order_iter(base)?;
        #[allow(clippy::cast_possible_wrap)]
        let last_depth = inner.base_depth as i64 - 1;
        Ok(PostOrderIter {
            inner,
            stack: Vec::new(),
            ready: VecDeque::new(),
            last_depth,
            drained: false,
        })
    }
}

fn join_display(path: &[OsString]) -> String {
    let mut joined = PathBuf::new();
    for component in path {
        joined.push(component);
    }
    joined.display().to_string()
}

/// Lazy pre-order traversal. See [`ReadOnlyIndex::pre_order_iter`].
pub struct PreOrderIter<'a> {
    store: &'a ReadOnlyIndex,
    stack: Vec<std::vec::IntoIter<StoredEntry>>,
    descend_from: Option<(i64, usize)>,
    base_depth: usize,
    dead: bool,
}

impl PreOrderIter<'_> {
    /// Depth of the first yielded entry.
    pub fn base_depth(&self) -> usize {
        self.base_depth
    }
}

impl Iterator for PreOrderIter<'_> {
    type Item = Result<StoredEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dead {
            return None;
        }
        // Fetch the children of the entry yielded last time; they come next
        // in pre-order.
        if let Some((id, depth)) = self.descend_from.take() {
            match self.store.children_of(Some(id), depth + 1) {
                Ok(children) => {
                    if !children.is_empty() {
                        self.stack.push(children.into_iter());
                    }
                }
                Err(err) => {
                    self.dead = true;
                    return Some(Err(err));
                }
            }
        }
        loop {
            let level = self.stack.last_mut()?;
            if let Some(entry) = level.next() {
                self.descend_from = Some((entry.id, entry.depth));
                return Some(Ok(entry));
            }
            self.stack.pop();
        }
    }
}

/// Post-order adapter over the pre-order stream.
pub struct PostOrderIter<'a> {
    inner: PreOrderIter<'a>,
    stack: Vec<StoredEntry>,
    ready: VecDeque<StoredEntry>,
    last_depth: i64,
    drained: bool,
}

impl Iterator for PostOrderIter<'_> {
    type Item = Result<StoredEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.ready.pop_front() {
                return Some(Ok(entry));
            }
            if self.drained {
                return self.stack.pop().map(Ok);
            }
            match self.inner.next() {
                None => self.drained = true,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(entry)) => {
                    #[allow(clippy::cast_possible_wrap)]
                    let depth = entry.depth as i64;
                    // Not descending: everything at or below the previous
                    // depth is complete and pops in closing order.
                    if depth <= self.last_depth {
                        for _ in 0..=(self.last_depth - depth) {
                            if let Some(done) = self.stack.pop() {
                                self.ready.push_back(done);
                            }
                        }
                    }
                    self.stack.push(entry);
                    self.last_depth = depth;
                }
            }
        }
    }
}

/// Read/write handle. Creates the schema on first open, validates it
/// otherwise, and spans one transaction until [`Index::commit`].
#[derive(Debug)]
pub struct Index {
    store: ReadOnlyIndex,
}

impl std::ops::Deref for Index {
    type Target = ReadOnlyIndex;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl Index {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let store = ReadOnlyIndex {
            conn,
            path: path.to_path_buf(),
        };
        match store.table_count()? {
            0 => store.conn.execute_batch(SCHEMA)?,
            n if n == EXPECTED_TABLES.len() => store.validate_shape()?,
            _ => return Err(store.corrupt("missing tables")),
        }
        store.conn.execute_batch("BEGIN")?;
        Ok(Self { store })
    }

    /// Commit every mutation made through this handle. Dropping the handle
    /// without calling this rolls the whole invocation back.
    pub fn commit(self) -> Result<()> {
        self.store.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn stat_values(stat: &StatRecord) -> [i64; 10] {
        [
            i64::from(stat.mode),
            stat.ino as i64,
            stat.dev as i64,
            stat.nlink as i64,
            i64::from(stat.uid),
            i64::from(stat.gid),
            stat.size,
            stat.atime_ns,
            stat.mtime_ns,
            stat.ctime_ns,
        ]
    }

    /// Insert a node under `parent` (`None` = new root) and return its id.
    pub fn add_node(&self, parent: Option<i64>, name: &[u8], stat: &StatRecord) -> Result<i64> {
        let v = Self::stat_values(stat);
        self.store
            .conn
            .prepare_cached(
                "INSERT INTO info
                    (mode, ino,  dev,   nlink, uid,
                     gid,  size, atime, mtime, ctime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?
            .execute(params![v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8], v[9]])?;
        let info_id = self.store.conn.last_insert_rowid();

        self.store
            .conn
            .prepare_cached("INSERT INTO nodes (name, info_id) VALUES (?1, ?2)")?
            .execute(params![name, info_id])?;
        let id = self.store.conn.last_insert_rowid();

        self.store
            .conn
            .prepare_cached("INSERT INTO edges VALUES (?1, ?2)")?
            .execute(params![parent, id])?;
        Ok(id)
    }

    /// Overwrite the stat fields of a node's info record.
    pub fn update_node(&self, id: i64, stat: &StatRecord) -> Result<()> {
        let v = Self::stat_values(stat);
        self.store
            .conn
            .prepare_cached(
                "UPDATE info
                 SET mode = ?1, ino = ?2,  dev = ?3,   nlink = ?4, uid = ?5,
                     gid = ?6,  size = ?7, atime = ?8, mtime = ?9, ctime = ?10
                 WHERE info.id IN (SELECT info_id FROM nodes WHERE nodes.id = ?11)",
            )?
            .execute(params![
                v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8], v[9], id
            ])?;
        Ok(())
    }

    /// Remove a node's edge, info, and node rows. Not recursive: subtrees are
    /// deleted entry by entry by the merge.
    pub fn delete_node(&self, id: i64) -> Result<()> {
        self.store
            .conn
            .prepare_cached("DELETE FROM edges WHERE child = ?1")?
            .execute(params![id])?;
        self.store
            .conn
            .prepare_cached(
                "DELETE FROM info
                 WHERE info.id IN (SELECT info_id FROM nodes WHERE nodes.id = ?1)",
            )?
            .execute(params![id])?;
        self.store
            .conn
            .prepare_cached("DELETE FROM nodes WHERE nodes.id = ?1")?
            .execute(params![id])?;
        Ok(())
    }

    /// Ensure every prefix of `path` exists, lstat-ing missing prefixes from
    /// the live filesystem. Returns the leaf id.
    pub fn add_ancestors(&self, path: &[OsString]) -> Result<i64> {
        if path.is_empty() {
            return Err(FslError::Runtime {
                details: "empty path".to_string(),
            });
        }
        let existing = self.closest_ancestor(path)?;
        let (mut parent, first_missing) =
            existing.map_or((None, 0), |(id, depth)| (Some(id), depth + 1));

        let mut leaf = parent;
        let mut prefix: PathBuf = path[..first_missing].iter().collect();
        for component in &path[first_missing..] {
            prefix.push(component);
            let stat = StatRecord::lstat(&prefix)
                .map_err(|errno| FslError::os(&prefix, errno))?;
            let id = self.add_node(parent, os_bytes(component), &stat)?;
            parent = Some(id);
            leaf = Some(id);
        }
        leaf.ok_or_else(|| FslError::Runtime {
            details: "empty ancestor chain".to_string(),
        })
    }
}
