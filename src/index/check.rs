//! Index integrity verification: scans `nodes`, `edges`, and `info` for
//! violations of the tree invariants and reports each one.

use rusqlite::params;

use crate::core::errors::Result;
use crate::index::store::ReadOnlyIndex;

fn collect_strings(
    store: &ReadOnlyIndex,
    sql: &str,
    format: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<String>,
) -> Result<Vec<String>> {
    let mut stmt = store.connection().prepare(sql)?;
    let rows = stmt
        .query_map(params![], |row| format(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Scan the whole store and return one line per invariant violation.
///
/// Verified invariants:
/// 1. root names are unique (one root per indexed filesystem root path);
/// 2. every edge references existing nodes on both sides;
/// 3. every node has exactly one incoming edge;
/// 4. `(parent, name)` is unique among the children of any node;
/// 5. sibling names admit a strict ascending order (no duplicates);
/// 6. every node has exactly one info record, and no info record is orphaned.
pub fn check(store: &ReadOnlyIndex) -> Result<Vec<String>> {
    let mut violations = Vec::new();

    // 1. Duplicate root names.
    violations.extend(collect_strings(
        store,
        "SELECT nodes.name, COUNT(*) FROM edges, nodes
         WHERE edges.parent IS NULL AND edges.child = nodes.id
         GROUP BY nodes.name HAVING COUNT(*) > 1",
        |row| {
            let name: Vec<u8> = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(format!(
                "duplicate root: name {:?} has {count} root nodes",
                String::from_utf8_lossy(&name)
            ))
        },
    )?);

    // 2. Edges referencing missing nodes.
    violations.extend(collect_strings(
        store,
        "SELECT child FROM edges WHERE child NOT IN (SELECT id FROM nodes)",
        |row| {
            let id: i64 = row.get(0)?;
            Ok(format!("orphan edge: child {id} is not a node"))
        },
    )?);
    violations.extend(collect_strings(
        store,
        "SELECT parent, child FROM edges
         WHERE parent IS NOT NULL AND parent NOT IN (SELECT id FROM nodes)",
        |row| {
            let parent: i64 = row.get(0)?;
            let child: i64 = row.get(1)?;
            Ok(format!(
                "orphan edge: parent {parent} of child {child} is not a node"
            ))
        },
    )?);

    // 3. Nodes without an incoming edge (the child primary key already
    //    forbids more than one).
    violations.extend(collect_strings(
        store,
        "SELECT id FROM nodes WHERE id NOT IN (SELECT child FROM edges)",
        |row| {
            let id: i64 = row.get(0)?;
            Ok(format!("unattached node: {id} has no incoming edge"))
        },
    )?);

    // 4 & 5. Duplicate (parent, name) pairs; these are also the only stored
    //        state that can break strict ascending sibling order.
    violations.extend(collect_strings(
        store,
        "SELECT edges.parent, nodes.name, COUNT(*) FROM edges, nodes
         WHERE edges.child = nodes.id AND edges.parent IS NOT NULL
         GROUP BY edges.parent, nodes.name HAVING COUNT(*) > 1",
        |row| {
            let parent: i64 = row.get(0)?;
            let name: Vec<u8> = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok(format!(
                "duplicate child: parent {parent} has {count} children named {:?}",
                String::from_utf8_lossy(&name)
            ))
        },
    )?);

    // 6. Stat integrity in both directions.
    violations.extend(collect_strings(
        store,
        "SELECT id FROM nodes WHERE info_id NOT IN (SELECT id FROM info)",
        |row| {
            let id: i64 = row.get(0)?;
            Ok(format!("missing info: node {id} references no info record"))
        },
    )?);
    violations.extend(collect_strings(
        store,
        "SELECT info_id, COUNT(*) FROM nodes GROUP BY info_id HAVING COUNT(*) > 1",
        |row| {
            let info_id: i64 = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(format!("shared info: record {info_id} used by {count} nodes"))
        },
    )?);
    violations.extend(collect_strings(
        store,
        "SELECT id FROM info WHERE id NOT IN (SELECT info_id FROM nodes)",
        |row| {
            let id: i64 = row.get(0)?;
            Ok(format!("orphan info: record {id} belongs to no node"))
        },
    )?);

    Ok(violations)
}
