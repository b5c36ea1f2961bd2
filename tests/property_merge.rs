//! Property tests: path reduction, merge idempotence and completeness, and
//! pre/post-order duality over randomized trees.

mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;

use fsledger::core::errors::{ErrorLedger, Result};
use fsledger::core::paths::{reduce_paths, split_components};
use fsledger::crawl::exclude::ExcludeMatcher;
use fsledger::index::check::check;
use fsledger::index::merge::{MergeOptions, MergeStats, update_index};
use fsledger::index::store::{Index, StoredEntry};
use fsledger::logger::journal::Journal;
use tempfile::TempDir;

// ──────────────────── strategies ────────────────────

/// Component names that exercise sorting, dots, and spaces.
fn arb_component() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "a".to_string(),
        "b".to_string(),
        "ab".to_string(),
        "B".to_string(),
        "z z".to_string(),
        ".dot".to_string(),
        "x.tmp".to_string(),
    ])
}

/// A relative path of 1..=4 components.
fn arb_rel_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_component(), 1..=4)
}

/// A small tree description: a set of relative paths; the last component of
/// each becomes a file, the prefixes directories.
fn arb_tree() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(arb_rel_path(), 0..12)
}

/// Materialize the tree description. Conflicts (a name used both as file and
/// directory) are resolved by whatever hits the filesystem first; the tests
/// use the resulting on-disk state as ground truth.
fn materialize(root: &Path, tree: &[Vec<String>]) {
    for rel in tree {
        let mut path = root.to_path_buf();
        for component in &rel[..rel.len() - 1] {
            path.push(component);
        }
        let _ = fs::create_dir_all(&path);
        path.push(&rel[rel.len() - 1]);
        if path.is_dir() {
            continue;
        }
        let _ = fs::write(&path, b"x");
    }
}

fn merge_once(index_file: &Path, root: &Path) -> MergeStats {
    let index = Index::open(index_file).unwrap();
    let stats = update_index(
        &index,
        root,
        &Arc::new(ExcludeMatcher::none()),
        &MergeOptions::default(),
        &Arc::new(Journal::stderr_only(0)),
        &Arc::new(ErrorLedger::new()),
    )
    .unwrap();
    index.commit().unwrap();
    stats
}

/// Relative paths of the indexed subtree, reconstructed from the pre-order
/// `(name, depth)` stream.
fn indexed_relative_paths(index_file: &Path, root: &Path) -> Vec<PathBuf> {
    let index = Index::open(index_file).unwrap();
    let components = split_components(root);
    let base = components.len() - 1;
    let entries: Vec<StoredEntry> = index
        .pre_order_iter(Some(&components))
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    let mut segments: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for entry in &entries[1..] {
        segments.truncate(entry.depth - base - 1);
        segments.push(String::from_utf8_lossy(&entry.name).into_owned());
        out.push(segments.iter().collect());
    }
    out
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No surviving canonical path is strictly below another survivor, and
    /// the result is sorted ascending.
    #[test]
    fn reducer_never_returns_overlapping_roots(
        paths in prop::collection::vec(arb_rel_path(), 1..10)
    ) {
        // A prefix that cannot exist keeps canonicalization syntactic.
        let base = PathBuf::from("/fsledger-proptest-nonexistent");
        let inputs: Vec<PathBuf> = paths
            .iter()
            .map(|rel| {
                let mut p = base.clone();
                for component in rel {
                    p.push(component);
                }
                p
            })
            .collect();

        let reduced = reduce_paths(&inputs);

        for (i, (canonical, _)) in reduced.iter().enumerate() {
            for (j, (other, _)) in reduced.iter().enumerate() {
                if i != j {
                    prop_assert!(
                        !canonical.starts_with(other),
                        "{canonical:?} survives below {other:?}"
                    );
                }
            }
        }
        for pair in reduced.windows(2) {
            prop_assert!(pair[0].0 < pair[1].0);
        }
        // Every input is covered by some survivor.
        for input in &inputs {
            prop_assert!(
                reduced.iter().any(|(c, _)| input.starts_with(c)),
                "{input:?} lost its covering root"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A second merge over an unchanged tree adds and deletes nothing, and
    /// the indexed path set matches an independent filesystem scan.
    #[test]
    fn merge_is_idempotent_and_complete(tree in arb_tree()) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("r");
        fs::create_dir(&root).unwrap();
        materialize(&root, &tree);

        let index_file = tmp.path().join("index.sqlite");
        merge_once(&index_file, &root);

        // Completeness against the std-library oracle.
        prop_assert_eq!(
            indexed_relative_paths(&index_file, &root),
            common::scan_tree(&root)
        );

        // Idempotence.
        let second = merge_once(&index_file, &root);
        prop_assert_eq!(second.added, 0);
        prop_assert_eq!(second.deleted, 0);
        prop_assert_eq!(
            indexed_relative_paths(&index_file, &root),
            common::scan_tree(&root)
        );
    }

    /// Deleting a random half of the tree converges to the new state, and the
    /// index stays internally consistent.
    #[test]
    fn merge_converges_after_deletions(tree in arb_tree(), drop_even in any::<bool>()) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("r");
        fs::create_dir(&root).unwrap();
        materialize(&root, &tree);

        let index_file = tmp.path().join("index.sqlite");
        merge_once(&index_file, &root);

        // Remove every other top-level entry.
        let mut top: Vec<PathBuf> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        top.sort();
        for (i, path) in top.iter().enumerate() {
            if (i % 2 == 0) == drop_even {
                if path.is_dir() {
                    fs::remove_dir_all(path).unwrap();
                } else {
                    fs::remove_file(path).unwrap();
                }
            }
        }

        merge_once(&index_file, &root);
        prop_assert_eq!(
            indexed_relative_paths(&index_file, &root),
            common::scan_tree(&root)
        );

        let index = Index::open(&index_file).unwrap();
        prop_assert!(check(&index).unwrap().is_empty());
    }

    /// Post-order yields exactly the pre-order element set, with every parent
    /// after all of its descendants.
    #[test]
    fn post_order_duality(tree in arb_tree()) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("r");
        fs::create_dir(&root).unwrap();
        materialize(&root, &tree);

        let index_file = tmp.path().join("index.sqlite");
        merge_once(&index_file, &root);

        let index = Index::open(&index_file).unwrap();
        let components = split_components(&root);
        let pre: Vec<StoredEntry> = index
            .pre_order_iter(Some(&components))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let post: Vec<StoredEntry> = index
            .post_order_iter(Some(&components))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let pre_ids: BTreeSet<i64> = pre.iter().map(|e| e.id).collect();
        let post_ids: BTreeSet<i64> = post.iter().map(|e| e.id).collect();
        prop_assert_eq!(&pre_ids, &post_ids);

        // In post-order, by the time an entry at depth d appears, no later
        // entry may be one of its descendants. Descendants are identified by
        // pre-order position: the contiguous run of deeper entries after it.
        let pre_pos: std::collections::HashMap<i64, usize> =
            pre.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        let subtree_end = |start: usize| {
            let depth = pre[start].depth;
            pre[start + 1..]
                .iter()
                .position(|e| e.depth <= depth)
                .map_or(pre.len(), |offset| start + 1 + offset)
        };
        for (pos, entry) in post.iter().enumerate() {
            let start = pre_pos[&entry.id];
            let end = subtree_end(start);
            for later in &post[pos + 1..] {
                let later_pre = pre_pos[&later.id];
                prop_assert!(
                    !(later_pre > start && later_pre < end),
                    "descendant appeared after its ancestor in post-order"
                );
            }
        }
    }
}
