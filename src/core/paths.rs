//! Path model: component splitting, depth computation, normalization, and
//! reduction of user-supplied roots to a minimal non-overlapping set.

use std::env;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Collapse redundant separators and `.` segments.
///
/// `..` segments are deliberately left in place; callers that need a physical
/// path use [`resolve_physical`].
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Resolve a path to an absolute, physical path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve
/// symlinks and normalize components. Otherwise the path is made absolute
/// against the CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_physical(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Split a path into `(root, comp₁, comp₂, …)` where the root component is
/// the filesystem root (`/`). Relative paths are made absolute against the
/// CWD first. Trailing separators and `.` segments do not produce components.
pub fn split_components(path: &Path) -> Vec<OsString> {
    let absolute = if path.is_absolute() {
        normalize_path(path)
    } else {
        let joined = env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path));
        normalize_path(&joined)
    };

    let mut parts = Vec::new();
    for component in absolute.components() {
        match component {
            Component::RootDir | Component::Prefix(..) => {
                parts.push(OsString::from(std::path::MAIN_SEPARATOR_STR));
            }
            Component::Normal(name) => parts.push(name.to_os_string()),
            Component::ParentDir => parts.push(OsString::from("..")),
            Component::CurDir => {}
        }
    }
    parts
}

/// Depth of a path: number of components after the root. The root itself has
/// depth 0; a trailing separator does not change the depth.
pub fn compute_depth(path: &Path) -> usize {
    split_components(path).len().saturating_sub(1)
}

/// Collapse user-supplied root paths into a minimal non-overlapping set.
///
/// Each path is canonicalized to a physical path; a path strictly below
/// another surviving path is dropped. When two arguments canonicalize to the
/// same path the later one wins. The result is sorted ascending by canonical
/// path, as `(canonical, original)` pairs.
pub fn reduce_paths(paths: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
    let mut by_canonical: std::collections::BTreeMap<PathBuf, PathBuf> =
        std::collections::BTreeMap::new();
    for path in paths {
        by_canonical.insert(resolve_physical(path), path.clone());
    }

    by_canonical
        .iter()
        .filter(|(canonical, _)| {
            !by_canonical
                .keys()
                .any(|base| canonical.as_path() != base && canonical.starts_with(base))
        })
        .map(|(canonical, original)| (canonical.clone(), original.clone()))
        .collect()
}
