//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fsledger::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{ErrorLedger, FslError, Result};
pub use crate::core::paths::{compute_depth, reduce_paths, split_components};
pub use crate::core::stat::StatRecord;

// Crawl
pub use crate::crawl::exclude::ExcludeMatcher;
#[cfg(unix)]
pub use crate::crawl::walker::{WalkEntry, WalkOptions, Walker};

// Index
pub use crate::index::check::check;
#[cfg(unix)]
pub use crate::index::merge::{
    DiffEvent, DiffKind, MergeOptions, MergeStats, diff_index, update_index,
};
pub use crate::index::store::{Index, ReadOnlyIndex, StoredEntry};

// Logging
pub use crate::logger::journal::{EventType, Journal, LogEntry, Severity};
