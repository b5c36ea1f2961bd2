#![forbid(unsafe_code)]

//! fsledger — incremental filesystem indexer for a content-addressed backup
//! system.
//!
//! Two subsystems make up the core:
//! 1. **Walker** — a race-free recursive directory walker that descends with
//!    directory file descriptors and emits a deterministic, depth-annotated
//!    stream of entries.
//! 2. **Index** — a persistent SQLite tree of nodes, edges, and stat
//!    snapshots, kept in sync by a lockstep merge that walks the filesystem
//!    stream and the stored stream together and applies minimal mutations.

pub mod core;
pub mod crawl;
pub mod index;
pub mod logger;
pub mod prelude;
