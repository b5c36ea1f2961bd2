//! Filesystem crawling: exclusion matching and the fd-relative walker.

pub mod exclude;
#[cfg(unix)]
pub mod walker;
