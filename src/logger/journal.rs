//! Structured event journal: append-only JSONL plus a leveled stderr echo.
//!
//! Each line is a self-contained JSON object, assembled in memory and written
//! with one `write_all` so a concurrent `tail -f` never sees a partial line.
//! Journal failures degrade to stderr; the indexer never aborts because an
//! event could not be recorded.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity level for journal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

/// Event types emitted by the walker, merger, and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A transient filesystem error was skipped (vanished entry, dead
    /// descent).
    WalkSkip,
    /// An entry matched the exclude configuration.
    Excluded,
    /// The repository directory was encountered and skipped.
    RepoSkip,
    /// A directory on another device was not descended (`--xdev`).
    FsBoundary,
    /// One merge run finished; detail carries add/update/delete counts.
    MergeSummary,
    /// A fatal or recorded error.
    Error,
}

/// A single journal line. Optional fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            path: None,
            detail: None,
        }
    }
}

/// Synchronous journal handle, shared via `Arc` between the walker, the
/// merger, and the CLI.
pub struct Journal {
    sink: Mutex<Option<File>>,
    verbosity: u8,
}

impl Journal {
    /// Open the journal.
    ///
    /// `path = None` disables the file sink (events still echo to stderr per
    /// verbosity). A file that cannot be opened is reported once and
    /// disabled.
    pub fn open(path: Option<&Path>, verbosity: u8) -> Self {
        let sink = path.and_then(|p| {
            match OpenOptions::new().create(true).append(true).open(p) {
                Ok(file) => Some(file),
                Err(err) => {
                    eprintln!("fsl: journal disabled, cannot open {}: {err}", p.display());
                    None
                }
            }
        });
        Self {
            sink: Mutex::new(sink),
            verbosity,
        }
    }

    /// A journal with no file sink.
    pub fn stderr_only(verbosity: u8) -> Self {
        Self {
            sink: Mutex::new(None),
            verbosity,
        }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Record one event: JSONL line to the sink, stderr echo per severity.
    pub fn record(&self, entry: &LogEntry) {
        if let Ok(mut line) = serde_json::to_string(entry) {
            line.push('\n');
            let mut sink = self.sink.lock();
            if let Some(file) = sink.as_mut()
                && file.write_all(line.as_bytes()).is_err()
            {
                // One failed write disables the sink for the rest of the run.
                *sink = None;
            }
        }

        let echo = match entry.severity {
            Severity::Warning => true,
            Severity::Info => self.verbosity >= 1,
            Severity::Debug => self.verbosity >= 2,
        };
        if echo {
            let path = entry.path.as_deref().unwrap_or("");
            let detail = entry.detail.as_deref().unwrap_or("");
            eprintln!("fsl: {:?} {path} {detail}", entry.event);
        }
    }

    /// Debug-level event with a path and a reason.
    pub fn debug(&self, event: EventType, path: impl Into<String>, detail: impl Into<String>) {
        let mut entry = LogEntry::new(event, Severity::Debug);
        entry.path = Some(path.into());
        entry.detail = Some(detail.into());
        self.record(&entry);
    }

    /// Info-level event with free-form detail.
    pub fn info(&self, event: EventType, detail: impl Into<String>) {
        let mut entry = LogEntry::new(event, Severity::Info);
        entry.detail = Some(detail.into());
        self.record(&entry);
    }

    /// Warning-level event with free-form detail.
    pub fn warn(&self, event: EventType, detail: impl Into<String>) {
        let mut entry = LogEntry::new(event, Severity::Warning);
        entry.detail = Some(detail.into());
        self.record(&entry);
    }
}
