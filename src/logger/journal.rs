//! Reduction journal: append-only line-delimited JSON, one object per
//! lifecycle step of a reduction run.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! concurrent `tail -f` never sees a partial record.
//!
//! Fallback chain:
//! 1. Journal file
//! 2. stderr with `[KSL-JOURNAL]` prefix
//! 3. Silent discard (a reduction must never fail because of its journal)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{KslError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Journal record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    ReductionStart,
    WatchesRegistered,
    BuildFinished,
    ReductionPlanned,
    DeletionFailed,
    ReductionComplete,
    Error,
}

/// One journal line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: JournalEvent,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Generic count: watches, files, bytes depending on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touched: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unused: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JournalEntry {
    /// Create a new entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: JournalEvent, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            path: None,
            count: None,
            touched: None,
            unused: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Error record for a failed run.
    #[must_use]
    pub fn failure(err: &KslError) -> Self {
        let mut entry = Self::new(JournalEvent::Error, Severity::Critical);
        entry.ok = Some(false);
        entry.error_code = Some(err.code().to_string());
        entry.error_message = Some(err.to_string());
        entry
    }

    #[must_use]
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = Some(root.to_string_lossy().into_owned());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Append-only journal writer.
#[derive(Debug)]
pub struct Journal {
    path: Option<PathBuf>,
    file: Option<File>,
    state: WriterState,
    lines: u64,
}

impl Journal {
    /// Open `path` for appending. Falls through the degradation chain on
    /// failure; `None` discards everything.
    #[must_use]
    pub fn open(path: Option<&Path>) -> Self {
        let mut journal = Self {
            path: path.map(Path::to_path_buf),
            file: None,
            state: WriterState::Discard,
            lines: 0,
        };
        if let Some(path) = path {
            match open_append(path) {
                Ok(file) => {
                    journal.file = Some(file);
                    journal.state = WriterState::Normal;
                }
                Err(e) => {
                    let _ = writeln!(io::stderr(), "[KSL-JOURNAL] {e}; journaling to stderr");
                    journal.state = WriterState::Stderr;
                }
            }
        }
        journal
    }

    /// A journal that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::open(None)
    }

    pub fn write(&mut self, entry: &JournalEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[KSL-JOURNAL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Current degradation state.
    #[must_use]
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lines accepted since opening, including stderr fallbacks.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::Normal => {
                let written = self
                    .file
                    .as_mut()
                    .is_some_and(|f| f.write_all(line.as_bytes()).is_ok());
                if written {
                    self.lines += 1;
                } else {
                    self.file = None;
                    self.state = WriterState::Stderr;
                    let _ = writeln!(io::stderr(), "[KSL-JOURNAL] write failed, using stderr");
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[KSL-JOURNAL] {line}").is_ok() {
                    self.lines += 1;
                } else {
                    self.state = WriterState::Discard;
                }
            }
            WriterState::Discard => {}
        }
    }
}

/// Open or create a file for appending.
fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| KslError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| KslError::io(path, e))
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
