//! Structured error channel for transport and protocol failures.
//!
//! The core emits typed entries; rendering them is left to whatever front
//! end consumes the sink. Entries are retained in a bounded drop-oldest
//! buffer so a flapping monitor cannot grow the log without limit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::warn;

use crate::endpoint::Endpoint;

/// Rendered lines are capped at this length, ellipsis-truncated.
const RENDER_CAP: usize = 80;

/// Failure classification; there is deliberately nothing finer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The request never reached a valid handler, or the handler
    /// returned a non-success status.
    Transport,
    /// A well-formed reply explicitly flagged as an error, carrying the
    /// server-supplied message.
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => f.write_str("transport"),
            ErrorKind::Protocol => f.write_str("protocol"),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Local>,
    pub kind: ErrorKind,
    /// Command surface the failing call was addressed to.
    pub endpoint: String,
    /// Opaque message, for human diagnosis only.
    pub message: String,
}

impl ErrorEntry {
    /// Single display line, length-capped.
    pub fn rendered(&self) -> String {
        let line = format!("{} {}: {}", self.kind, self.endpoint, self.message);
        if line.chars().count() <= RENDER_CAP {
            return line;
        }
        let head: String = line.chars().take(RENDER_CAP - 5).collect();
        format!("{head} ...")
    }
}

/// Cheaply clonable handle to the shared, append-only error log.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    entries: Mutex<VecDeque<ErrorEntry>>,
    cap: usize,
}

impl ErrorSink {
    /// `cap` is the maximum number of retained entries; the oldest entry
    /// is dropped when a record would exceed it.
    pub fn new(cap: usize) -> Self {
        ErrorSink {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::new()),
                cap: cap.max(1),
            }),
        }
    }

    pub fn record(&self, kind: ErrorKind, endpoint: &Endpoint, message: &str) {
        let entry = ErrorEntry {
            at: Local::now(),
            kind,
            endpoint: endpoint.url().to_string(),
            message: message.to_string(),
        };
        warn!("{}", entry.rendered());
        let mut entries = self.inner.entries.lock().unwrap();
        if entries.len() == self.inner.cap {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.inner.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── tests ───────────────────────────────────────────────────────────────
