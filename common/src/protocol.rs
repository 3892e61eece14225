//! Wire types for the JSON command protocol spoken by monitor units.
//!
//! Every call is a single POST of a [`Command`] envelope; the reply is a
//! [`Reply`] envelope that is either a result payload or a server-side
//! error message. Transport-level failures (non-2xx) are classified by the
//! controller's transport layer, independent of envelope content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope: `{"method": ..., "args"?: [...], "kwargs"?: {...}}`.
///
/// `args` and `kwargs` are omitted entirely when absent, matching what the
/// monitor units' dispatcher expects.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<serde_json::Map<String, Value>>,
}

impl Command {
    pub fn new(method: &str) -> Self {
        Command {
            method: method.to_string(),
            args: None,
            kwargs: None,
        }
    }

    pub fn with_args(method: &str, args: Vec<Value>) -> Self {
        Command {
            method: method.to_string(),
            args: Some(args),
            kwargs: None,
        }
    }

    pub fn with_kwargs(mut self, kwargs: serde_json::Map<String, Value>) -> Self {
        self.kwargs = Some(kwargs);
        self
    }
}

/// Response envelope, tagged by the `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    Result { result: Value },
    Error { error: Value },
}

/// State of one monitor as reported by `get_state`.
///
/// Fetched atomically per poll and replaced wholesale; never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub recording: bool,
    pub converting: bool,
    pub disk_space_bytes: u64,
}

/// Derived status label for one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Unknown,
    Idle,
    Recording,
    Converting,
    RecordingConverting,
}

impl MonitorStatus {
    /// Pure function of the latest snapshot; `None` means not yet polled.
    pub fn derive(snapshot: Option<&MonitorSnapshot>) -> Self {
        match snapshot {
            None => MonitorStatus::Unknown,
            Some(s) => match (s.recording, s.converting) {
                (true, true) => MonitorStatus::RecordingConverting,
                (true, false) => MonitorStatus::Recording,
                (false, true) => MonitorStatus::Converting,
                (false, false) => MonitorStatus::Idle,
            },
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Recording listed first when combined with converting.
        let s = match self {
            MonitorStatus::Unknown => "Unknown",
            MonitorStatus::Idle => "Idle",
            MonitorStatus::Recording => "Recording",
            MonitorStatus::Converting => "Converting",
            MonitorStatus::RecordingConverting => "Recording,Converting",
        };
        f.write_str(s)
    }
}

/// One file in a directory listing from the filesystem endpoint.
///
/// `open` marks a file that is still being written (an active recording
/// segment); such files must not be deleted or transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub open: bool,
}

impl FileEntry {
    /// File extension without the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext)
    }
}

/// One entry of the monitor directory returned by `get_monitors`:
/// a `[address, port]` pair. Order is preserved.
pub type DirectoryEntry = (String, u16);

// ─── tests ───────────────────────────────────────────────────────────────
