//! Periodic file listing for the shared video directory.
//!
//! The catalog polls the filesystem endpoint on its own fixed cadence,
//! decoupled from any monitor's state. Each successful listing replaces
//! the snapshot wholesale, sorted by name; a deletion forces an
//! immediate out-of-cycle refresh instead of waiting for the next tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use camwatch_common::protocol::{Command, FileEntry};

use crate::endpoint::Endpoint;
use crate::sink::{ErrorKind, ErrorSink};
use crate::transport::{CallError, Transport};

pub struct FileCatalog {
    endpoint: Endpoint,
    directory: String,
    transport: Arc<dyn Transport>,
    sink: ErrorSink,
    interval: Duration,
    entries: Mutex<Vec<FileEntry>>,
    refresh: Notify,
    cancel: CancellationToken,
}

impl FileCatalog {
    pub fn new(
        base_url: &str,
        directory: String,
        transport: Arc<dyn Transport>,
        sink: ErrorSink,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(FileCatalog {
            endpoint: Endpoint::filesystem(base_url),
            directory,
            transport,
            sink,
            interval,
            entries: Mutex::new(Vec::new()),
            refresh: Notify::new(),
            cancel,
        })
    }

    /// Start the listing loop; the first listing is issued immediately.
    pub fn spawn(self: &Arc<Self>) {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            catalog.list_loop().await;
        });
    }

    async fn list_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.list_once().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.refresh.notified() => {}
            }
        }
        debug!("catalog {}: listing stopped", self.directory);
    }

    /// One listing round trip. On failure the previous snapshot stands
    /// and the next listing stays scheduled.
    pub(crate) async fn list_once(&self) {
        if let Ok(mut listing) = self.fetch_listing().await {
            listing.sort_by(|a, b| a.name.cmp(&b.name));
            debug!("catalog {}: {} file(s)", self.directory, listing.len());
            *self.entries.lock().unwrap() = listing;
        }
    }

    async fn fetch_listing(&self) -> Result<Vec<FileEntry>, CallError> {
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("recursive".into(), json!(false));
        let value = self
            .transport
            .invoke(
                &self.endpoint,
                Command::with_args("get_file_info", vec![json!(self.directory)])
                    .with_kwargs(kwargs),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| {
            let message = format!("get_file_info payload: {e}");
            self.sink.record(ErrorKind::Protocol, &self.endpoint, &message);
            CallError::Protocol(message)
        })
    }

    /// Cancel the pending tick and re-list immediately.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Delete one file by name; a successful delete forces an immediate
    /// re-listing. Deleting a name absent from the last listing is fine —
    /// the fresh listing simply will not contain it.
    pub async fn delete(&self, name: &str) -> Result<(), CallError> {
        let path = format!("{}/{}", self.directory.trim_end_matches('/'), name);
        self.transport
            .invoke(
                &self.endpoint,
                Command::with_args("delete_file", vec![json!(path)]),
            )
            .await?;
        info!("Deleted {path}");
        self.refresh();
        Ok(())
    }

    /// Static download prefix for the catalog's directory; the UI layer
    /// links file names under it.
    pub async fn static_url(&self) -> Result<String, CallError> {
        let value = self
            .transport
            .invoke(
                &self.endpoint,
                Command::with_args("static_directory", vec![json!(self.directory)]),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| {
            let message = format!("static_directory payload: {e}");
            self.sink.record(ErrorKind::Protocol, &self.endpoint, &message);
            CallError::Protocol(message)
        })
    }

    /// Current snapshot, sorted by name.
    pub fn entries(&self) -> Vec<FileEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

// ─── tests ───────────────────────────────────────────────────────────────
