//! Fleet assembly and fleet-wide actions.
//!
//! The fleet owns one [`Monitor`] per directory entry and derives the
//! fleet-wide recording signal from their snapshots on demand. Fan-out
//! actions dispatch every per-monitor command fire-and-forget: no
//! monitor's command waits on another's, and callers wanting convergence
//! poll again afterwards (recording toggles and bulk jobs already do).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use camwatch_common::protocol::{Command, DirectoryEntry};

use crate::endpoint::Endpoint;
use crate::jobs::{JobError, JobPoller};
use crate::monitor::{Cadence, Monitor};
use crate::sink::{ErrorKind, ErrorSink};
use crate::transport::{CallError, Transport};

/// Consecutive status-check failures tolerated before a bulk job aborts.
const MAX_JOB_CHECK_FAILURES: u32 = 5;

pub struct MonitorFleet {
    monitors: Vec<Arc<Monitor>>,
    transport: Arc<dyn Transport>,
    sink: ErrorSink,
    controller: Endpoint,
    job_interval: Duration,
    stream: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl MonitorFleet {
    /// Fetch the monitor directory from the control server and assemble
    /// the fleet from it.
    pub async fn from_controller(
        base_url: &str,
        transport: Arc<dyn Transport>,
        sink: ErrorSink,
        cadence: Cadence,
        job_interval: Duration,
    ) -> Result<Self, CallError> {
        let controller = Endpoint::controller(base_url);
        let value = transport
            .invoke(&controller, Command::new("get_monitors"))
            .await?;
        let entries: Vec<DirectoryEntry> = serde_json::from_value(value).map_err(|e| {
            let message = format!("get_monitors payload: {e}");
            sink.record(ErrorKind::Protocol, &controller, &message);
            CallError::Protocol(message)
        })?;
        Ok(Self::from_directory(
            base_url,
            &entries,
            transport,
            sink,
            cadence,
            job_interval,
        ))
    }

    /// Assemble the fleet from `(address, port)` entries. Every monitor
    /// begins polling as part of construction.
    pub fn from_directory(
        base_url: &str,
        entries: &[DirectoryEntry],
        transport: Arc<dyn Transport>,
        sink: ErrorSink,
        cadence: Cadence,
        job_interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let monitors = entries
            .iter()
            .map(|(address, port)| {
                let monitor = Monitor::new(
                    Endpoint::monitor(base_url, address),
                    address.clone(),
                    *port,
                    Arc::clone(&transport),
                    sink.clone(),
                    cadence,
                    cancel.child_token(),
                );
                monitor.spawn();
                info!("Supervising monitor {address}:{port}");
                monitor
            })
            .collect();
        MonitorFleet {
            monitors,
            transport,
            sink,
            controller: Endpoint::controller(base_url),
            job_interval,
            stream: Mutex::new(None),
            cancel,
        }
    }

    /// True iff at least one monitor with known state is recording.
    /// Monitors that have not reported yet are excluded; an empty or
    /// all-unknown fleet reads as no known activity.
    pub fn recording_flag(&self) -> bool {
        self.monitors
            .iter()
            .any(|m| m.snapshot().map(|s| s.recording).unwrap_or(false))
    }

    /// If anything is recording, stop every monitor that says it is;
    /// otherwise start them all. Commands are dispatched concurrently
    /// and not awaited; every monitor is then told to re-poll so the
    /// view converges to ground truth rather than an optimistic flip.
    pub fn toggle_fleet_recording(&self) {
        if self.recording_flag() {
            for monitor in &self.monitors {
                if monitor.snapshot().map(|s| s.recording).unwrap_or(false) {
                    let m = Arc::clone(monitor);
                    tokio::spawn(async move {
                        if let Err(e) = m.stop_recording().await {
                            debug!("{}: stop_recording: {e}", m.address());
                        }
                    });
                }
            }
        } else {
            for monitor in &self.monitors {
                let m = Arc::clone(monitor);
                tokio::spawn(async move {
                    if let Err(e) = m.start_recording().await {
                        debug!("{}: start_recording: {e}", m.address());
                    }
                });
            }
        }
        self.refresh_all();
    }

    /// Re-poll every monitor immediately.
    pub fn refresh_all(&self) {
        for monitor in &self.monitors {
            monitor.refresh_state();
        }
    }

    /// Fetch a fresh frame from every monitor. One monitor's failure
    /// never blocks delivery to the others; errors land in the sink.
    pub fn refresh_all_images(&self) {
        fan_out_frames(&self.monitors);
    }

    // ── bulk jobs ────────────────────────────────────────────────────

    /// Convert all recorded files on the control server, polling
    /// `is_converting` until it clears.
    pub async fn convert_all_files(&self) -> Result<(), JobError> {
        self.run_job("convert_all_files", None, "is_converting").await
    }

    /// Transfer files out of `directory`, polling `is_transferring`
    /// until it clears.
    pub async fn transfer_files(&self, directory: &str) -> Result<(), JobError> {
        self.run_job(
            "transfer_files",
            Some(vec![json!(directory)]),
            "is_transferring",
        )
        .await
    }

    async fn run_job(
        &self,
        start_method: &'static str,
        args: Option<Vec<Value>>,
        check_method: &'static str,
    ) -> Result<(), JobError> {
        let start = {
            let transport = Arc::clone(&self.transport);
            let controller = self.controller.clone();
            move || async move {
                let command = match args {
                    Some(args) => Command::with_args(start_method, args),
                    None => Command::new(start_method),
                };
                transport.invoke(&controller, command).await.map(|_| ())
            }
        };
        let check = {
            let transport = Arc::clone(&self.transport);
            let controller = self.controller.clone();
            let sink = self.sink.clone();
            move || {
                let transport = Arc::clone(&transport);
                let controller = controller.clone();
                let sink = sink.clone();
                async move {
                    let value = transport
                        .invoke(&controller, Command::new(check_method))
                        .await?;
                    serde_json::from_value::<bool>(value).map_err(|e| {
                        let message = format!("{check_method} payload: {e}");
                        sink.record(ErrorKind::Protocol, &controller, &message);
                        CallError::Protocol(message)
                    })
                }
            }
        };
        JobPoller::new(self.job_interval, MAX_JOB_CHECK_FAILURES)
            .run(start, check)
            .await?;
        info!("{start_method} finished");
        self.refresh_all();
        Ok(())
    }

    // ── live-image streaming ─────────────────────────────────────────

    /// Refresh all frames on a fixed period. Starting while already
    /// streaming restarts the timer with the new period.
    pub fn start_streaming(&self, period: Duration) {
        let mut stream = self.stream.lock().unwrap();
        if let Some(prev) = stream.take() {
            prev.cancel();
        }
        let token = self.cancel.child_token();
        let monitors = self.monitors.clone();
        let child = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(period) => fan_out_frames(&monitors),
                }
            }
        });
        *stream = Some(token);
        info!("Streaming frames every {period:?}");
    }

    pub fn stop_streaming(&self) {
        if let Some(token) = self.stream.lock().unwrap().take() {
            token.cancel();
            info!("Streaming stopped");
        }
    }

    pub fn toggle_streaming(&self, period: Duration) {
        if self.is_streaming() {
            self.stop_streaming();
        } else {
            self.start_streaming(period);
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.lock().unwrap().is_some()
    }

    // ── lifecycle & accessors ────────────────────────────────────────

    /// Cancel all polling and streaming. Monitors stop after their
    /// in-flight poll, if any, completes.
    pub fn shutdown(&self) {
        self.stop_streaming();
        self.cancel.cancel();
    }

    pub fn monitors(&self) -> &[Arc<Monitor>] {
        &self.monitors
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

fn fan_out_frames(monitors: &[Arc<Monitor>]) {
    for monitor in monitors {
        let m = Arc::clone(monitor);
        tokio::spawn(async move {
            if let Err(e) = m.fetch_current_frame().await {
                debug!("{}: current_frame: {e}", m.address());
            }
        });
    }
}

// ─── tests ───────────────────────────────────────────────────────────────
