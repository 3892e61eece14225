//! Per-monitor state machine and self-scheduling poller.
//!
//! Each monitor owns its endpoint, the latest state snapshot, and its own
//! poll timer. The polling loop is serialized: a new poll is scheduled
//! only after the previous response (success or error) has been
//! processed, so a monitor never has two outstanding requests or two
//! pending timers. A failed fetch leaves the last-known snapshot in place
//! and the retry keeps the prior cadence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use camwatch_common::config::Config;
use camwatch_common::protocol::{Command, FileEntry, MonitorSnapshot, MonitorStatus};

use crate::endpoint::Endpoint;
use crate::sink::{ErrorKind, ErrorSink};
use crate::transport::{CallError, Transport};

/// Poll delays by last-observed state. A recording monitor's state
/// changes slowly, so it is polled less aggressively than an idle one.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub idle: Duration,
    pub recording: Duration,
}

impl Cadence {
    pub fn from_config(config: &Config) -> Self {
        Cadence {
            idle: config.idle_poll(),
            recording: config.recording_poll(),
        }
    }
}

/// Refusal of a recording toggle.
#[derive(Debug, Error)]
pub enum ToggleError {
    /// The monitor has not reported state yet; toggling would guess the
    /// direction. Refresh first.
    #[error("monitor state unknown; refresh before toggling")]
    StateUnknown,
    #[error(transparent)]
    Call(#[from] CallError),
}

/// One supervised monitor unit.
pub struct Monitor {
    endpoint: Endpoint,
    address: String,
    port: u16,
    transport: Arc<dyn Transport>,
    sink: ErrorSink,
    cadence: Cadence,
    snapshot: Mutex<Option<MonitorSnapshot>>,
    last_frame: Mutex<Option<Vec<u8>>>,
    refresh: Notify,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(
        endpoint: Endpoint,
        address: String,
        port: u16,
        transport: Arc<dyn Transport>,
        sink: ErrorSink,
        cadence: Cadence,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Monitor {
            endpoint,
            address,
            port,
            transport,
            sink,
            cadence,
            snapshot: Mutex::new(None),
            last_frame: Mutex::new(None),
            refresh: Notify::new(),
            cancel,
        })
    }

    /// Start the polling loop. The first poll is issued immediately;
    /// afterwards the loop re-schedules itself forever.
    pub fn spawn(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.poll_loop().await;
        });
    }

    async fn poll_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.poll_once().await;
            let delay = self.next_delay();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.refresh.notified() => {}
            }
        }
        debug!("{}: polling stopped", self.address);
    }

    /// One `get_state` round trip. Errors are recorded by the transport;
    /// the last-known snapshot persists and rescheduling continues.
    pub(crate) async fn poll_once(&self) {
        if let Ok(value) = self
            .transport
            .invoke(&self.endpoint, Command::new("get_state"))
            .await
        {
            if let Ok(snapshot) = self.decode::<MonitorSnapshot>("get_state", value) {
                *self.snapshot.lock().unwrap() = Some(snapshot);
                debug!("{}: {}", self.address, self.status());
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let recording = self
            .snapshot
            .lock()
            .unwrap()
            .map(|s| s.recording)
            .unwrap_or(false);
        if recording {
            self.cadence.recording
        } else {
            self.cadence.idle
        }
    }

    /// Cancel the pending timer and re-poll immediately. Idempotent; safe
    /// to call while a poll is already scheduled or in flight.
    pub fn refresh_state(&self) {
        self.refresh.notify_one();
    }

    pub async fn start_recording(&self) -> Result<(), CallError> {
        self.transport
            .invoke(&self.endpoint, Command::new("start_recording"))
            .await?;
        Ok(())
    }

    pub async fn stop_recording(&self) -> Result<(), CallError> {
        self.transport
            .invoke(&self.endpoint, Command::new("stop_recording"))
            .await?;
        Ok(())
    }

    /// Issue the opposite of the last-known `recording` flag, then
    /// re-poll so the view converges to ground truth. Refused while the
    /// monitor's state is still unknown.
    pub async fn toggle_recording(&self) -> Result<(), ToggleError> {
        let recording = match *self.snapshot.lock().unwrap() {
            None => return Err(ToggleError::StateUnknown),
            Some(s) => s.recording,
        };
        if recording {
            self.stop_recording().await?;
        } else {
            self.start_recording().await?;
        }
        self.refresh_state();
        Ok(())
    }

    /// Fetch the live image. The frame travels base64-encoded; the
    /// decoded bytes are retained for the UI layer and returned.
    pub async fn fetch_current_frame(&self) -> Result<Vec<u8>, CallError> {
        let value = self
            .transport
            .invoke(&self.endpoint, Command::new("current_frame"))
            .await?;
        let encoded: String = self.decode("current_frame", value)?;
        let bytes = BASE64.decode(encoded.trim().as_bytes()).map_err(|e| {
            let message = format!("current_frame payload not base64: {e}");
            self.sink.record(ErrorKind::Protocol, &self.endpoint, &message);
            CallError::Protocol(message)
        })?;
        *self.last_frame.lock().unwrap() = Some(bytes.clone());
        Ok(bytes)
    }

    /// URL of the monitor's own page.
    pub async fn link_url(&self) -> Result<String, CallError> {
        let value = self
            .transport
            .invoke(&self.endpoint, Command::new("link_url"))
            .await?;
        self.decode("link_url", value)
    }

    /// Listing of the monitor's own files under `directory`.
    pub async fn file_info(&self, directory: &str) -> Result<Vec<FileEntry>, CallError> {
        let value = self
            .transport
            .invoke(
                &self.endpoint,
                Command::with_args("get_file_info", vec![json!(directory)]),
            )
            .await?;
        self.decode("get_file_info", value)
    }

    /// The monitor's configuration document, opaque to the controller.
    pub async fn get_config(&self) -> Result<Value, CallError> {
        self.transport
            .invoke(&self.endpoint, Command::new("get_config"))
            .await
    }

    /// Replace the monitor's configuration; `save` persists it on the
    /// unit across restarts.
    pub async fn set_config(&self, config: Value, save: bool) -> Result<(), CallError> {
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("save".into(), json!(save));
        self.transport
            .invoke(
                &self.endpoint,
                Command::with_args("set_config", vec![config]).with_kwargs(kwargs),
            )
            .await?;
        Ok(())
    }

    /// A result payload that does not match the expected shape is a
    /// protocol failure; the envelope itself was well-formed.
    fn decode<T: DeserializeOwned>(&self, method: &str, value: Value) -> Result<T, CallError> {
        serde_json::from_value(value).map_err(|e| {
            let message = format!("{method} payload: {e}");
            self.sink.record(ErrorKind::Protocol, &self.endpoint, &message);
            CallError::Protocol(message)
        })
    }

    // ── accessors ────────────────────────────────────────────────────

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Latest snapshot; `None` until the first successful poll.
    pub fn snapshot(&self) -> Option<MonitorSnapshot> {
        *self.snapshot.lock().unwrap()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus::derive(self.snapshot.lock().unwrap().as_ref())
    }

    /// Most recently fetched frame, if any.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.last_frame.lock().unwrap().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

// ─── tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{settle, state_json, FakeTransport};
    use tokio::time::advance;

    const BASE: &str = "http://control:8080";

    fn cadence() -> Cadence {
        Cadence {
            idle: Duration::from_secs(3),
            recording: Duration::from_secs(10),
        }
    }

    fn monitor(transport: Arc<FakeTransport>, sink: ErrorSink) -> Arc<Monitor> {
        Monitor::new(
            Endpoint::monitor(BASE, "10.0.0.23"),
            "10.0.0.23".into(),
            8000,
            transport,
            sink,
            cadence(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_first_fetch_leaves_unknown_behind() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "get_state",
            vec![Ok(state_json(false, false, 1_000_000))],
        );

        assert_eq!(m.status(), MonitorStatus::Unknown);
        m.poll_once().await;
        assert_eq!(m.status(), MonitorStatus::Idle);
        assert_eq!(m.snapshot().unwrap().disk_space_bytes, 1_000_000);
    }

    #[tokio::test]
    async fn test_snapshot_replaced_wholesale() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "get_state",
            vec![
                Ok(state_json(true, true, 500)),
                Ok(state_json(false, false, 900)),
            ],
        );

        m.poll_once().await;
        assert_eq!(m.status(), MonitorStatus::RecordingConverting);
        m.poll_once().await;
        // Status is a function of the latest snapshot only.
        assert_eq!(m.status(), MonitorStatus::Idle);
        assert_eq!(m.snapshot().unwrap().disk_space_bytes, 900);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_last_known_state() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "get_state",
            vec![
                Ok(state_json(true, false, 500)),
                Err(CallError::Transport("connection refused".into())),
            ],
        );

        m.poll_once().await;
        assert_eq!(m.status(), MonitorStatus::Recording);
        m.poll_once().await;
        assert_eq!(m.status(), MonitorStatus::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_monitor_polls_at_short_cadence() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "get_state", vec![Ok(state_json(false, false, 0))]);

        m.spawn();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 2);

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_monitor_polls_at_long_cadence() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "get_state", vec![Ok(state_json(true, false, 0))]);

        m.spawn();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);

        // The idle interval passes without a poll...
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);

        // ...the recording interval triggers one.
        advance(Duration::from_secs(7)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_monitor_retries_at_short_cadence() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "get_state",
            vec![Err(CallError::Transport("unreachable".into()))],
        );

        m.spawn();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);
        assert_eq!(m.status(), MonitorStatus::Unknown);

        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_state_cancels_timer_and_reissues() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "get_state", vec![Ok(state_json(false, false, 0))]);

        m.spawn();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);

        m.refresh_state();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 2);

        // Only the rescheduled timer remains: one more poll per interval.
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 3);
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_is_recorded_and_polling_continues() {
        let transport = FakeTransport::new();
        let sink = ErrorSink::new(8);
        transport.route_errors_to(sink.clone());
        let m = monitor(transport.clone(), sink.clone());
        transport.script(
            m.endpoint(),
            "get_state",
            vec![
                Ok(state_json(false, false, 0)),
                Err(CallError::Protocol("disk unavailable".into())),
                Ok(state_json(false, false, 0)),
            ],
        );

        m.spawn();
        settle().await;
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 2);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].kind, ErrorKind::Protocol);
        // Last-known state persists and the next poll keeps the cadence.
        assert_eq!(m.status(), MonitorStatus::Idle);
        advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "get_state", vec![Ok(state_json(false, false, 0))]);

        m.spawn();
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);

        m.cancel();
        advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(transport.calls_for("get_state"), 1);
    }

    #[tokio::test]
    async fn test_toggle_refused_while_unknown() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));

        let err = m.toggle_recording().await.unwrap_err();
        assert!(matches!(err, ToggleError::StateUnknown));
        assert_eq!(transport.calls_for("start_recording"), 0);
        assert_eq!(transport.calls_for("stop_recording"), 0);
    }

    #[tokio::test]
    async fn test_toggle_issues_opposite_of_last_known() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "get_state", vec![Ok(state_json(true, false, 0))]);
        transport.script(m.endpoint(), "stop_recording", vec![Ok(Value::Null)]);

        m.poll_once().await;
        m.toggle_recording().await.unwrap();
        assert_eq!(transport.calls_for("stop_recording"), 1);
        assert_eq!(transport.calls_for("start_recording"), 0);
    }

    #[tokio::test]
    async fn test_fetch_current_frame_decodes_and_retains() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        let encoded = BASE64.encode(b"jpeg bytes");
        transport.script(m.endpoint(), "current_frame", vec![Ok(json!(encoded))]);

        assert!(m.last_frame().is_none());
        let bytes = m.fetch_current_frame().await.unwrap();
        assert_eq!(bytes, b"jpeg bytes");
        assert_eq!(m.last_frame().unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_bad_frame_payload_is_a_protocol_error() {
        let transport = FakeTransport::new();
        let sink = ErrorSink::new(8);
        let m = monitor(transport.clone(), sink.clone());
        transport.script(m.endpoint(), "current_frame", vec![Ok(json!("@not-base64@"))]);

        let err = m.fetch_current_frame().await.unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
        assert_eq!(sink.len(), 1);
        assert!(m.last_frame().is_none());
    }

    #[tokio::test]
    async fn test_link_url_returns_the_monitor_page() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "link_url",
            vec![Ok(json!("http://10.0.0.23:8000/"))],
        );

        assert_eq!(m.link_url().await.unwrap(), "http://10.0.0.23:8000/");
    }

    #[tokio::test]
    async fn test_file_info_decodes_entries() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(
            m.endpoint(),
            "get_file_info",
            vec![Ok(json!([{"name": "a.h264", "open": false}]))],
        );

        let entries = m.file_info("/videos").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.h264");
        assert!(!entries[0].open);
    }

    #[tokio::test]
    async fn test_set_config_sends_save_kwarg() {
        let transport = FakeTransport::new();
        let m = monitor(transport.clone(), ErrorSink::new(8));
        transport.script(m.endpoint(), "set_config", vec![Ok(Value::Null)]);

        m.set_config(json!({"record": false}), true).await.unwrap();
        assert_eq!(transport.calls_for("set_config"), 1);
    }
}
