//! Configuration parsing – reads a KEY=VALUE file (`camwatch.conf`).
//!
//! Every key has a default so the controller runs with an empty or absent
//! section of the file; deployments only override what they need.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── fleet ────────────────────────────────────────────────────────
    /// Base URL of the control server that relays commands to monitors.
    pub controller_url: String,
    /// Shared video directory listed by the file catalog and used for
    /// bulk transfers.
    pub video_dir: String,

    // ── poll cadences ────────────────────────────────────────────────
    /// Cadence for a monitor that is not recording.
    pub idle_poll_secs: u64,
    /// Cadence for a recording monitor; its state changes slowly, so it
    /// is polled less often.
    pub recording_poll_secs: u64,
    /// Cadence for conversion/transfer job status checks.
    pub job_poll_secs: u64,
    /// Cadence for the shared file-catalog listing.
    pub catalog_poll_secs: u64,
    /// Period between live-image refreshes while streaming.
    pub stream_period_ms: u64,

    // ── hardening ────────────────────────────────────────────────────
    /// Per-call HTTP timeout; a hung request takes this error path
    /// instead of stalling its monitor's polling forever.
    pub http_timeout_secs: u64,
    /// Maximum retained error-log entries (drop-oldest).
    pub error_log_cap: usize,
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/camwatch/camwatch.conf"
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    pub fn recording_poll(&self) -> Duration {
        Duration::from_secs(self.recording_poll_secs)
    }

    pub fn job_poll(&self) -> Duration {
        Duration::from_secs(self.job_poll_secs)
    }

    pub fn catalog_poll(&self) -> Duration {
        Duration::from_secs(self.catalog_poll_secs)
    }

    pub fn stream_period(&self) -> Duration {
        Duration::from_millis(self.stream_period_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            controller_url: "http://127.0.0.1:8080".into(),
            video_dir: "/home/pi/videos".into(),
            idle_poll_secs: 3,
            recording_poll_secs: 10,
            job_poll_secs: 1,
            catalog_poll_secs: 5,
            stream_period_ms: 1000,
            http_timeout_secs: 30,
            error_log_cap: 256,
        }
    }
}

/// Parse a `KEY=VALUE` configuration file.
///
/// Lines starting with `#` are comments.  Values may be optionally
/// double-quoted.  Unknown keys are silently ignored.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let config = from_str(&text);
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Build a [`Config`] from file text, falling back to defaults per key.
pub fn from_str(text: &str) -> Config {
    let map = parse_conf(text);
    let defaults = Config::default();

    let get = |key: &str| -> Option<String> { map.get(key).cloned() };
    let get_u64 = |key: &str, default: u64| -> u64 {
        get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    };

    Config {
        controller_url: get("CONTROLLER_URL").unwrap_or(defaults.controller_url),
        video_dir: get("VIDEO_DIR").unwrap_or(defaults.video_dir),
        idle_poll_secs: get_u64("IDLE_POLL_SECS", defaults.idle_poll_secs),
        recording_poll_secs: get_u64("RECORDING_POLL_SECS", defaults.recording_poll_secs),
        job_poll_secs: get_u64("JOB_POLL_SECS", defaults.job_poll_secs),
        catalog_poll_secs: get_u64("CATALOG_POLL_SECS", defaults.catalog_poll_secs),
        stream_period_ms: get_u64("STREAM_PERIOD_MS", defaults.stream_period_ms),
        http_timeout_secs: get_u64("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        error_log_cap: get_u64("ERROR_LOG_CAP", defaults.error_log_cap as u64) as usize,
    }
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────
