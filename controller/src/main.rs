//! Camwatch Controller – supervises a fleet of camera/recording units.
//!
//! This binary:
//! 1. Reads configuration from `camwatch.conf`
//! 2. Fetches the monitor directory from the control server
//! 3. Assembles the fleet; every monitor polls itself adaptively
//! 4. Runs the shared file catalog and live-image streaming until
//!    shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use camwatch_common::config;
use camwatch_controller::catalog::FileCatalog;
use camwatch_controller::fleet::MonitorFleet;
use camwatch_controller::monitor::Cadence;
use camwatch_controller::sink::ErrorSink;
use camwatch_controller::transport::{HttpTransport, Transport};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::Config::default_path().to_string());
    let config =
        config::load(std::path::Path::new(&config_path)).context("Config load failed")?;

    info!(
        "Camwatch Controller starting (controller_url={})",
        config.controller_url
    );

    // ── ctrl-c ───────────────────────────────────────────────────────
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    // ── assemble the fleet ───────────────────────────────────────────
    let sink = ErrorSink::new(config.error_log_cap);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
        Duration::from_secs(config.http_timeout_secs),
        sink.clone(),
    )?);

    let fleet = MonitorFleet::from_controller(
        &config.controller_url,
        Arc::clone(&transport),
        sink.clone(),
        Cadence::from_config(&config),
        config.job_poll(),
    )
    .await
    .context("Cannot fetch monitor directory")?;
    info!("Supervising {} monitor(s)", fleet.len());

    // ── file catalog ─────────────────────────────────────────────────
    let catalog = FileCatalog::new(
        &config.controller_url,
        config.video_dir.clone(),
        Arc::clone(&transport),
        sink.clone(),
        config.catalog_poll(),
        CancellationToken::new(),
    );
    catalog.spawn();

    // ── live images ──────────────────────────────────────────────────
    fleet.start_streaming(config.stream_period());

    // ── supervise until shutdown ─────────────────────────────────────
    let mut recording = fleet.recording_flag();
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if SHUTDOWN.load(Ordering::Relaxed) {
            break;
        }
        let now = fleet.recording_flag();
        if now != recording {
            recording = now;
            info!(
                "Fleet recording: {}",
                if recording { "active" } else { "stopped" }
            );
        }
    }

    fleet.shutdown();
    catalog.cancel();
    info!("Camwatch Controller stopped");
    Ok(())
}
