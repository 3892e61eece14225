//! Fire-then-poll primitive for long-running server-side jobs.
//!
//! Conversion and transfer run on the control server with no push
//! notification; a boolean "still running" poll is the only liveness
//! signal. [`JobPoller::run`] starts the job once, then checks the flag
//! on a fixed delay until it clears. A failed check counts as "still
//! running" — the job may well be — but a run of consecutive failures
//! aborts the wait instead of polling a dead endpoint forever.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::transport::CallError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job start failed: {0}")]
    StartFailed(#[source] CallError),
    #[error("job status check failed {failures} times in a row: {last}")]
    CheckFailed { failures: u32, last: CallError },
}

pub struct JobPoller {
    interval: Duration,
    max_failures: u32,
}

impl JobPoller {
    pub fn new(interval: Duration, max_failures: u32) -> Self {
        JobPoller {
            interval,
            max_failures: max_failures.max(1),
        }
    }

    /// Invoke `start` exactly once, then poll `check` every interval
    /// until it reports `false`. Resolves exactly once.
    pub async fn run<S, SF, C, CF>(&self, start: S, check: C) -> Result<(), JobError>
    where
        S: FnOnce() -> SF,
        SF: Future<Output = Result<(), CallError>>,
        C: Fn() -> CF,
        CF: Future<Output = Result<bool, CallError>>,
    {
        start().await.map_err(JobError::StartFailed)?;
        let mut failures = 0u32;
        loop {
            tokio::time::sleep(self.interval).await;
            match check().await {
                Ok(false) => return Ok(()),
                Ok(true) => failures = 0,
                Err(last) => {
                    // Errors are already in the sink via the transport;
                    // here they only count toward the abort threshold.
                    failures += 1;
                    debug!("job check failure {failures}/{}", self.max_failures);
                    if failures >= self.max_failures {
                        return Err(JobError::CheckFailed { failures, last });
                    }
                }
            }
        }
    }
}

// ─── tests ───────────────────────────────────────────────────────────────
