//! Command transport: one POSTed envelope per call, one classified
//! outcome per call.
//!
//! A call produces exactly one of {payload, error}. Non-success HTTP
//! status (or an unreachable endpoint, or the per-call timeout) is a
//! transport error; a well-formed reply flagged `type == "error"` is a
//! protocol error carrying the server message. Either kind is forwarded
//! to the [`ErrorSink`] before being returned; success is silent.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use camwatch_common::protocol::{Command, Reply};

use crate::endpoint::Endpoint;
use crate::sink::{ErrorKind, ErrorSink};

/// Classified failure of a single call. Terminal for that call — the
/// transport never retries — and non-fatal to the caller's schedule.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Transport(_) => ErrorKind::Transport,
            CallError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    fn message(&self) -> &str {
        match self {
            CallError::Transport(m) | CallError::Protocol(m) => m,
        }
    }
}

/// Issues a single command to a named endpoint. Injected into every
/// component so tests can substitute fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, endpoint: &Endpoint, command: Command) -> Result<Value, CallError>;
}

/// Production transport over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    sink: ErrorSink,
}

impl HttpTransport {
    /// `timeout` applies per call; a hung request errors out instead of
    /// stalling its caller's schedule.
    pub fn new(timeout: Duration, sink: ErrorSink) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Cannot create HTTP client")?;
        Ok(HttpTransport { client, sink })
    }

    fn fail(&self, endpoint: &Endpoint, err: CallError) -> CallError {
        self.sink.record(err.kind(), endpoint, err.message());
        err
    }
}

/// Server-supplied error payloads are opaque; strings pass through
/// unquoted, anything else renders as JSON.
fn render_error(error: &Value) -> String {
    match error.as_str() {
        Some(s) => s.to_string(),
        None => error.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, endpoint: &Endpoint, command: Command) -> Result<Value, CallError> {
        let method = command.method.clone();
        let response = self
            .client
            .post(endpoint.url())
            .json(&command)
            .send()
            .await
            .map_err(|e| self.fail(endpoint, CallError::Transport(format!("{method}: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.fail(
                endpoint,
                CallError::Transport(format!("{method}: status {status}")),
            ));
        }

        let reply: Reply = response.json().await.map_err(|e| {
            self.fail(
                endpoint,
                CallError::Transport(format!("{method}: bad reply: {e}")),
            )
        })?;

        match reply {
            Reply::Result { result } => Ok(result),
            Reply::Error { error } => Err(self.fail(
                endpoint,
                CallError::Protocol(format!("{method}: {}", render_error(&error))),
            )),
        }
    }
}

// ─── tests ───────────────────────────────────────────────────────────────
