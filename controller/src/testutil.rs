//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use camwatch_common::protocol::Command;

use crate::endpoint::Endpoint;
use crate::sink::ErrorSink;
use crate::transport::{CallError, Transport};

/// Scripted transport. Replies are keyed by (endpoint, method); the last
/// scripted reply is sticky so polling loops keep observing it. Calls to
/// anything unscripted fail with a transport error.
pub struct FakeTransport {
    calls: Mutex<Vec<(String, String)>>,
    replies: Mutex<HashMap<(String, String), VecDeque<Result<Value, CallError>>>>,
    sink: Mutex<Option<ErrorSink>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeTransport {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
        })
    }

    /// Mirror the production transport's side effect of recording every
    /// failed call. Off by default; tests asserting sink contents opt in.
    pub fn route_errors_to(&self, sink: ErrorSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    pub fn script(
        &self,
        endpoint: &Endpoint,
        method: &str,
        replies: Vec<Result<Value, CallError>>,
    ) {
        self.replies
            .lock()
            .unwrap()
            .insert((endpoint.url().to_string(), method.to_string()), replies.into());
    }

    /// All calls so far as (endpoint url, method), in dispatch order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| m == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn invoke(&self, endpoint: &Endpoint, command: Command) -> Result<Value, CallError> {
        let key = (endpoint.url().to_string(), command.method.clone());
        self.calls.lock().unwrap().push(key.clone());
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(CallError::Transport("scripted empty".into()))),
                None => Err(CallError::Transport(format!(
                    "unscripted call: {} on {}",
                    command.method, endpoint
                ))),
            }
        };
        if let Err(err) = &reply {
            if let Some(sink) = self.sink.lock().unwrap().as_ref() {
                sink.record(err.kind(), endpoint, &err.to_string());
            }
        }
        reply
    }
}

/// JSON payload of a `get_state` reply.
pub fn state_json(recording: bool, converting: bool, disk_space_bytes: u64) -> Value {
    json!({
        "recording": recording,
        "converting": converting,
        "disk_space_bytes": disk_space_bytes,
    })
}

/// Let spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
