//! Per-chunk execution events and the replay log that fans them out.
//!
//! Every event is appended to the buffer before fan-out, and `subscribe`
//! delivers the buffered prefix into the new channel under the same lock
//! `emit` takes. A subscriber attaching after N events therefore receives
//! exactly those N events, in order, before anything emitted later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::store::models::{ChunkStatus, ToolCall};

/// Events emitted over one chunk's execution lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Status {
        chunk_id: i64,
        status: ChunkStatus,
        at: DateTime<Utc>,
    },
    ToolCall {
        chunk_id: i64,
        tool_call: ToolCall,
        at: DateTime<Utc>,
    },
    Text {
        chunk_id: i64,
        content: String,
        at: DateTime<Utc>,
    },
    Complete {
        chunk_id: i64,
        output: String,
        at: DateTime<Utc>,
    },
    Error {
        chunk_id: i64,
        message: String,
        at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn status(chunk_id: i64, status: ChunkStatus) -> Self {
        Self::Status {
            chunk_id,
            status,
            at: Utc::now(),
        }
    }

    pub fn tool_call(chunk_id: i64, tool_call: ToolCall) -> Self {
        Self::ToolCall {
            chunk_id,
            tool_call,
            at: Utc::now(),
        }
    }

    pub fn text(chunk_id: i64, content: impl Into<String>) -> Self {
        Self::Text {
            chunk_id,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn complete(chunk_id: i64, output: impl Into<String>) -> Self {
        Self::Complete {
            chunk_id,
            output: output.into(),
            at: Utc::now(),
        }
    }

    pub fn error(chunk_id: i64, message: impl Into<String>) -> Self {
        Self::Error {
            chunk_id,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// True for the events that end a chunk's stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(
                status,
                ChunkStatus::Completed | ChunkStatus::Failed | ChunkStatus::Cancelled
            ),
            Self::Complete { .. } | Self::Error { .. } => true,
            _ => false,
        }
    }
}

/// Replay log + live fan-out for one chunk's events.
pub struct EventLog {
    inner: std::sync::Mutex<EventLogInner>,
}

struct EventLogInner {
    buffer: Vec<ExecutionEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(EventLogInner {
                buffer: Vec::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Attach a subscriber: the buffered prefix is queued into the fresh
    /// channel before the sender joins the live set, all under one lock.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        for event in &inner.buffer {
            // Unbounded send only fails when the receiver is gone, which
            // cannot happen while we hold `rx` in this scope.
            let _ = tx.send(event.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Append to the buffer, then fan out to live subscribers. Closed
    /// subscribers are dropped from the set.
    pub fn emit(&self, event: ExecutionEvent) {
        let mut inner = self.lock();
        inner.buffer.push(event.clone());
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn buffered(&self) -> Vec<ExecutionEvent> {
        self.lock().buffer.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventLogInner> {
        // The lock is never held across a panic-prone section; recover
        // the inner state rather than poisoning the whole execution.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
