//! Boundary trait for the external agent runtime.
//!
//! The runtime is the process that actually performs the delegated work
//! (creating a session, streaming events, honoring aborts). The manager
//! consumes it through this trait so tests can substitute a mock, the
//! same way the factory executor is abstracted behind `TaskRunner`-style
//! seams elsewhere in this codebase's lineage.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::store::models::ToolCallStatus;

/// External agent runtime boundary.
///
/// `delete_session` is best-effort: implementations should try to clean
/// up, but callers swallow its errors.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Liveness probe. A `false` return fails execution start fast.
    async fn check_health(&self) -> Result<bool>;

    /// Create a session rooted at `directory`, returning its id.
    async fn create_session(&self, directory: &str, label: &str) -> Result<String>;

    /// Send the work prompt into an existing session.
    async fn send_prompt(
        &self,
        session_id: &str,
        directory: &str,
        content: &str,
        model: Option<&str>,
    ) -> Result<()>;

    /// Ask the runtime to cancel a session's in-flight work.
    async fn abort_session(&self, session_id: &str, directory: &str) -> Result<()>;

    /// Tear a session down. Best-effort.
    async fn delete_session(&self, session_id: &str, directory: &str) -> Result<()>;

    /// Subscribe to the runtime's event feed. Events for all sessions
    /// arrive on one channel, keyed by session id; dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RuntimeEvent>;
}

/// One tool invocation as reported by the runtime.
///
/// `call_id` is the runtime's own identifier for the invocation; the
/// manager uses it to de-duplicate repeated reports of the same call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallUpdate {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolCallStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<String>,
}

/// Events delivered by the runtime's feed, keyed by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Informational session status ("busy", "idle", ...). The manager
    /// derives chunk status from its own lifecycle, not from these.
    Status {
        session_id: String,
        status: String,
    },
    ToolCall {
        session_id: String,
        update: ToolCallUpdate,
    },
    Text {
        session_id: String,
        content: String,
    },
    Completed {
        session_id: String,
    },
    Error {
        session_id: String,
        message: String,
    },
}

impl RuntimeEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Status { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::Text { session_id, .. }
            | Self::Completed { session_id }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}
