//! Execution session manager.
//!
//! Runs exactly one external-agent session per chunk and multiplexes its
//! events to any number of subscribers through the per-chunk [`EventLog`].
//! At most one execution is active system-wide: concurrent chunk
//! executions commonly target the same working directory and could race
//! on file edits, so the manager serializes globally rather than
//! per-directory.
//!
//! ## Usage
//!
//! ```ignore
//! let manager = ExecutionManager::new(db, runtime, ExecutionConfig::default());
//! let mut events = manager.start_chunk(chunk_id).await?;
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() { break; }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::SessionError;
use crate::session::events::{EventLog, ExecutionEvent};
use crate::session::runtime::{AgentRuntime, RuntimeEvent, ToolCallUpdate};
use crate::store::DbHandle;
use crate::store::models::{Chunk, ChunkStatus, ToolCallStatus};

/// Tunables for a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Wall-clock ceiling for one chunk, independent of agent activity.
    pub timeout: Duration,
    /// Model selector forwarded to the runtime, if any.
    pub model: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            model: None,
        }
    }
}

impl ExecutionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// In-memory handle to the one live agent session. Never persisted.
struct ActiveExecution {
    chunk_id: i64,
    session_id: String,
    directory: String,
    started_at: DateTime<Utc>,
    events: Arc<EventLog>,
    /// agent-reported call id → persisted tool_calls row id
    call_ids: HashMap<String, i64>,
    accumulated: String,
    timeout_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

struct Shared {
    db: DbHandle,
    runtime: Arc<dyn AgentRuntime>,
    active: Mutex<Option<ActiveExecution>>,
}

/// Which task is driving a terminal transition. `finalize` must not
/// abort the task it is running inside of.
enum FinalizeOrigin {
    Pump,
    Timeout,
    External,
}

pub struct ExecutionManager {
    shared: Arc<Shared>,
    config: ExecutionConfig,
}

impl ExecutionManager {
    pub fn new(db: DbHandle, runtime: Arc<dyn AgentRuntime>, config: ExecutionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                db,
                runtime,
                active: Mutex::new(None),
            }),
            config,
        }
    }

    /// Start executing a chunk. Fails fast, without any state transition,
    /// if the chunk/spec/project is missing, another execution is active,
    /// the runtime is unhealthy, or session creation fails. On success the
    /// chunk is `running` and the returned receiver carries its events
    /// from the beginning.
    pub async fn start_chunk(
        &self,
        chunk_id: i64,
    ) -> Result<mpsc::UnboundedReceiver<ExecutionEvent>, SessionError> {
        let chunk = self
            .shared
            .db
            .call(move |db| db.get_chunk(chunk_id))
            .await?
            .ok_or(SessionError::ChunkNotFound { id: chunk_id })?;
        let spec_id = chunk.spec_id;
        let spec = self
            .shared
            .db
            .call(move |db| db.get_spec(spec_id))
            .await?
            .ok_or(SessionError::SpecNotFound { id: spec_id })?;
        let project_id = spec.project_id;
        let project = self
            .shared
            .db
            .call(move |db| db.get_project(project_id))
            .await?
            .ok_or(SessionError::ProjectNotFound { id: project_id })?;

        // The slot lock is held through session creation so two
        // concurrent starts cannot both pass the single-slot check.
        let mut slot = self.shared.active.lock().await;
        if let Some(active) = slot.as_ref() {
            return Err(SessionError::ExecutionActive {
                active_chunk_id: active.chunk_id,
            });
        }

        let healthy = self
            .shared
            .runtime
            .check_health()
            .await
            .unwrap_or(false);
        if !healthy {
            return Err(SessionError::RuntimeUnhealthy);
        }

        let label = format!("chunk-{}-{}", chunk_id, Uuid::new_v4());
        let session_id = self
            .shared
            .runtime
            .create_session(&project.path, &label)
            .await
            .map_err(SessionError::SessionCreateFailed)?;

        // From here the chunk transitions to running.
        self.shared
            .db
            .call(move |db| db.update_chunk_status(chunk_id, &ChunkStatus::Running, None, None))
            .await?;

        let events = Arc::new(EventLog::new());
        events.emit(ExecutionEvent::status(chunk_id, ChunkStatus::Running));
        let receiver = events.subscribe();

        let runtime_rx = self.shared.runtime.subscribe();
        let pump_task = tokio::spawn(pump_events(
            self.shared.clone(),
            chunk_id,
            session_id.clone(),
            runtime_rx,
        ));
        let timeout_task = tokio::spawn(run_timeout(
            self.shared.clone(),
            chunk_id,
            self.config.timeout,
        ));

        *slot = Some(ActiveExecution {
            chunk_id,
            session_id: session_id.clone(),
            directory: project.path.clone(),
            started_at: Utc::now(),
            events,
            call_ids: HashMap::new(),
            accumulated: String::new(),
            timeout_task: Some(timeout_task),
            pump_task: Some(pump_task),
        });
        drop(slot);

        let prompt = build_prompt(&chunk);
        if let Err(e) = self
            .shared
            .runtime
            .send_prompt(
                &session_id,
                &project.path,
                &prompt,
                self.config.model.as_deref(),
            )
            .await
        {
            warn!(chunk_id, error = %e, "prompt send failed, finalizing as failed");
            finalize(
                &self.shared,
                chunk_id,
                FinalizeOrigin::External,
                ChunkStatus::Failed,
                Some(format!("Failed to send prompt: {}", e)),
            )
            .await;
            return Err(SessionError::PromptSendFailed {
                session_id,
                source: e,
            });
        }

        info!(chunk_id, session_id = %session_id, "execution started");
        Ok(receiver)
    }

    /// Attach a late subscriber to the active execution's event stream.
    /// The receiver first replays everything emitted so far, in order.
    pub async fn subscribe(
        &self,
        chunk_id: i64,
    ) -> Result<mpsc::UnboundedReceiver<ExecutionEvent>, SessionError> {
        let slot = self.shared.active.lock().await;
        match slot.as_ref() {
            Some(active) if active.chunk_id == chunk_id => Ok(active.events.subscribe()),
            _ => Err(SessionError::NoActiveExecution { id: chunk_id }),
        }
    }

    /// Abort the active execution for `chunk_id`. The chunk ends
    /// `cancelled` when the runtime accepts the abort, `failed` (carrying
    /// the abort error) when it does not; it is never left `running`.
    pub async fn abort(&self, chunk_id: i64) -> Result<(), SessionError> {
        let (session_id, directory) = {
            let slot = self.shared.active.lock().await;
            match slot.as_ref() {
                Some(active) if active.chunk_id == chunk_id => {
                    (active.session_id.clone(), active.directory.clone())
                }
                _ => return Err(SessionError::NoActiveExecution { id: chunk_id }),
            }
        };

        match self
            .shared
            .runtime
            .abort_session(&session_id, &directory)
            .await
        {
            Ok(()) => {
                finalize(
                    &self.shared,
                    chunk_id,
                    FinalizeOrigin::External,
                    ChunkStatus::Cancelled,
                    Some("Aborted by user".to_string()),
                )
                .await;
            }
            Err(e) => {
                finalize(
                    &self.shared,
                    chunk_id,
                    FinalizeOrigin::External,
                    ChunkStatus::Failed,
                    Some(format!("Abort failed: {}", e)),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Chunk id of the active execution, if any.
    pub async fn active_chunk_id(&self) -> Option<i64> {
        self.shared.active.lock().await.as_ref().map(|a| a.chunk_id)
    }
}

fn build_prompt(chunk: &Chunk) -> String {
    format!("## Task: {}\n\n{}", chunk.title, chunk.description)
}

/// Forward runtime events for one session into the chunk's event log and
/// the store, until a terminal event arrives or the feed closes.
async fn pump_events(
    shared: Arc<Shared>,
    chunk_id: i64,
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<RuntimeEvent>,
) {
    while let Some(event) = rx.recv().await {
        if event.session_id() != session_id {
            continue;
        }
        match event {
            RuntimeEvent::Status { status, .. } => {
                // Informational only; chunk status is driven by lifecycle.
                debug!(chunk_id, %status, "runtime session status");
            }
            RuntimeEvent::ToolCall { update, .. } => {
                if let Err(e) = record_tool_call(&shared, chunk_id, update).await {
                    warn!(chunk_id, error = %e, "failed to record tool call");
                }
            }
            RuntimeEvent::Text { content, .. } => {
                let events = {
                    let mut slot = shared.active.lock().await;
                    match slot.as_mut() {
                        Some(active) if active.chunk_id == chunk_id => {
                            active.accumulated.push_str(&content);
                            Some(active.events.clone())
                        }
                        _ => None,
                    }
                };
                if let Some(events) = events {
                    events.emit(ExecutionEvent::text(chunk_id, content));
                }
            }
            RuntimeEvent::Completed { .. } => {
                finalize(
                    &shared,
                    chunk_id,
                    FinalizeOrigin::Pump,
                    ChunkStatus::Completed,
                    None,
                )
                .await;
                break;
            }
            RuntimeEvent::Error { message, .. } => {
                finalize(
                    &shared,
                    chunk_id,
                    FinalizeOrigin::Pump,
                    ChunkStatus::Failed,
                    Some(message),
                )
                .await;
                break;
            }
        }
    }
}

/// Persist a tool-call report, de-duplicated by agent call id: the first
/// sighting creates the row, later sightings update it in place.
async fn record_tool_call(
    shared: &Arc<Shared>,
    chunk_id: i64,
    update: ToolCallUpdate,
) -> anyhow::Result<()> {
    let existing = {
        let slot = shared.active.lock().await;
        slot.as_ref()
            .filter(|a| a.chunk_id == chunk_id)
            .and_then(|a| a.call_ids.get(&update.call_id).copied())
    };

    let stored = match existing {
        Some(row_id) => {
            let status = update.status.clone();
            let output = update.output.clone();
            shared
                .db
                .call(move |db| db.update_tool_call(row_id, &status, output.as_deref()))
                .await?
        }
        None => {
            let u = update.clone();
            let created = shared
                .db
                .call(move |db| {
                    db.create_tool_call(chunk_id, &u.call_id, &u.tool_name, u.input.as_ref())
                })
                .await?;
            let created = if update.status != ToolCallStatus::Running {
                // First sighting already carried a terminal status.
                let row_id = created.id;
                let status = update.status.clone();
                let output = update.output.clone();
                shared
                    .db
                    .call(move |db| db.update_tool_call(row_id, &status, output.as_deref()))
                    .await?
            } else {
                created
            };
            let mut slot = shared.active.lock().await;
            if let Some(active) = slot.as_mut() {
                if active.chunk_id == chunk_id {
                    active.call_ids.insert(update.call_id.clone(), created.id);
                }
            }
            created
        }
    };

    let events = {
        let slot = shared.active.lock().await;
        slot.as_ref()
            .filter(|a| a.chunk_id == chunk_id)
            .map(|a| a.events.clone())
    };
    if let Some(events) = events {
        events.emit(ExecutionEvent::tool_call(chunk_id, stored));
    }
    Ok(())
}

async fn run_timeout(shared: Arc<Shared>, chunk_id: i64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    warn!(chunk_id, timeout_secs = timeout.as_secs(), "execution timed out");
    finalize(
        &shared,
        chunk_id,
        FinalizeOrigin::Timeout,
        ChunkStatus::Failed,
        Some(format!(
            "Execution timed out after {}s",
            timeout.as_secs()
        )),
    )
    .await;
}

/// The single terminal path. Takes the active slot (idempotent if a
/// concurrent trigger got there first), stops the companion tasks, tears
/// the session down best-effort, persists the final chunk state, and only
/// then emits the terminal events so subscribers that re-read the chunk
/// observe consistent state.
async fn finalize(
    shared: &Arc<Shared>,
    chunk_id: i64,
    origin: FinalizeOrigin,
    status: ChunkStatus,
    error: Option<String>,
) {
    let mut execution = {
        let mut slot = shared.active.lock().await;
        if slot.as_ref().map(|a| a.chunk_id) != Some(chunk_id) {
            return;
        }
        let Some(execution) = slot.take() else { return };
        execution
    };

    if !matches!(origin, FinalizeOrigin::Timeout) {
        if let Some(handle) = execution.timeout_task.take() {
            handle.abort();
        }
    }
    if !matches!(origin, FinalizeOrigin::Pump) {
        if let Some(handle) = execution.pump_task.take() {
            handle.abort();
        }
    }

    spawn_session_cleanup(
        shared.runtime.clone(),
        execution.session_id.clone(),
        execution.directory.clone(),
    );

    let output = if execution.accumulated.is_empty() {
        None
    } else {
        Some(execution.accumulated.clone())
    };

    let status_for_db = status.clone();
    let output_for_db = output.clone();
    let error_for_db = error.clone();
    if let Err(e) = shared
        .db
        .call(move |db| {
            db.update_chunk_status(
                chunk_id,
                &status_for_db,
                output_for_db.as_deref(),
                error_for_db.as_deref(),
            )
        })
        .await
    {
        warn!(chunk_id, error = %e, "failed to persist terminal chunk status");
    }

    execution
        .events
        .emit(ExecutionEvent::status(chunk_id, status.clone()));
    match status {
        ChunkStatus::Completed => {
            execution
                .events
                .emit(ExecutionEvent::complete(chunk_id, output.unwrap_or_default()));
        }
        _ => {
            execution.events.emit(ExecutionEvent::error(
                chunk_id,
                error.unwrap_or_else(|| format!("Execution ended {}", status)),
            ));
        }
    }

    let elapsed = Utc::now().signed_duration_since(execution.started_at);
    info!(
        chunk_id,
        status = %status,
        elapsed_ms = elapsed.num_milliseconds(),
        "execution finalized"
    );
}

/// Fire-and-forget session teardown. Failures are logged and swallowed;
/// the spawned task's handle is deliberately discarded.
fn spawn_session_cleanup(runtime: Arc<dyn AgentRuntime>, session_id: String, directory: String) {
    let _ = tokio::spawn(async move {
        if let Err(e) = runtime.delete_session(&session_id, &directory).await {
            debug!(session_id = %session_id, error = %e, "session cleanup failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Db;
    use crate::store::models::{Spec, ToolCall};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Test double for the agent runtime: events are injected by hand.
    struct MockRuntime {
        healthy: AtomicBool,
        abort_fails: AtomicBool,
        subscribers: std::sync::Mutex<Vec<mpsc::UnboundedSender<RuntimeEvent>>>,
    }

    impl MockRuntime {
        fn new() -> Self {
            Self {
                healthy: AtomicBool::new(true),
                abort_fails: AtomicBool::new(false),
                subscribers: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn send(&self, event: RuntimeEvent) {
            let subs = self.subscribers.lock().unwrap();
            for tx in subs.iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl AgentRuntime for MockRuntime {
        async fn check_health(&self) -> Result<bool> {
            Ok(self.healthy.load(Ordering::SeqCst))
        }

        async fn create_session(&self, _directory: &str, label: &str) -> Result<String> {
            Ok(format!("session-{}", label))
        }

        async fn send_prompt(
            &self,
            _session_id: &str,
            _directory: &str,
            _content: &str,
            _model: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }

        async fn abort_session(&self, _session_id: &str, _directory: &str) -> Result<()> {
            if self.abort_fails.load(Ordering::SeqCst) {
                anyhow::bail!("runtime refused the abort");
            }
            Ok(())
        }

        async fn delete_session(&self, _session_id: &str, _directory: &str) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<RuntimeEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().unwrap().push(tx);
            rx
        }
    }

    async fn setup() -> (DbHandle, Arc<MockRuntime>, ExecutionManager, i64, Spec) {
        let db = DbHandle::new(Db::new_in_memory().unwrap());
        let (spec, chunk_id) = {
            let guard = db.lock_sync().unwrap();
            let project = guard.create_project("p", "/tmp/p").unwrap();
            let spec = guard.create_spec(project.id, "spec content").unwrap();
            let chunk = guard.create_chunk(spec.id, "Do work", "details", &[]).unwrap();
            (spec, chunk.id)
        };
        let runtime = Arc::new(MockRuntime::new());
        let manager = ExecutionManager::new(
            db.clone(),
            runtime.clone(),
            ExecutionConfig::default().with_timeout(Duration::from_secs(10)),
        );
        (db, runtime, manager, chunk_id, spec)
    }

    fn session_of(label_chunk: i64) -> String {
        // Session ids embed the label; match by prefix instead.
        format!("chunk-{}", label_chunk)
    }

    async fn recv_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>,
    ) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("stream closed before terminal event");
            let terminal =
                matches!(&event, ExecutionEvent::Complete { .. } | ExecutionEvent::Error { .. });
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    /// The mock's session id embeds a uuid; recover it from the manager.
    async fn active_session_id(manager: &ExecutionManager) -> String {
        manager
            .shared
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.session_id.clone())
            .expect("execution should be active")
    }

    #[tokio::test]
    async fn test_start_unknown_chunk_fails_fast() {
        let (_db, _runtime, manager, _chunk_id, _spec) = setup().await;
        let err = manager.start_chunk(9999).await.unwrap_err();
        assert!(matches!(err, SessionError::ChunkNotFound { id: 9999 }));
    }

    #[tokio::test]
    async fn test_start_fails_when_runtime_unhealthy() {
        let (db, runtime, manager, chunk_id, _spec) = setup().await;
        runtime.healthy.store(false, Ordering::SeqCst);

        let err = manager.start_chunk(chunk_id).await.unwrap_err();
        assert!(matches!(err, SessionError::RuntimeUnhealthy));

        // No state transition on fail-fast
        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Pending);
    }

    #[tokio::test]
    async fn test_second_start_conflicts_while_active() {
        let (db, _runtime, manager, chunk_id, spec) = setup().await;
        let other = db
            .lock_sync()
            .unwrap()
            .create_chunk(spec.id, "Other", "", &[])
            .unwrap();

        let _rx = manager.start_chunk(chunk_id).await.unwrap();
        let err = manager.start_chunk(other.id).await.unwrap_err();
        match err {
            SessionError::ExecutionActive { active_chunk_id } => {
                assert_eq!(active_chunk_id, chunk_id)
            }
            other => panic!("Expected ExecutionActive, got {:?}", other),
        }
        assert_eq!(manager.active_chunk_id().await, Some(chunk_id));
    }

    #[tokio::test]
    async fn test_full_lifecycle_completes_and_persists() {
        let (db, runtime, manager, chunk_id, _spec) = setup().await;
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();
        let session_id = active_session_id(&manager).await;
        assert!(session_id.contains(&session_of(chunk_id)));

        runtime.send(RuntimeEvent::Text {
            session_id: session_id.clone(),
            content: "partial ".into(),
        });
        runtime.send(RuntimeEvent::Text {
            session_id: session_id.clone(),
            content: "output".into(),
        });
        runtime.send(RuntimeEvent::Completed {
            session_id: session_id.clone(),
        });

        let events = recv_until_terminal(&mut rx).await;
        match events.last().unwrap() {
            ExecutionEvent::Complete { output, .. } => assert_eq!(output, "partial output"),
            other => panic!("Expected Complete, got {:?}", other),
        }
        // First replayed event is the running status
        assert!(matches!(
            &events[0],
            ExecutionEvent::Status { status: ChunkStatus::Running, .. }
        ));

        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Completed);
        assert_eq!(chunk.output.as_deref(), Some("partial output"));
        assert_eq!(manager.active_chunk_id().await, None);
    }

    #[tokio::test]
    async fn test_tool_call_deduplicated_by_agent_call_id() {
        let (db, runtime, manager, chunk_id, _spec) = setup().await;
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();
        let session_id = active_session_id(&manager).await;

        runtime.send(RuntimeEvent::ToolCall {
            session_id: session_id.clone(),
            update: ToolCallUpdate {
                call_id: "call-7".into(),
                tool_name: "bash".into(),
                status: ToolCallStatus::Running,
                input: Some(serde_json::json!({"cmd": "ls"})),
                output: None,
            },
        });
        runtime.send(RuntimeEvent::ToolCall {
            session_id: session_id.clone(),
            update: ToolCallUpdate {
                call_id: "call-7".into(),
                tool_name: "bash".into(),
                status: ToolCallStatus::Completed,
                input: None,
                output: Some("file.txt".into()),
            },
        });
        runtime.send(RuntimeEvent::Completed {
            session_id: session_id.clone(),
        });

        let events = recv_until_terminal(&mut rx).await;
        let tool_events: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::ToolCall { tool_call, .. } => Some(tool_call),
                _ => None,
            })
            .collect();
        assert_eq!(tool_events.len(), 2, "both sightings are forwarded");
        assert_eq!(
            tool_events[0].id, tool_events[1].id,
            "same persisted record behind both"
        );

        let calls = db.lock_sync().unwrap().list_tool_calls(chunk_id).unwrap();
        assert_eq!(calls.len(), 1, "exactly one persisted record");
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
        assert_eq!(calls[0].output.as_deref(), Some("file.txt"));
        assert_eq!(
            calls[0].input,
            Some(serde_json::json!({"cmd": "ls"})),
            "input from the first sighting survives the update"
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_full_replay() {
        let (_db, runtime, manager, chunk_id, _spec) = setup().await;
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();
        let session_id = active_session_id(&manager).await;

        runtime.send(RuntimeEvent::Text {
            session_id: session_id.clone(),
            content: "early".into(),
        });
        // Wait until the first subscriber has seen the text event, so the
        // buffer is known to contain it.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, ExecutionEvent::Text { .. }) {
                break;
            }
        }

        let mut late = manager.subscribe(chunk_id).await.unwrap();
        let first = late.recv().await.unwrap();
        assert!(matches!(
            first,
            ExecutionEvent::Status { status: ChunkStatus::Running, .. }
        ));
        let second = late.recv().await.unwrap();
        match second {
            ExecutionEvent::Text { content, .. } => assert_eq!(content, "early"),
            other => panic!("Expected replayed Text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runtime_error_finalizes_failed() {
        let (db, runtime, manager, chunk_id, _spec) = setup().await;
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();
        let session_id = active_session_id(&manager).await;

        runtime.send(RuntimeEvent::Error {
            session_id,
            message: "agent crashed".into(),
        });

        let events = recv_until_terminal(&mut rx).await;
        match events.last().unwrap() {
            ExecutionEvent::Error { message, .. } => assert_eq!(message, "agent crashed"),
            other => panic!("Expected Error, got {:?}", other),
        }
        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(chunk.error.as_deref(), Some("agent crashed"));
    }

    #[tokio::test]
    async fn test_timeout_forces_failed() {
        let (db, runtime, _unused, chunk_id, _spec) = setup().await;
        let manager = ExecutionManager::new(
            db.clone(),
            runtime.clone(),
            ExecutionConfig::default().with_timeout(Duration::from_millis(50)),
        );
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();

        let events = recv_until_terminal(&mut rx).await;
        match events.last().unwrap() {
            ExecutionEvent::Error { message, .. } => {
                assert!(message.contains("timed out"), "got: {}", message)
            }
            other => panic!("Expected timeout Error, got {:?}", other),
        }
        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(manager.active_chunk_id().await, None);
    }

    #[tokio::test]
    async fn test_abort_cancels_cleanly() {
        let (db, _runtime, manager, chunk_id, _spec) = setup().await;
        let mut rx = manager.start_chunk(chunk_id).await.unwrap();

        manager.abort(chunk_id).await.unwrap();

        let events = recv_until_terminal(&mut rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::Status { status: ChunkStatus::Cancelled, .. }
        )));
        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Cancelled);
        assert_eq!(manager.active_chunk_id().await, None);
    }

    #[tokio::test]
    async fn test_throwing_abort_still_finalizes_as_failed() {
        let (db, runtime, manager, chunk_id, _spec) = setup().await;
        let _rx = manager.start_chunk(chunk_id).await.unwrap();
        runtime.abort_fails.store(true, Ordering::SeqCst);

        manager.abort(chunk_id).await.unwrap();

        let chunk = db.lock_sync().unwrap().get_chunk(chunk_id).unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert!(chunk.error.unwrap().contains("Abort failed"));
    }

    #[tokio::test]
    async fn test_abort_without_active_execution_errors() {
        let (_db, _runtime, manager, chunk_id, _spec) = setup().await;
        let err = manager.abort(chunk_id).await.unwrap_err();
        assert!(matches!(err, SessionError::NoActiveExecution { .. }));
    }
}
