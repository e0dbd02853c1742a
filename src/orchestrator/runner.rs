//! Run-all driver: sequential execution and review of a spec's chunks.
//!
//! One run owns one spec. Chunks execute in position order through the
//! single execution slot, each followed by an automated review; a
//! `needs_fix` verdict inserts a fix-chunk that runs immediately after
//! its parent, and fix-chunks are never themselves fixed. The driver
//! always leaves the spec in a terminal status and always closes the
//! event stream with `AllComplete`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::errors::RunAllError;
use crate::orchestrator::events::RunAllEvent;
use crate::review::ReviewEngine;
use crate::session::{ExecutionEvent, ExecutionManager};
use crate::store::db::DbHandle;
use crate::store::models::{Chunk, ChunkStatus, ReviewStatus, SpecStatus};

const ABORT_REASON: &str = "Aborted by user";

fn is_eligible(status: &ChunkStatus) -> bool {
    matches!(
        status,
        ChunkStatus::Pending | ChunkStatus::Failed | ChunkStatus::Cancelled
    )
}

/// Drives a whole spec through execute-review cycles.
///
/// At most one run per spec; concurrent `start` calls for the same spec
/// return [`RunAllError::RunActive`]. Runs for different specs may
/// coexist, serialized downstream by the execution slot.
pub struct RunAllController {
    db: DbHandle,
    manager: Arc<ExecutionManager>,
    engine: Arc<ReviewEngine>,
    sessions: Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>,
}

impl RunAllController {
    pub fn new(db: DbHandle, manager: Arc<ExecutionManager>, engine: Arc<ReviewEngine>) -> Self {
        Self {
            db,
            manager,
            engine,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run over every eligible chunk of `spec_id`.
    ///
    /// Returns the event stream for the run. The stream ends with
    /// `AllComplete` and channel closure no matter how the run finishes.
    pub async fn start(
        &self,
        spec_id: i64,
    ) -> Result<mpsc::UnboundedReceiver<RunAllEvent>, RunAllError> {
        let spec = self
            .db
            .call(move |db| db.get_spec(spec_id))
            .await?
            .ok_or(RunAllError::SpecNotFound { id: spec_id })?;

        let chunks = self.db.call(move |db| db.list_chunks(spec_id)).await?;
        let eligible: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| is_eligible(&c.status))
            .collect();
        if eligible.is_empty() {
            return Err(RunAllError::NoEligibleChunks { id: spec_id });
        }

        let abort = Arc::new(AtomicBool::new(false));
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&spec_id) {
                return Err(RunAllError::RunActive { id: spec_id });
            }
            sessions.insert(spec_id, Arc::clone(&abort));
        }

        if let Err(e) = self
            .db
            .call(move |db| db.update_spec_status(spec_id, &SpecStatus::Running))
            .await
        {
            self.sessions.lock().await.remove(&spec_id);
            return Err(e.into());
        }

        info!(spec_id, chunks = eligible.len(), "run-all started");

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            db: self.db.clone(),
            manager: Arc::clone(&self.manager),
            engine: Arc::clone(&self.engine),
            abort,
            tx,
            tally: Tally::default(),
        };
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            driver.run(spec.id, eligible, sessions).await;
        });

        Ok(rx)
    }

    /// Request a stop of the active run for `spec_id`.
    ///
    /// The current chunk's execution is aborted when it belongs to this
    /// spec; the run then winds down before the next chunk would start.
    pub async fn abort(&self, spec_id: i64) -> Result<(), RunAllError> {
        let flag = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&spec_id)
                .cloned()
                .ok_or(RunAllError::NoActiveRun { id: spec_id })?
        };
        flag.store(true, Ordering::SeqCst);

        // The execution slot is global; only abort it when the chunk in
        // flight actually belongs to this spec.
        if let Some(chunk_id) = self.manager.active_chunk_id().await {
            let owns_active = self
                .db
                .call(move |db| db.get_chunk(chunk_id))
                .await
                .ok()
                .flatten()
                .map(|c| c.spec_id == spec_id)
                .unwrap_or(false);
            if owns_active {
                if let Err(e) = self.manager.abort(chunk_id).await {
                    debug!(spec_id, chunk_id, error = %e, "abort of active execution failed");
                }
            }
        }

        info!(spec_id, "run-all abort requested");
        Ok(())
    }

    pub async fn is_running(&self, spec_id: i64) -> bool {
        self.sessions.lock().await.contains_key(&spec_id)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    passed: u32,
    fixed: u32,
    failed: u32,
    aborted: bool,
    errored: bool,
}

impl Tally {
    fn run_was_clean(&self) -> bool {
        !self.aborted && !self.errored && self.failed == 0
    }
}

/// What the driver does after one execute-review cycle.
enum StepOutcome {
    Proceed,
    RunFix(Box<Chunk>),
    Stop,
}

struct Driver {
    db: DbHandle,
    manager: Arc<ExecutionManager>,
    engine: Arc<ReviewEngine>,
    abort: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<RunAllEvent>,
    tally: Tally,
}

impl Driver {
    async fn run(
        mut self,
        spec_id: i64,
        chunks: Vec<Chunk>,
        sessions: Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>,
    ) {
        self.drive(chunks).await;

        // Cleanup runs on every exit path so the spec is never left
        // mid-flight and the stream always ends with the summary.
        let terminal = if self.tally.run_was_clean() {
            SpecStatus::Completed
        } else {
            SpecStatus::Review
        };
        if let Err(e) = self
            .db
            .call(move |db| db.update_spec_status(spec_id, &terminal))
            .await
        {
            warn!(spec_id, error = %e, "failed to persist terminal spec status");
        }

        sessions.lock().await.remove(&spec_id);

        self.emit(RunAllEvent::all_complete(
            self.tally.passed,
            self.tally.fixed,
            self.tally.failed,
        ));
        info!(
            spec_id,
            passed = self.tally.passed,
            fixed = self.tally.fixed,
            failed = self.tally.failed,
            aborted = self.tally.aborted,
            "run-all finished"
        );
    }

    async fn drive(&mut self, chunks: Vec<Chunk>) {
        for chunk in chunks {
            if self.check_abort() {
                return;
            }

            match self.execute_and_review(chunk, false).await {
                StepOutcome::Proceed => {}
                StepOutcome::Stop => return,
                StepOutcome::RunFix(fix) => {
                    if self.check_abort() {
                        return;
                    }
                    // Fix-chunks run once; their reviews never spawn
                    // another fix, so this cannot recurse.
                    if let StepOutcome::Stop = self.execute_and_review(*fix, true).await {
                        return;
                    }
                }
            }
        }
    }

    async fn execute_and_review(&mut self, chunk: Chunk, is_fix: bool) -> StepOutcome {
        let chunk_id = chunk.id;

        if is_fix {
            self.emit(RunAllEvent::fix_chunk_start(
                chunk_id,
                chunk.fix_of,
                chunk.title.clone(),
            ));
        } else {
            self.emit(RunAllEvent::chunk_start(chunk_id, chunk.title.clone()));
        }

        let mut events = match self.manager.start_chunk(chunk_id).await {
            Ok(rx) => rx,
            Err(e) => {
                self.emit(RunAllEvent::error(format!(
                    "Failed to start chunk {}: {:#}",
                    chunk_id, e
                )));
                self.tally.errored = true;
                return StepOutcome::Stop;
            }
        };

        while let Some(event) = events.recv().await {
            match event {
                ExecutionEvent::ToolCall { tool_call, .. } => {
                    self.emit(RunAllEvent::tool_call(chunk_id, tool_call));
                }
                ExecutionEvent::Complete { .. } | ExecutionEvent::Error { .. } => break,
                _ => {}
            }
        }

        // Persistence precedes terminal events, so this read is consistent.
        let finished = match self.db.call(move |db| db.get_chunk(chunk_id)).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                self.emit(RunAllEvent::error(format!(
                    "Chunk {} disappeared during execution",
                    chunk_id
                )));
                self.tally.errored = true;
                return StepOutcome::Stop;
            }
            Err(e) => {
                self.emit(RunAllEvent::error(format!(
                    "Failed to reload chunk {}: {:#}",
                    chunk_id, e
                )));
                self.tally.errored = true;
                return StepOutcome::Stop;
            }
        };

        if is_fix {
            self.emit(RunAllEvent::fix_chunk_complete(
                chunk_id,
                finished.status.clone(),
            ));
        } else {
            self.emit(RunAllEvent::chunk_complete(
                chunk_id,
                finished.status.clone(),
            ));
        }

        if finished.status != ChunkStatus::Completed {
            if finished.status == ChunkStatus::Cancelled && self.abort.load(Ordering::SeqCst) {
                self.tally.aborted = true;
                self.emit(RunAllEvent::stopped(ABORT_REASON));
            } else {
                self.tally.failed += 1;
            }
            return StepOutcome::Stop;
        }

        self.emit(RunAllEvent::review_start(chunk_id));

        let outcome = match self.engine.review_chunk(chunk_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.emit(RunAllEvent::error(format!(
                    "Review of chunk {} failed: {:#}",
                    chunk_id, e
                )));
                self.tally.errored = true;
                return StepOutcome::Stop;
            }
        };

        self.emit(RunAllEvent::review_complete(
            chunk_id,
            outcome.response.status.clone(),
            outcome.response.feedback.clone(),
        ));

        match outcome.response.status {
            ReviewStatus::Pass => {
                self.tally.passed += 1;
                StepOutcome::Proceed
            }
            ReviewStatus::Fail => {
                self.tally.failed += 1;
                StepOutcome::Stop
            }
            ReviewStatus::NeedsFix => {
                self.tally.fixed += 1;
                match (is_fix, outcome.fix_chunk) {
                    (false, Some(fix)) => StepOutcome::RunFix(Box::new(fix)),
                    (false, None) => {
                        warn!(chunk_id, "needs_fix verdict carried no fix-chunk");
                        StepOutcome::Proceed
                    }
                    // A fix of a fix is out of scope; record and move on.
                    (true, _) => StepOutcome::Proceed,
                }
            }
        }
    }

    fn check_abort(&mut self) -> bool {
        if self.abort.load(Ordering::SeqCst) {
            self.tally.aborted = true;
            self.emit(RunAllEvent::stopped(ABORT_REASON));
            return true;
        }
        false
    }

    fn emit(&self, event: RunAllEvent) {
        // A dropped receiver must not kill the run; persistence is the
        // source of truth and events are best-effort.
        let _ = self.tx.send(event);
    }
}
