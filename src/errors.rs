//! Typed error hierarchy for the conductor core.
//!
//! Four top-level enums cover the four subsystems:
//! - `GraphError`: dependency validation failures
//! - `SessionError`: execution session lifecycle failures
//! - `ReviewError`: classified review failures
//! - `RunAllError`: run-all controller preconditions

use thiserror::Error;

/// Errors from dependency-graph validation.
///
/// These are always surfaced immediately and never retried; a failed
/// validation leaves the stored dependency map untouched.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Chunk {id} cannot depend on itself")]
    SelfDependency { id: i64 },

    #[error("Chunk {id} references unknown dependency {dependency}")]
    UnknownDependency { id: i64, dependency: i64 },

    #[error("Dependency change for chunk {id} would create a cycle: {members:?}")]
    CycleDetected { id: i64, members: Vec<i64> },
}

/// Errors from the execution session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Chunk {id} not found")]
    ChunkNotFound { id: i64 },

    #[error("Spec {id} not found")]
    SpecNotFound { id: i64 },

    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Execution already active for chunk {active_chunk_id}")]
    ExecutionActive { active_chunk_id: i64 },

    #[error("No active execution for chunk {id}")]
    NoActiveExecution { id: i64 },

    #[error("Agent runtime failed health check")]
    RuntimeUnhealthy,

    #[error("Failed to create agent session: {0}")]
    SessionCreateFailed(#[source] anyhow::Error),

    #[error("Failed to send prompt to session {session_id}: {source}")]
    PromptSendFailed {
        session_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the review engine.
///
/// `class` carries the failure classification (`rate_limit`, `timeout`,
/// `parse_error`, `unknown`) that drove the retry decision.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Chunk {id} not found")]
    ChunkNotFound { id: i64 },

    #[error("Spec {id} not found")]
    SpecNotFound { id: i64 },

    #[error("Review failed ({class}) after {attempts} attempt(s): {message}")]
    Failed {
        class: String,
        attempts: u32,
        message: String,
    },

    #[error("Reviewer returned unparseable output: {message}")]
    ParseFailed { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from run-all start/abort preconditions.
#[derive(Debug, Error)]
pub enum RunAllError {
    #[error("Spec {id} not found")]
    SpecNotFound { id: i64 },

    #[error("Spec {id} has no chunks eligible for execution")]
    NoEligibleChunks { id: i64 },

    #[error("Run already active for spec {id}")]
    RunActive { id: i64 },

    #[error("No active run for spec {id}")]
    NoActiveRun { id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
