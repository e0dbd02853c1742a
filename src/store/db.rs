use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use super::models::*;

/// Async-safe handle to the conductor database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, preventing synchronous SQLite I/O from
/// tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Used in contexts where
    /// blocking is acceptable: startup initialization and tests. Callers
    /// must ensure this is NOT called from a hot async path to avoid
    /// blocking the tokio runtime.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Db>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS specs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    content TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    spec_id INTEGER NOT NULL REFERENCES specs(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    position INTEGER NOT NULL DEFAULT 0,
                    dependencies TEXT NOT NULL DEFAULT '[]',
                    review_status TEXT,
                    review_feedback TEXT,
                    output TEXT,
                    error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tool_calls (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chunk_id INTEGER NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
                    agent_call_id TEXT NOT NULL,
                    tool_name TEXT NOT NULL,
                    input TEXT,
                    output TEXT,
                    status TEXT NOT NULL DEFAULT 'running',
                    started_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS review_audits (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chunk_id INTEGER REFERENCES chunks(id) ON DELETE SET NULL,
                    spec_id INTEGER NOT NULL REFERENCES specs(id) ON DELETE CASCADE,
                    review_type TEXT NOT NULL,
                    model TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL,
                    feedback TEXT,
                    error_class TEXT,
                    attempt INTEGER NOT NULL DEFAULT 0,
                    duration_ms INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_specs_project ON specs(project_id);
                CREATE INDEX IF NOT EXISTS idx_chunks_spec ON chunks(spec_id);
                CREATE INDEX IF NOT EXISTS idx_tool_calls_chunk ON tool_calls(chunk_id);
                CREATE INDEX IF NOT EXISTS idx_review_audits_spec ON review_audits(spec_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_tool_calls_agent_call
                    ON tool_calls(chunk_id, agent_call_id);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations (columns are nullable, safe to re-run).
        // Only "duplicate column" errors are ignored; anything else propagates.
        match self
            .conn
            .execute("ALTER TABLE chunks ADD COLUMN fix_of INTEGER REFERENCES chunks(id)", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add fix_of column: {}", e)),
        }

        Ok(())
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, path: &str) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (name, path) VALUES (?1, ?2)",
                params![name, path],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, path, created_at FROM projects WHERE id = ?1")
            .context("Failed to prepare get_project")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    path: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query project")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read project row")?)),
            None => Ok(None),
        }
    }

    // ── Spec CRUD ─────────────────────────────────────────────────────

    pub fn create_spec(&self, project_id: i64, content: &str) -> Result<Spec> {
        self.conn
            .execute(
                "INSERT INTO specs (project_id, content) VALUES (?1, ?2)",
                params![project_id, content],
            )
            .context("Failed to insert spec")?;
        let id = self.conn.last_insert_rowid();
        self.get_spec(id)?.context("Spec not found after insert")
    }

    pub fn get_spec(&self, id: i64) -> Result<Option<Spec>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, content, status, created_at, updated_at
                 FROM specs WHERE id = ?1",
            )
            .context("Failed to prepare get_spec")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(SpecRow {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    content: row.get(2)?,
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })
            .context("Failed to query spec")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read spec row")?;
                Ok(Some(r.into_spec()?))
            }
            None => Ok(None),
        }
    }

    pub fn update_spec_status(&self, id: i64, status: &SpecStatus) -> Result<Spec> {
        self.conn
            .execute(
                "UPDATE specs SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update spec status")?;
        self.get_spec(id)?
            .context("Spec not found after status update")
    }

    // ── Chunk CRUD ────────────────────────────────────────────────────

    pub fn create_chunk(
        &self,
        spec_id: i64,
        title: &str,
        description: &str,
        dependencies: &[i64],
    ) -> Result<Chunk> {
        let position = self.next_chunk_position(spec_id)?;
        let deps_json =
            serde_json::to_string(dependencies).context("Failed to encode dependencies")?;
        self.conn
            .execute(
                "INSERT INTO chunks (spec_id, title, description, position, dependencies)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![spec_id, title, description, position, deps_json],
            )
            .context("Failed to insert chunk")?;
        let id = self.conn.last_insert_rowid();
        self.get_chunk(id)?.context("Chunk not found after insert")
    }

    /// Insert a fix-chunk at the end of the spec's stored order, depending
    /// on the chunk it fixes.
    pub fn insert_fix_chunk(
        &self,
        spec_id: i64,
        parent_chunk_id: i64,
        title: &str,
        description: &str,
    ) -> Result<Chunk> {
        let position = self.next_chunk_position(spec_id)?;
        let deps_json = serde_json::to_string(&[parent_chunk_id])
            .context("Failed to encode fix-chunk dependency")?;
        self.conn
            .execute(
                "INSERT INTO chunks (spec_id, title, description, position, dependencies, fix_of)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![spec_id, title, description, position, deps_json, parent_chunk_id],
            )
            .context("Failed to insert fix chunk")?;
        let id = self.conn.last_insert_rowid();
        self.get_chunk(id)?
            .context("Fix chunk not found after insert")
    }

    fn next_chunk_position(&self, spec_id: i64) -> Result<i32> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM chunks WHERE spec_id = ?1",
                params![spec_id],
                |row| row.get(0),
            )
            .context("Failed to get max chunk position")?;
        Ok(max_pos + 1)
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, spec_id, title, description, status, position, dependencies,
                        review_status, review_feedback, output, error, fix_of,
                        created_at, updated_at
                 FROM chunks WHERE id = ?1",
            )
            .context("Failed to prepare get_chunk")?;
        let mut rows = stmt
            .query_map(params![id], Self::map_chunk_row)
            .context("Failed to query chunk")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read chunk row")?;
                Ok(Some(r.into_chunk()?))
            }
            None => Ok(None),
        }
    }

    /// List a spec's chunks in stored order.
    pub fn list_chunks(&self, spec_id: i64) -> Result<Vec<Chunk>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, spec_id, title, description, status, position, dependencies,
                        review_status, review_feedback, output, error, fix_of,
                        created_at, updated_at
                 FROM chunks WHERE spec_id = ?1 ORDER BY position",
            )
            .context("Failed to prepare list_chunks")?;
        let rows = stmt
            .query_map(params![spec_id], Self::map_chunk_row)
            .context("Failed to query chunks")?;
        let mut chunks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read chunk row")?;
            chunks.push(r.into_chunk()?);
        }
        Ok(chunks)
    }

    fn map_chunk_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
        Ok(ChunkRow {
            id: row.get(0)?,
            spec_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            position: row.get(5)?,
            dependencies: row.get(6)?,
            review_status: row.get(7)?,
            review_feedback: row.get(8)?,
            output: row.get(9)?,
            error: row.get(10)?,
            fix_of: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    pub fn update_chunk_status(
        &self,
        id: i64,
        status: &ChunkStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<Chunk> {
        self.conn
            .execute(
                "UPDATE chunks SET status = ?1,
                        output = COALESCE(?2, output),
                        error = ?3,
                        updated_at = datetime('now')
                 WHERE id = ?4",
                params![status.as_str(), output, error, id],
            )
            .context("Failed to update chunk status")?;
        self.get_chunk(id)?
            .context("Chunk not found after status update")
    }

    pub fn update_chunk_review(
        &self,
        id: i64,
        review_status: &ReviewStatus,
        feedback: Option<&str>,
    ) -> Result<Chunk> {
        self.conn
            .execute(
                "UPDATE chunks SET review_status = ?1,
                        review_feedback = ?2,
                        updated_at = datetime('now')
                 WHERE id = ?3",
                params![review_status.as_str(), feedback, id],
            )
            .context("Failed to update chunk review")?;
        self.get_chunk(id)?
            .context("Chunk not found after review update")
    }

    pub fn update_chunk_dependencies(&self, id: i64, dependencies: &[i64]) -> Result<Chunk> {
        let deps_json =
            serde_json::to_string(dependencies).context("Failed to encode dependencies")?;
        self.conn
            .execute(
                "UPDATE chunks SET dependencies = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![deps_json, id],
            )
            .context("Failed to update chunk dependencies")?;
        self.get_chunk(id)?
            .context("Chunk not found after dependency update")
    }

    // ── Tool call CRUD ────────────────────────────────────────────────

    pub fn create_tool_call(
        &self,
        chunk_id: i64,
        agent_call_id: &str,
        tool_name: &str,
        input: Option<&serde_json::Value>,
    ) -> Result<ToolCall> {
        let input_json = input
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode tool call input")?;
        self.conn
            .execute(
                "INSERT INTO tool_calls (chunk_id, agent_call_id, tool_name, input)
                 VALUES (?1, ?2, ?3, ?4)",
                params![chunk_id, agent_call_id, tool_name, input_json],
            )
            .context("Failed to insert tool call")?;
        let id = self.conn.last_insert_rowid();
        self.get_tool_call(id)?
            .context("Tool call not found after insert")
    }

    pub fn update_tool_call(
        &self,
        id: i64,
        status: &ToolCallStatus,
        output: Option<&str>,
    ) -> Result<ToolCall> {
        self.conn
            .execute(
                "UPDATE tool_calls SET status = ?1,
                        output = COALESCE(?2, output),
                        completed_at = CASE WHEN ?1 != 'running' THEN datetime('now')
                                            ELSE completed_at END
                 WHERE id = ?3",
                params![status.as_str(), output, id],
            )
            .context("Failed to update tool call")?;
        self.get_tool_call(id)?
            .context("Tool call not found after update")
    }

    pub fn get_tool_call(&self, id: i64) -> Result<Option<ToolCall>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, chunk_id, agent_call_id, tool_name, input, output, status,
                        started_at, completed_at
                 FROM tool_calls WHERE id = ?1",
            )
            .context("Failed to prepare get_tool_call")?;
        let mut rows = stmt
            .query_map(params![id], Self::map_tool_call_row)
            .context("Failed to query tool call")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read tool call row")?;
                Ok(Some(r.into_tool_call()?))
            }
            None => Ok(None),
        }
    }

    pub fn list_tool_calls(&self, chunk_id: i64) -> Result<Vec<ToolCall>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, chunk_id, agent_call_id, tool_name, input, output, status,
                        started_at, completed_at
                 FROM tool_calls WHERE chunk_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_tool_calls")?;
        let rows = stmt
            .query_map(params![chunk_id], Self::map_tool_call_row)
            .context("Failed to query tool calls")?;
        let mut calls = Vec::new();
        for row in rows {
            let r = row.context("Failed to read tool call row")?;
            calls.push(r.into_tool_call()?);
        }
        Ok(calls)
    }

    fn map_tool_call_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolCallRow> {
        Ok(ToolCallRow {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            agent_call_id: row.get(2)?,
            tool_name: row.get(3)?,
            input: row.get(4)?,
            output: row.get(5)?,
            status: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    // ── Review audit ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn append_review_audit(
        &self,
        chunk_id: Option<i64>,
        spec_id: i64,
        review_type: &ReviewType,
        model: &str,
        status: &str,
        feedback: Option<&str>,
        error_class: Option<&str>,
        attempt: i32,
        duration_ms: i64,
    ) -> Result<ReviewAudit> {
        self.conn
            .execute(
                "INSERT INTO review_audits
                    (chunk_id, spec_id, review_type, model, status, feedback,
                     error_class, attempt, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    chunk_id,
                    spec_id,
                    review_type.as_str(),
                    model,
                    status,
                    feedback,
                    error_class,
                    attempt,
                    duration_ms
                ],
            )
            .context("Failed to insert review audit")?;
        let id = self.conn.last_insert_rowid();
        self.get_review_audit(id)?
            .context("Review audit not found after insert")
    }

    pub fn get_review_audit(&self, id: i64) -> Result<Option<ReviewAudit>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, chunk_id, spec_id, review_type, model, status, feedback,
                        error_class, attempt, duration_ms, created_at
                 FROM review_audits WHERE id = ?1",
            )
            .context("Failed to prepare get_review_audit")?;
        let mut rows = stmt
            .query_map(params![id], Self::map_review_audit_row)
            .context("Failed to query review audit")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read review audit row")?;
                Ok(Some(r.into_review_audit()?))
            }
            None => Ok(None),
        }
    }

    pub fn list_review_audits(&self, spec_id: i64) -> Result<Vec<ReviewAudit>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, chunk_id, spec_id, review_type, model, status, feedback,
                        error_class, attempt, duration_ms, created_at
                 FROM review_audits WHERE spec_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_review_audits")?;
        let rows = stmt
            .query_map(params![spec_id], Self::map_review_audit_row)
            .context("Failed to query review audits")?;
        let mut audits = Vec::new();
        for row in rows {
            let r = row.context("Failed to read review audit row")?;
            audits.push(r.into_review_audit()?);
        }
        Ok(audits)
    }

    fn map_review_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewAuditRow> {
        Ok(ReviewAuditRow {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            spec_id: row.get(2)?,
            review_type: row.get(3)?,
            model: row.get(4)?,
            status: row.get(5)?,
            feedback: row.get(6)?,
            error_class: row.get(7)?,
            attempt: row.get(8)?,
            duration_ms: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// Intermediate row struct for specs.
struct SpecRow {
    id: i64,
    project_id: i64,
    content: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SpecRow {
    fn into_spec(self) -> Result<Spec> {
        let status = SpecStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse spec status")?;
        Ok(Spec {
            id: self.id,
            project_id: self.project_id,
            content: self.content,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for chunks.
struct ChunkRow {
    id: i64,
    spec_id: i64,
    title: String,
    description: String,
    status: String,
    position: i32,
    dependencies: String,
    review_status: Option<String>,
    review_feedback: Option<String>,
    output: Option<String>,
    error: Option<String>,
    fix_of: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        let status = ChunkStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse chunk status")?;
        let review_status = self
            .review_status
            .as_deref()
            .map(ReviewStatus::from_str)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse chunk review status")?;
        let dependencies: Vec<i64> = serde_json::from_str(&self.dependencies)
            .context("Failed to parse chunk dependencies JSON")?;

        Ok(Chunk {
            id: self.id,
            spec_id: self.spec_id,
            title: self.title,
            description: self.description,
            status,
            position: self.position,
            dependencies,
            review_status,
            review_feedback: self.review_feedback,
            output: self.output,
            error: self.error,
            fix_of: self.fix_of,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for tool_calls.
struct ToolCallRow {
    id: i64,
    chunk_id: i64,
    agent_call_id: String,
    tool_name: String,
    input: Option<String>,
    output: Option<String>,
    status: String,
    started_at: String,
    completed_at: Option<String>,
}

impl ToolCallRow {
    fn into_tool_call(self) -> Result<ToolCall> {
        let status = ToolCallStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse tool call status")?;
        let input = self
            .input
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Failed to parse tool call input JSON")?;
        Ok(ToolCall {
            id: self.id,
            chunk_id: self.chunk_id,
            agent_call_id: self.agent_call_id,
            tool_name: self.tool_name,
            input,
            output: self.output,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// Intermediate row struct for review_audits.
struct ReviewAuditRow {
    id: i64,
    chunk_id: Option<i64>,
    spec_id: i64,
    review_type: String,
    model: String,
    status: String,
    feedback: Option<String>,
    error_class: Option<String>,
    attempt: i32,
    duration_ms: i64,
    created_at: String,
}

impl ReviewAuditRow {
    fn into_review_audit(self) -> Result<ReviewAudit> {
        let review_type = ReviewType::from_str(&self.review_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse review type")?;
        Ok(ReviewAudit {
            id: self.id,
            chunk_id: self.chunk_id,
            spec_id: self.spec_id,
            review_type,
            model: self.model,
            status: self.status,
            feedback: self.feedback,
            error_class: self.error_class,
            attempt: self.attempt,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
