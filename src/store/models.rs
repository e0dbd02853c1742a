use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A project owning specs. Top-level grouping for all persisted work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub created_at: String,
}

/// Lifecycle status of a spec as driven by the run-all controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    Pending,
    Running,
    Completed,
    Review,
}

impl SpecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Review => "review",
        }
    }
}

impl std::fmt::Display for SpecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "review" => Ok(Self::Review),
            _ => Err(format!("Invalid spec status: {}", s)),
        }
    }
}

/// A group of ordered chunks representing one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub id: i64,
    pub project_id: i64,
    pub content: String,
    pub status: SpecStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Execution status of a chunk. Orthogonal to its review status:
/// a chunk can be `completed` with `review_status = needs_fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid chunk status: {}", s)),
        }
    }
}

/// Verdict assigned by the review engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pass,
    NeedsFix,
    Fail,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::NeedsFix => "needs_fix",
            Self::Fail => "fail",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "needs_fix" => Ok(Self::NeedsFix),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Invalid review status: {}", s)),
        }
    }
}

/// One atomic unit of delegated work within a spec.
///
/// `dependencies` holds ids of chunks in the same spec. `fix_of` links a
/// fix-chunk back to the chunk whose review spawned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub spec_id: i64,
    pub title: String,
    pub description: String,
    pub status: ChunkStatus,
    pub position: i32,
    pub dependencies: Vec<i64>,
    pub review_status: Option<ReviewStatus>,
    pub review_feedback: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub fix_of: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Status of a tool call observed during a chunk's execution.
/// Transitions only running → {completed, error}, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Error,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid tool call status: {}", s)),
        }
    }
}

/// One action taken by the agent during a chunk's execution.
/// Unique per (chunk_id, agent_call_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: i64,
    pub chunk_id: i64,
    pub agent_call_id: String,
    pub tool_name: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<String>,
    pub status: ToolCallStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Which review shape produced an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    Chunk,
    Final,
}

impl ReviewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for ReviewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk" => Ok(Self::Chunk),
            "final" => Ok(Self::Final),
            _ => Err(format!("Invalid review type: {}", s)),
        }
    }
}

/// One review attempt, recorded whether it succeeded or failed.
///
/// `status` is the resulting review status string, or `"error"` when the
/// attempt failed; `error_class` then carries the failure classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAudit {
    pub id: i64,
    pub chunk_id: Option<i64>,
    pub spec_id: i64,
    pub review_type: ReviewType,
    pub model: String,
    pub status: String,
    pub feedback: Option<String>,
    pub error_class: Option<String>,
    pub attempt: i32,
    pub duration_ms: i64,
    pub created_at: String,
}
