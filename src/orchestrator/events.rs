//! Caller-facing events emitted over one run-all drive.
//!
//! The stream is strictly ordered by emission time and terminated by
//! channel closure; `AllComplete` is always the last event before the
//! stream closes, regardless of how the run ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::models::{ChunkStatus, ReviewStatus, ToolCall};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunAllEvent {
    ChunkStart {
        chunk_id: i64,
        title: String,
        at: DateTime<Utc>,
    },
    FixChunkStart {
        chunk_id: i64,
        parent_chunk_id: Option<i64>,
        title: String,
        at: DateTime<Utc>,
    },
    ToolCall {
        chunk_id: i64,
        tool_call: ToolCall,
        at: DateTime<Utc>,
    },
    ChunkComplete {
        chunk_id: i64,
        status: ChunkStatus,
        at: DateTime<Utc>,
    },
    FixChunkComplete {
        chunk_id: i64,
        status: ChunkStatus,
        at: DateTime<Utc>,
    },
    ReviewStart {
        chunk_id: i64,
        at: DateTime<Utc>,
    },
    ReviewComplete {
        chunk_id: i64,
        status: ReviewStatus,
        feedback: String,
        at: DateTime<Utc>,
    },
    Stopped {
        reason: String,
        at: DateTime<Utc>,
    },
    Error {
        message: String,
        at: DateTime<Utc>,
    },
    AllComplete {
        passed: u32,
        fixed: u32,
        failed: u32,
        at: DateTime<Utc>,
    },
}

impl RunAllEvent {
    pub fn chunk_start(chunk_id: i64, title: impl Into<String>) -> Self {
        Self::ChunkStart {
            chunk_id,
            title: title.into(),
            at: Utc::now(),
        }
    }

    pub fn fix_chunk_start(
        chunk_id: i64,
        parent_chunk_id: Option<i64>,
        title: impl Into<String>,
    ) -> Self {
        Self::FixChunkStart {
            chunk_id,
            parent_chunk_id,
            title: title.into(),
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

    pub fn chunk_complete(chunk_id: i64, status: ChunkStatus) -> Self {
        Self::ChunkComplete {
            chunk_id,
            status,
            at: Utc::now(),
        }
    }

    pub fn fix_chunk_complete(chunk_id: i64, status: ChunkStatus) -> Self {
        Self::FixChunkComplete {
            chunk_id,
            status,
            at: Utc::now(),
        }
    }

    pub fn review_start(chunk_id: i64) -> Self {
        Self::ReviewStart {
            chunk_id,
            at: Utc::now(),
        }
    }

    pub fn review_complete(
        chunk_id: i64,
        status: ReviewStatus,
        feedback: impl Into<String>,
    ) -> Self {
        Self::ReviewComplete {
            chunk_id,
            status,
            feedback: feedback.into(),
            at: Utc::now(),
        }
    }

    pub fn stopped(reason: impl Into<String>) -> Self {
        Self::Stopped {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn all_complete(passed: u32, fixed: u32, failed: u32) -> Self {
        Self::AllComplete {
            passed,
            fixed,
            failed,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_shape() {
        let ev = RunAllEvent::chunk_start(3, "First chunk");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "chunk_start");
        assert_eq!(json["data"]["chunk_id"], 3);
        assert_eq!(json["data"]["title"], "First chunk");
        assert!(json["data"]["at"].is_string());
    }

    #[test]
    fn test_summary_event_carries_tallies() {
        let ev = RunAllEvent::all_complete(2, 1, 0);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "all_complete");
        assert_eq!(json["data"]["passed"], 2);
        assert_eq!(json["data"]["fixed"], 1);
        assert_eq!(json["data"]["failed"], 0);
    }

    #[test]
    fn test_review_complete_roundtrip() {
        let ev = RunAllEvent::review_complete(5, ReviewStatus::NeedsFix, "missing tests");
        let json = serde_json::to_string(&ev).unwrap();
        let back: RunAllEvent = serde_json::from_str(&json).unwrap();
        match back {
            RunAllEvent::ReviewComplete {
                chunk_id,
                status,
                feedback,
                ..
            } => {
                assert_eq!(chunk_id, 5);
                assert_eq!(status, ReviewStatus::NeedsFix);
                assert_eq!(feedback, "missing tests");
            }
            other => panic!("Expected ReviewComplete, got {:?}", other),
        }
    }
}
