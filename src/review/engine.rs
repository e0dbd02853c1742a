//! Review engine: reviewer invocation, retry, persistence, fix-chunks.
//!
//! `review_chunk` and `review_spec` share one retry skeleton: invoke the
//! reviewer, classify any failure, retry only rate limits, and append an
//! audit row for every attempt whether it succeeded or not. The engine
//! writes review status and fix-chunk records only; a chunk's execution
//! status is never touched here, so a chunk can sit `completed` with
//! `review_status = needs_fix`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::ReviewError;
use crate::graph;
use crate::review::parse::{
    parse_chunk_review, parse_final_review, ChunkReviewResponse, FinalReviewResponse,
};
use crate::review::retry::{retry_classified, AttemptFailure, FailureKind, RetryPolicy};
use crate::review::reviewer::{
    build_chunk_review_prompt, build_final_review_prompt, ReviewerAgent,
};
use crate::store::models::{Chunk, ReviewStatus, ReviewType};
use crate::store::DbHandle;

const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 300;

/// Review engine configuration.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub retry: RetryPolicy,
    /// Timeout for one reviewer invocation.
    pub timeout: Duration,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
        }
    }
}

impl ReviewConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of reviewing one chunk.
#[derive(Debug, Clone)]
pub struct ChunkReviewOutcome {
    /// The chunk after its review fields were written.
    pub chunk: Chunk,
    pub response: ChunkReviewResponse,
    /// The persisted fix-chunk, when the verdict was `needs_fix` and the
    /// reviewer supplied a proposal.
    pub fix_chunk: Option<Chunk>,
    pub attempts: u32,
}

/// Result of the whole-spec final review.
#[derive(Debug, Clone)]
pub struct FinalReviewOutcome {
    pub response: FinalReviewResponse,
    pub fix_chunks: Vec<Chunk>,
    pub attempts: u32,
}

pub struct ReviewEngine {
    db: DbHandle,
    reviewer: Arc<dyn ReviewerAgent>,
    config: ReviewConfig,
}

impl ReviewEngine {
    pub fn new(db: DbHandle, reviewer: Arc<dyn ReviewerAgent>, config: ReviewConfig) -> Self {
        Self {
            db,
            reviewer,
            config,
        }
    }

    /// Review one chunk's output against its description.
    ///
    /// Persists review status and feedback; on `needs_fix` with a
    /// proposal, validates and inserts the fix-chunk depending on the
    /// reviewed chunk.
    pub async fn review_chunk(&self, chunk_id: i64) -> Result<ChunkReviewOutcome, ReviewError> {
        let chunk = self
            .db
            .call(move |db| db.get_chunk(chunk_id))
            .await?
            .ok_or(ReviewError::ChunkNotFound { id: chunk_id })?;
        let spec_id = chunk.spec_id;

        let prompt = Arc::new(build_chunk_review_prompt(&chunk));
        info!(chunk_id, "Starting chunk review");

        let (response, attempts) = self
            .run_attempts(prompt, Some(chunk_id), spec_id, ReviewType::Chunk, |out| {
                parse_chunk_review(out)
            })
            .await?;

        let status = response.status;
        let feedback = response.feedback.clone();
        let updated = self
            .db
            .call(move |db| db.update_chunk_review(chunk_id, &status, Some(&feedback)))
            .await?;

        let fix_chunk = if status == ReviewStatus::NeedsFix {
            match &response.fix_chunk {
                Some(proposal) => {
                    let title = proposal.title.clone();
                    let description = proposal.description.clone();
                    Some(
                        self.insert_validated_fix_chunk(spec_id, chunk_id, title, description)
                            .await?,
                    )
                }
                None => {
                    warn!(chunk_id, "Review said needs_fix without a fix proposal");
                    None
                }
            }
        } else {
            None
        };

        info!(chunk_id, status = %status, attempts, "Chunk review complete");
        Ok(ChunkReviewOutcome {
            chunk: updated,
            response,
            fix_chunk,
            attempts,
        })
    }

    /// Review the whole spec against the accumulated chunk results.
    ///
    /// Fix proposals from the final review have no single parent chunk,
    /// so they are appended as ordinary chunks with no dependencies.
    pub async fn review_spec(&self, spec_id: i64) -> Result<FinalReviewOutcome, ReviewError> {
        let spec = self
            .db
            .call(move |db| db.get_spec(spec_id))
            .await?
            .ok_or(ReviewError::SpecNotFound { id: spec_id })?;
        let chunks = self.db.call(move |db| db.list_chunks(spec_id)).await?;

        let prompt = Arc::new(build_final_review_prompt(&spec, &chunks));
        info!(spec_id, chunk_count = chunks.len(), "Starting final review");

        let (response, attempts) = self
            .run_attempts(prompt, None, spec_id, ReviewType::Final, |out| {
                parse_final_review(out)
            })
            .await?;

        let mut fix_chunks = Vec::new();
        for proposal in &response.fix_chunks {
            let title = proposal.title.clone();
            let description = proposal.description.clone();
            let chunk = self
                .db
                .call(move |db| db.create_chunk(spec_id, &title, &description, &[]))
                .await?;
            fix_chunks.push(chunk);
        }

        info!(
            spec_id,
            status = %response.status,
            fix_count = fix_chunks.len(),
            attempts,
            "Final review complete"
        );
        Ok(FinalReviewOutcome {
            response,
            fix_chunks,
            attempts,
        })
    }

    /// Shared attempt loop: invoke, parse, audit every attempt, retry per
    /// policy, and map the terminal failure into a `ReviewError`.
    async fn run_attempts<T, P>(
        &self,
        prompt: Arc<String>,
        chunk_id: Option<i64>,
        spec_id: i64,
        review_type: ReviewType,
        parse: P,
    ) -> Result<(T, u32), ReviewError>
    where
        T: ReviewedResponse + Clone + Send + 'static,
        P: Fn(&str) -> Result<T, String> + Copy + Send + 'static,
    {
        let db = self.db.clone();
        let reviewer = self.reviewer.clone();
        let timeout = self.config.timeout;
        let model = reviewer.model().to_string();

        let result = retry_classified(&self.config.retry, move |attempt| {
            let db = db.clone();
            let reviewer = reviewer.clone();
            let prompt = prompt.clone();
            let model = model.clone();
            async move {
                let started = Instant::now();
                let outcome = invoke_and_parse(reviewer.as_ref(), &prompt, timeout, parse).await;
                let duration_ms = started.elapsed().as_millis() as i64;

                let (status, feedback, error_class) = match &outcome {
                    Ok(parsed) => (
                        parsed.status().as_str().to_string(),
                        Some(parsed.feedback().to_string()),
                        None,
                    ),
                    Err(failure) => (
                        "error".to_string(),
                        Some(failure.message.clone()),
                        Some(failure.kind.as_str().to_string()),
                    ),
                };

                let audit = db
                    .call(move |db| {
                        db.append_review_audit(
                            chunk_id,
                            spec_id,
                            &review_type,
                            &model,
                            &status,
                            feedback.as_deref(),
                            error_class.as_deref(),
                            attempt as i32 + 1,
                            duration_ms,
                        )
                        .map(|_| ())
                    })
                    .await;
                if let Err(e) = audit {
                    warn!(spec_id, "Failed to append review audit: {:#}", e);
                }

                outcome
            }
        })
        .await;

        match result {
            Ok(ok) => Ok(ok),
            Err((failure, attempts)) => match failure.kind {
                FailureKind::ParseError => Err(ReviewError::ParseFailed {
                    message: failure.message,
                }),
                kind => Err(ReviewError::Failed {
                    class: kind.as_str().to_string(),
                    attempts,
                    message: failure.message,
                }),
            },
        }
    }

    /// Validate the fix-chunk's dependency against the spec's graph, then
    /// insert it at the end of the stored order.
    async fn insert_validated_fix_chunk(
        &self,
        spec_id: i64,
        parent_chunk_id: i64,
        title: String,
        description: String,
    ) -> Result<Chunk, ReviewError> {
        let chunks = self.db.call(move |db| db.list_chunks(spec_id)).await?;
        let edges = graph::edge_map(&chunks);
        let proposed: HashSet<i64> = [parent_chunk_id].into_iter().collect();
        // Row ids start at 1, so 0 stands in for the not-yet-inserted chunk.
        graph::validate_dependencies(0, &proposed, &edges)
            .map_err(|e| ReviewError::Other(anyhow::Error::new(e)))?;

        let chunk = self
            .db
            .call(move |db| db.insert_fix_chunk(spec_id, parent_chunk_id, &title, &description))
            .await?;
        info!(
            fix_chunk_id = chunk.id,
            parent_chunk_id, "Inserted fix chunk"
        );
        Ok(chunk)
    }
}

/// Common accessors for the two parsed response shapes, used by the
/// shared attempt loop to fill audit rows.
pub trait ReviewedResponse {
    fn status(&self) -> ReviewStatus;
    fn feedback(&self) -> &str;
}

impl ReviewedResponse for ChunkReviewResponse {
    fn status(&self) -> ReviewStatus {
        self.status
    }
    fn feedback(&self) -> &str {
        &self.feedback
    }
}

impl ReviewedResponse for FinalReviewResponse {
    fn status(&self) -> ReviewStatus {
        self.status
    }
    fn feedback(&self) -> &str {
        &self.feedback
    }
}

async fn invoke_and_parse<T, P>(
    reviewer: &dyn ReviewerAgent,
    prompt: &str,
    timeout: Duration,
    parse: P,
) -> Result<T, AttemptFailure>
where
    P: Fn(&str) -> Result<T, String>,
{
    let response = reviewer
        .execute(prompt, timeout)
        .await
        .map_err(|e| AttemptFailure::from_message(format!("{:#}", e)))?;
    if !response.success {
        return Err(AttemptFailure::from_message(response.output));
    }
    parse(&response.output).map_err(|msg| {
        AttemptFailure::from_message(format!("Failed to parse reviewer output: {}", msg))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::reviewer::ReviewerResponse;
    use crate::store::models::ChunkStatus;
    use crate::store::Db;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedReviewer {
        responses: Mutex<VecDeque<Result<ReviewerResponse>>>,
    }

    impl ScriptedReviewer {
        fn new(responses: Vec<Result<ReviewerResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl ReviewerAgent for ScriptedReviewer {
        async fn execute(&self, _prompt: &str, _timeout: Duration) -> Result<ReviewerResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ReviewerResponse::ok(r#"{"status": "pass", "feedback": ""}"#)))
        }

        fn model(&self) -> &str {
            "scripted-reviewer"
        }
    }

    fn fast_config() -> ReviewConfig {
        ReviewConfig::default()
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .with_timeout(Duration::from_secs(5))
    }

    /// Seed a project/spec/completed-chunk triple and return (handle, spec_id, chunk_id).
    fn seed() -> Result<(DbHandle, i64, i64)> {
        let db = DbHandle::new(Db::new_in_memory()?);
        let (spec_id, chunk_id) = {
            let guard = db.lock_sync()?;
            let project = guard.create_project("proj", "/tmp/proj")?;
            let spec = guard.create_spec(project.id, "build the thing")?;
            let chunk = guard.create_chunk(spec.id, "First chunk", "do step one", &[])?;
            guard.update_chunk_status(
                chunk.id,
                &ChunkStatus::Completed,
                Some("step one done"),
                None,
            )?;
            (spec.id, chunk.id)
        };
        Ok((db, spec_id, chunk_id))
    }

    #[tokio::test]
    async fn test_review_chunk_pass_persists_status_and_audit() -> Result<()> {
        let (db, spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            r#"{"status": "pass", "feedback": "looks right"}"#,
        ))]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        let outcome = engine.review_chunk(chunk_id).await.unwrap();
        assert_eq!(outcome.response.status, ReviewStatus::Pass);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.fix_chunk.is_none());
        assert_eq!(outcome.chunk.review_status, Some(ReviewStatus::Pass));
        assert_eq!(outcome.chunk.review_feedback.as_deref(), Some("looks right"));

        let audits = db.lock_sync()?.list_review_audits(spec_id)?;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].chunk_id, Some(chunk_id));
        assert_eq!(audits[0].review_type, ReviewType::Chunk);
        assert_eq!(audits[0].model, "scripted-reviewer");
        assert_eq!(audits[0].status, "pass");
        assert_eq!(audits[0].attempt, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_review_chunk_needs_fix_inserts_fix_chunk() -> Result<()> {
        let (db, spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            r#"{"status": "needs_fix", "feedback": "missing validation", "fix_chunk": {"title": "Add validation", "description": "Validate inputs before writing"}}"#,
        ))]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        let outcome = engine.review_chunk(chunk_id).await.unwrap();
        let fix = outcome.fix_chunk.unwrap();
        assert_eq!(fix.title, "Add validation");
        assert_eq!(fix.dependencies, vec![chunk_id]);
        assert_eq!(fix.fix_of, Some(chunk_id));
        assert_eq!(fix.status, ChunkStatus::Pending);

        let chunks = db.lock_sync()?.list_chunks(spec_id)?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.last().unwrap().id, fix.id, "fix chunk is last in stored order");
        Ok(())
    }

    #[tokio::test]
    async fn test_review_chunk_needs_fix_without_proposal_is_tolerated() -> Result<()> {
        let (db, _spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            r#"{"status": "needs_fix", "feedback": "vague complaint"}"#,
        ))]);
        let engine = ReviewEngine::new(db, reviewer, fast_config());

        let outcome = engine.review_chunk(chunk_id).await.unwrap();
        assert_eq!(outcome.response.status, ReviewStatus::NeedsFix);
        assert!(outcome.fix_chunk.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_succeeds() -> Result<()> {
        let (db, spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![
            Ok(ReviewerResponse::failed("HTTP 429 rate limit exceeded")),
            Ok(ReviewerResponse::ok(r#"{"status": "pass", "feedback": "ok"}"#)),
        ]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        let outcome = engine.review_chunk(chunk_id).await.unwrap();
        assert_eq!(outcome.attempts, 2);

        let audits = db.lock_sync()?.list_review_audits(spec_id)?;
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].status, "error");
        assert_eq!(audits[0].error_class.as_deref(), Some("rate_limit"));
        assert_eq!(audits[0].attempt, 1);
        assert_eq!(audits[1].status, "pass");
        assert_eq!(audits[1].attempt, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_error_returns_immediately() -> Result<()> {
        let (db, spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            "no structured verdict here",
        ))]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        let err = engine.review_chunk(chunk_id).await.unwrap_err();
        assert!(matches!(err, ReviewError::ParseFailed { .. }));

        let audits = db.lock_sync()?.list_review_audits(spec_id)?;
        assert_eq!(audits.len(), 1, "parse errors are not retried");
        assert_eq!(audits[0].error_class.as_deref(), Some("parse_error"));

        // Review status stays untouched on failure
        let chunk = db.lock_sync()?.get_chunk(chunk_id)?.unwrap();
        assert!(chunk.review_status.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_rate_limits_report_attempt_count() -> Result<()> {
        let (db, _spec_id, chunk_id) = seed()?;
        let responses = (0..4)
            .map(|_| Ok(ReviewerResponse::failed("rate limit")))
            .collect();
        let reviewer = ScriptedReviewer::new(responses);
        let engine = ReviewEngine::new(db, reviewer, fast_config());

        let err = engine.review_chunk(chunk_id).await.unwrap_err();
        match err {
            ReviewError::Failed {
                class, attempts, ..
            } => {
                assert_eq!(class, "rate_limit");
                assert_eq!(attempts, 4);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_review_chunk_unknown_id() -> Result<()> {
        let (db, _, _) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![]);
        let engine = ReviewEngine::new(db, reviewer, fast_config());
        let err = engine.review_chunk(999).await.unwrap_err();
        assert!(matches!(err, ReviewError::ChunkNotFound { id: 999 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_review_spec_creates_proposed_chunks() -> Result<()> {
        let (db, spec_id, _chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            r#"{"status": "needs_fix", "feedback": "gaps remain",
                "integration_issues": ["loader and writer disagree"],
                "missing_requirements": ["no retry on write"],
                "fix_chunks": [
                    {"title": "Reconcile formats", "description": "Make writer use loader schema"},
                    {"title": "Retry writes", "description": "Add bounded retry to writer"}
                ]}"#,
        ))]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        let outcome = engine.review_spec(spec_id).await.unwrap();
        assert_eq!(outcome.response.status, ReviewStatus::NeedsFix);
        assert_eq!(outcome.fix_chunks.len(), 2);
        assert!(outcome.fix_chunks.iter().all(|c| c.fix_of.is_none()));
        assert!(outcome.fix_chunks.iter().all(|c| c.dependencies.is_empty()));

        let chunks = db.lock_sync()?.list_chunks(spec_id)?;
        assert_eq!(chunks.len(), 3);

        let audits = db.lock_sync()?.list_review_audits(spec_id)?;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].chunk_id, None);
        assert_eq!(audits[0].review_type, ReviewType::Final);
        Ok(())
    }

    #[tokio::test]
    async fn test_review_spec_unknown_id() -> Result<()> {
        let (db, _, _) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![]);
        let engine = ReviewEngine::new(db, reviewer, fast_config());
        let err = engine.review_spec(999).await.unwrap_err();
        assert!(matches!(err, ReviewError::SpecNotFound { id: 999 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_engine_never_touches_execution_status() -> Result<()> {
        let (db, _spec_id, chunk_id) = seed()?;
        let reviewer = ScriptedReviewer::new(vec![Ok(ReviewerResponse::ok(
            r#"{"status": "fail", "feedback": "wrong approach"}"#,
        ))]);
        let engine = ReviewEngine::new(db.clone(), reviewer, fast_config());

        engine.review_chunk(chunk_id).await.unwrap();
        let chunk = db.lock_sync()?.get_chunk(chunk_id)?.unwrap();
        assert_eq!(chunk.status, ChunkStatus::Completed);
        assert_eq!(chunk.review_status, Some(ReviewStatus::Fail));
        Ok(())
    }
}
