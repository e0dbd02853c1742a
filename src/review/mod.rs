//! Automated review of chunk and spec results.
//!
//! A reviewing agent (behind [`reviewer::ReviewerAgent`]) is asked
//! whether the produced work satisfies its requirements. Failures are
//! classified and rate limits retried ([`retry`]), the agent's free-text
//! answer is parsed defensively ([`parse`]), and [`engine::ReviewEngine`]
//! persists verdicts, fix-chunks, and a per-attempt audit trail.

pub mod engine;
pub mod parse;
pub mod retry;
pub mod reviewer;

pub use engine::{ChunkReviewOutcome, FinalReviewOutcome, ReviewConfig, ReviewEngine};
pub use parse::{ChunkReviewResponse, FinalReviewResponse, FixChunkProposal};
pub use retry::{FailureKind, RetryPolicy};
pub use reviewer::{ReviewerAgent, ReviewerResponse};
