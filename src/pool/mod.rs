//! Worker-pool boundary.
//!
//! Surrounding tooling runs general background tasks through a bounded
//! pool of workers. This crate only consumes that pool's control
//! surface; scheduling lives on the other side of the trait. The pool's
//! concurrency limit is independent of chunk execution, which stays
//! serialized through the execution slot no matter how many workers the
//! pool allows.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One task waiting in the pool's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub label: String,
    pub enqueued_at: String,
}

/// Pool-level notifications, keyed by worker id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PoolEvent {
    WorkerStarted { worker_id: String },
    WorkerPaused { worker_id: String },
    WorkerResumed { worker_id: String },
    WorkerStopped { worker_id: String },
    QueueChanged { depth: usize },
}

/// Control surface of the external worker pool.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn pause_worker(&self, worker_id: &str) -> Result<()>;

    async fn resume_worker(&self, worker_id: &str) -> Result<()>;

    /// Stop a worker. Queued tasks it would have taken stay queued.
    async fn stop_worker(&self, worker_id: &str) -> Result<()>;

    async fn get_queue(&self) -> Result<Vec<QueuedTask>>;

    async fn get_active_count(&self) -> Result<usize>;

    async fn get_max_workers(&self) -> Result<usize>;

    /// Subscribe to pool events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PoolEvent>;
}
