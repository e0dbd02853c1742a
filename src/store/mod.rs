//! Record store: SQLite persistence for projects, specs, chunks,
//! tool calls, and review audits.
//!
//! `Db` owns the `rusqlite::Connection` and exposes synchronous CRUD;
//! `DbHandle` wraps it for async callers via `spawn_blocking`. Chunk
//! listing is always in stored order (`position`), which is the order the
//! run-all controller executes in.

pub mod db;
pub mod models;

pub use db::{Db, DbHandle};
