//! Whole-spec orchestration.
//!
//! [`runner::RunAllController`] sequences a spec's chunks through
//! execution and review, emitting [`events::RunAllEvent`] over an
//! unbounded channel as the run progresses.

pub mod events;
pub mod runner;

pub use events::RunAllEvent;
pub use runner::RunAllController;
