//! Chunk execution sessions.
//!
//! One chunk runs at a time against the external agent runtime. The
//! [`manager::ExecutionManager`] owns the single active slot, pumps the
//! runtime's event feed into a per-chunk [`events::EventLog`], persists
//! progress to the store, and enforces the wall-clock timeout. The
//! runtime itself sits behind [`runtime::AgentRuntime`] so tests can
//! drive executions with a mock.

pub mod events;
pub mod manager;
pub mod runtime;

pub use events::{EventLog, ExecutionEvent};
pub use manager::{ExecutionConfig, ExecutionManager};
pub use runtime::{AgentRuntime, RuntimeEvent, ToolCallUpdate};
