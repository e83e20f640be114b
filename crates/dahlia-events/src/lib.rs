//! Dahlia Events
//!
//! Lifecycle events emitted during workflow execution, the in-process bus
//! that fans them out, and the state tracker that folds them into a
//! per-workflow snapshot safe for concurrent readers.
//!
//! Dispatch is synchronous from the emitter; a panicking subscriber is
//! logged and swallowed so observability can never break the scheduler.

mod events;
mod tracker;

pub use events::{ChannelNotifier, EventBus, ExecutionEvent, ExecutionNotifier};
pub use tracker::{CompletedEntry, ExecutingEntry, StateTracker, WorkflowState, WorkflowStatus};
