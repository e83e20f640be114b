//! Dahlia Engine
//!
//! The top-level orchestrator. Loading a workflow runs the fixed pipeline
//! `detect mode → build graph → validate → pre-process`; executing it picks
//! the strategy for the mode:
//!
//! - **production** - one [`LoopRunner`] per producer, spawned concurrently,
//!   each driving its downstream subgraph until a completion sentinel drains
//!   it or shutdown is requested;
//! - **api** - a one-shot walk from the unique entry node, applying the same
//!   branch selection as the loop runner, stopping at a respond node;
//! - **single node** - one invocation, with upstream inputs materialized
//!   from the cache in development mode.
//!
//! Validators and pre-processors are priority-ordered registries (universal
//! entries first, then mode-specific), so new rules are registrations rather
//! than edits to the pipeline.

mod engine;
mod error;
mod looper;
pub mod mode;
mod preprocess;
mod strategy;
mod validate;

pub use engine::{Engine, EngineConfig, PreparedWorkflow, WorkflowHandle};
pub use error::EngineError;
pub use looper::LoopRunner;
pub use preprocess::{Preprocessor, PreprocessorRegistry, QueueNamer};
pub use strategy::{ApiStrategy, ExecutionStrategy, ProductionStrategy, SingleNodeStrategy};
pub use validate::{Validator, ValidatorRegistry};
