//! Dahlia Node
//!
//! This crate defines the contract between the scheduler and node
//! implementations. A node is an [`Arc<dyn Node>`] created by the
//! [`NodeRegistry`] from a [`NodeConfig`] descriptor; the scheduler only ever
//! talks to the capability set on the trait.
//!
//! # Routing is polymorphic
//!
//! The scheduler never inspects concrete node types. The two capabilities it
//! depends on are:
//!
//! - [`Node::branches_to_follow`] - which outgoing branch keys to descend
//!   into, given the incoming output. A completion sentinel broadcasts to all
//!   available branches; a conditional node returns the branch it selected.
//! - [`Node::continue_after_execution`] - whether the scheduler may keep
//!   descending after this node ran (`false` for non-blocking terminators).
//!
//! Adding a node variant means implementing these methods, not editing the
//! scheduler.

mod branch;
mod config;
mod contract;
mod error;
mod form;
mod output;
mod registry;

pub use branch::BranchKey;
pub use config::{NodeConfig, QUEUE_NAME_KEY};
pub use contract::{Node, NodeVariant, PoolKind, Readiness, RunState};
pub use error::NodeError;
pub use form::render_form;
pub use output::{COMPLETION_FLAG, NodeOutput, RESPONSE_READY, unique_key};
pub use registry::{NodeDescriptor, NodeRegistry};
