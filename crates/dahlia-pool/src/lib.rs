//! Dahlia Pool
//!
//! Dispatches one node invocation to an execution backend:
//!
//! - **cooperative** - await the node directly on the current task,
//! - **worker thread** - a bounded pool of threads, each job on a private
//!   one-shot event loop (for CPU-bound or blocking node bodies),
//! - **worker process** - a bounded pool of child worker processes speaking a
//!   JSON-line protocol; the worker rebuilds the node from its config via its
//!   own registry and re-acquires resources through the setup hook.
//!
//! Pools are created lazily on first use and torn down on explicit shutdown,
//! waiting for in-flight jobs unless forced.

mod error;
mod executor;
mod process_pool;
mod protocol;
mod thread_pool;

pub use error::PoolError;
pub use executor::{PoolConfig, PoolExecutor};
pub use process_pool::{ProcessPool, WorkerCommand};
pub use protocol::{WorkerRequest, WorkerResponse, run_worker_loop};
pub use thread_pool::WorkerThreadPool;
