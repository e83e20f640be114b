//! Bounded worker-thread pool.
//!
//! Each job runs on its own one-shot current-thread event loop, so node
//! bodies that block or burn CPU stay off the shared scheduler.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use dahlia_node::{Node, NodeError, NodeOutput};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::PoolError;

struct Job {
  node: Arc<dyn Node>,
  input: NodeOutput,
  reply: oneshot::Sender<Result<NodeOutput, NodeError>>,
}

/// A fixed set of worker threads consuming jobs from one shared queue.
pub struct WorkerThreadPool {
  sender: Mutex<Option<mpsc::Sender<Job>>>,
  handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerThreadPool {
  pub fn new(workers: usize) -> Self {
    let (sender, receiver) = mpsc::channel::<Job>();
    let receiver = Arc::new(Mutex::new(receiver));

    let mut handles = Vec::with_capacity(workers.max(1));
    for index in 0..workers.max(1) {
      let receiver = receiver.clone();
      let handle = thread::Builder::new()
        .name(format!("dahlia-worker-{index}"))
        .spawn(move || worker_main(receiver))
        .expect("failed to spawn worker thread");
      handles.push(handle);
    }

    Self {
      sender: Mutex::new(Some(sender)),
      handles: Mutex::new(handles),
    }
  }

  /// Run a node on the pool and await its result.
  pub async fn run(&self, node: Arc<dyn Node>, input: NodeOutput) -> Result<NodeOutput, PoolError> {
    let (reply, receiver) = oneshot::channel();
    let job = Job { node, input, reply };

    {
      let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
      let sender = sender.as_ref().ok_or(PoolError::ThreadPoolClosed)?;
      sender.send(job).map_err(|_| PoolError::ThreadPoolClosed)?;
    }

    let result = receiver.await.map_err(|_| PoolError::ThreadPoolClosed)?;
    result.map_err(PoolError::Node)
  }

  /// Stop accepting jobs. `wait` joins the workers after they drain the
  /// queue; otherwise the threads are left to finish on their own.
  pub fn shutdown(&self, wait: bool) {
    self
      .sender
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();

    if wait {
      let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
      for handle in handles {
        let _ = handle.join();
      }
    }
  }
}

fn worker_main(receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
  loop {
    let job = {
      let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
      receiver.recv()
    };
    let Ok(job) = job else {
      debug!("worker thread queue closed, exiting");
      return;
    };

    let result = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
      Ok(runtime) => runtime.block_on(job.node.run(job.input)),
      Err(e) => Err(NodeError::execution(
        &job.node.config().id,
        format!("failed to build worker event loop: {e}"),
      )),
    };

    // The caller may have been cancelled; nothing to do then.
    let _ = job.reply.send(result);
  }
}
