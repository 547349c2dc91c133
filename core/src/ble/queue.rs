//! Single-consumer serial worker
//!
//! Every radio-stack mutation runs here, one at a time, in enqueue order.
//! Enqueue never blocks. A panicking task is logged and the worker moves on.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Operation queue closed")]
    Closed,
    #[error("Flush called from the worker thread")]
    Reentrant,
}

pub struct OperationQueue {
    name: String,
    sender: Option<mpsc::UnboundedSender<Task>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl OperationQueue {
    pub fn new(name: impl Into<String>) -> Result<Self, QueueError> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let worker_name = name.clone();

        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(task) = receiver.blocking_recv() {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(queue = %worker_name, "Queued operation panicked");
                }
            }
            debug!(queue = %worker_name, "Operation queue drained");
        })?;
        let worker_id = worker.thread().id();

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            worker_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `task` behind everything already queued
    pub fn execute<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or(QueueError::Closed)?
            .send(Box::new(task))
            .map_err(|_| QueueError::Closed)
    }

    /// Block until every task enqueued before this call has run.
    ///
    /// Must not be called from inside an async runtime.
    pub fn flush(&self) -> Result<(), QueueError> {
        if thread::current().id() == self.worker_id {
            return Err(QueueError::Reentrant);
        }
        let (done, wait) = oneshot::channel();
        self.execute(move || {
            let _ = done.send(());
        })?;
        wait.blocking_recv().map_err(|_| QueueError::Closed)
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id && worker.join().is_err() {
                error!(queue = %self.name, "Operation queue worker terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let queue = OperationQueue::new("test-fifo").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let log = log.clone();
            queue.execute(move || log.lock().push(i)).unwrap();
        }
        queue.flush().unwrap();

        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_does_not_stop_worker() {
        let queue = OperationQueue::new("test-panic").unwrap();
        let ran = Arc::new(Mutex::new(false));

        queue.execute(|| panic!("task failure")).unwrap();
        let flag = ran.clone();
        queue.execute(move || *flag.lock() = true).unwrap();
        queue.flush().unwrap();

        assert!(*ran.lock());
    }

    #[test]
    fn test_drop_runs_pending_tasks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let queue = OperationQueue::new("test-drop").unwrap();
            for i in 0..10 {
                let log = log.clone();
                queue.execute(move || log.lock().push(i)).unwrap();
            }
        }
        assert_eq!(log.lock().len(), 10);
    }

    #[test]
    fn test_runs_on_named_worker_thread() {
        let queue = OperationQueue::new("test-name").unwrap();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();

        queue
            .execute(move || *slot.lock() = thread::current().name().map(str::to_owned))
            .unwrap();
        queue.flush().unwrap();

        assert_eq!(seen.lock().as_deref(), Some("test-name"));
        assert_eq!(queue.name(), "test-name");
    }
}
