use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Single-worker serialized executor.
///
/// Every session mutation and every stream write runs here, one task at a
/// time, in the order the `post` calls returned. Tasks must not block: a
/// stalled task stalls every session sharing the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(DispatcherInner {
                sender: Mutex::new(Some(sender)),
                receiver: Mutex::new(Some(receiver)),
                started: AtomicBool::new(false),
                stopped: Arc::new(AtomicBool::new(false)),
                worker: Mutex::new(None),
                worker_id: Mutex::new(None),
            }),
        }
    }

    /// Spawns the worker thread. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(receiver) = self.inner.receiver.lock().take() else {
            return;
        };
        let stopped = Arc::clone(&self.inner.stopped);
        let spawned = thread::Builder::new()
            .name("signal-dispatcher".into())
            .spawn(move || run_worker(receiver, stopped));
        match spawned {
            Ok(handle) => {
                *self.inner.worker_id.lock() = Some(handle.thread().id());
                *self.inner.worker.lock() = Some(handle);
                debug!("dispatcher worker started");
            }
            Err(err) => {
                error!(error = %err, "failed to spawn dispatcher worker");
                self.inner.stopped.store(true, Ordering::Release);
                self.inner.sender.lock().take();
            }
        }
    }

    /// Enqueues `task` without running it on the caller's thread.
    ///
    /// After shutdown the task is dropped silently.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.inner.sender.lock();
        match sender.as_ref() {
            Some(sender) if sender.send(Box::new(task)).is_ok() => {}
            _ => {
                counter!("signal_dispatcher_tasks_dropped_total", 1);
                trace!("dispatcher stopped; dropping task");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stops the worker and closes the queue for good. Tasks still queued are
    /// abandoned. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherInner {
    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sender.lock().take();
        self.receiver.lock().take();

        let on_worker = *self.worker_id.lock() == Some(thread::current().id());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if on_worker {
                return;
            }
            if handle.join().is_err() {
                error!("dispatcher worker exited with a panic");
            }
        }
        debug!("dispatcher shut down");
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut receiver: mpsc::UnboundedReceiver<Task>, stopped: Arc<AtomicBool>) {
    while let Some(task) = receiver.blocking_recv() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            counter!("signal_dispatcher_task_panics_total", 1);
            error!("dispatcher task panicked");
        }
    }
    let abandoned = {
        receiver.close();
        let mut count = 0usize;
        while receiver.try_recv().is_ok() {
            count += 1;
        }
        count
    };
    debug!(abandoned, "dispatcher worker exiting");
}
