//! Single-threaded ordered task dispatcher.
//!
//! All work that mutates shared server state runs here, one task at a time.
//! Each task is one dispatch frame: the output sink is told a frame starts,
//! the task runs, and every output buffer it produced is flushed before the
//! next task is popped.
//!
//! ## States
//!
//! ```text
//! Terminated --start--> Running --stop--> Closing --shutdown--> Terminated
//! ```
//!
//! `add_task` only accepts work while `Running`. A `Closing` dispatcher keeps
//! draining what is already queued.

use crate::dispatch::Task;
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, trace, warn};

/// Receives dispatch frame boundaries so pending output can be coalesced.
pub trait OutputSink: Send + Sync {
    /// Called before a task runs.
    fn start_execution_frame(&self);

    /// Called after a task ran; flushes everything the task produced.
    fn send_all(&self);
}

/// Lifecycle of the dispatcher thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Closing,
    Terminated,
}

struct Inner {
    queue: VecDeque<Task>,
    state: DispatcherState,
}

/// FIFO task queue drained by one worker thread.
pub struct Dispatcher {
    inner: Mutex<Inner>,
    signal: Condvar,
    sink: Option<Arc<dyn OutputSink>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl Dispatcher {
    /// Create a stopped dispatcher flushing frames into `sink`.
    pub fn new(sink: Option<Arc<dyn OutputSink>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: DispatcherState::Terminated,
            }),
            signal: Condvar::new(),
            sink,
            thread: Mutex::new(None),
            thread_id: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker thread.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != DispatcherState::Terminated {
                warn!(state = ?inner.state, "Dispatcher already started");
                return Ok(());
            }
            inner.state = DispatcherState::Running;
        }

        let dispatcher = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher.worker_loop());

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.lock().state = DispatcherState::Terminated;
                return Err(e);
            }
        };

        *self
            .thread_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle.thread().id());
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("Dispatcher started");
        Ok(())
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let inner = self.lock();
                let mut inner = self
                    .signal
                    .wait_while(inner, |inner| {
                        inner.queue.is_empty() && inner.state != DispatcherState::Terminated
                    })
                    .unwrap_or_else(PoisonError::into_inner);

                if inner.state == DispatcherState::Terminated {
                    break;
                }
                inner.queue.pop_front()
            };

            if let Some(task) = task {
                self.execute(task);
            }
        }
        debug!("Dispatcher worker exited");
    }

    /// Run one task in its own frame. Expired tasks are dropped unrun.
    fn execute(&self, task: Task) {
        if task.has_expired() {
            trace!("Discarding expired task");
            return;
        }

        if let Some(sink) = &self.sink {
            sink.start_execution_frame();
        }

        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            error!("Dispatcher task panicked");
        }

        if let Some(sink) = &self.sink {
            sink.send_all();
        }
    }

    /// Queue a task. Returns false (and drops the task) unless running.
    ///
    /// With `push_front` the task jumps ahead of everything not yet started.
    pub fn add_task(&self, task: Task, push_front: bool) -> bool {
        let do_signal = {
            let mut inner = self.lock();
            if inner.state != DispatcherState::Running {
                trace!(state = ?inner.state, "Dispatcher not running, task dropped");
                return false;
            }
            let was_empty = inner.queue.is_empty();
            if push_front {
                inner.queue.push_front(task);
            } else {
                inner.queue.push_back(task);
            }
            was_empty
        };

        if do_signal {
            self.signal.notify_one();
        }
        true
    }

    /// Run every queued task on the calling thread until the queue is empty.
    pub fn flush(&self) {
        loop {
            let tasks = std::mem::take(&mut self.lock().queue);
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                self.execute(task);
            }
        }
        trace!("Dispatcher flushed");
    }

    /// Stop accepting tasks; queued tasks keep draining.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == DispatcherState::Running {
            inner.state = DispatcherState::Closing;
        }
        debug!("Dispatcher stopping");
    }

    /// Terminate the worker, run whatever was still queued, and join.
    pub fn shutdown(&self) {
        let remaining = {
            let mut inner = self.lock();
            inner.state = DispatcherState::Terminated;
            std::mem::take(&mut inner.queue)
        };
        self.signal.notify_all();

        for task in remaining {
            self.execute(task);
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Dispatcher thread panicked");
            }
        }
        debug!("Dispatcher shut down");
    }

    pub fn state(&self) -> DispatcherState {
        self.lock().state
    }

    /// Number of queued tasks not yet started.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when called from the worker thread.
    pub fn is_dispatcher_thread(&self) -> bool {
        *self.thread_id.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }
}
