//! Deferred units of work executed by the dispatcher.

use std::fmt;
use std::time::{Duration, Instant};

/// A boxed closure queued for ordered execution on the dispatcher thread.
///
/// A task with an expiration is dropped without running if it is dequeued
/// after that instant.
pub struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    expiration: Option<Instant>,
}

impl Task {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
            expiration: None,
        }
    }

    /// Create a task that is discarded if not started within `expires_in`.
    pub fn with_expiry<F>(expires_in: Duration, func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
            expiration: Some(Instant::now() + expires_in),
        }
    }

    pub fn has_expired(&self) -> bool {
        self.expiration
            .is_some_and(|expiration| Instant::now() >= expiration)
    }

    /// Consume the task and run it on the current thread.
    pub fn run(self) {
        (self.func)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}
