//! Ordered task execution.
//!
//! - `Task`: a deferred closure with optional expiry
//! - `Dispatcher`: the single worker thread every state change runs on
//! - `Scheduler`: delays tasks before handing them to the dispatcher

mod dispatcher;
mod scheduler;
mod task;

pub use dispatcher::{Dispatcher, DispatcherState, OutputSink};
pub use scheduler::{EventId, Scheduler, SCHEDULER_MIN_TICKS};
pub use task::Task;
