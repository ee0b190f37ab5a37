//! Timer-driven delayed task queue.
//!
//! The scheduler never runs task bodies itself: when an event expires its
//! task is handed to the [`Dispatcher`], so delayed work is still serialized
//! with everything else.

use crate::dispatch::{Dispatcher, Task};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Smallest delay, in milliseconds, the scheduler will honour.
pub const SCHEDULER_MIN_TICKS: u64 = 50;

/// Identifier returned by [`Scheduler::add_event`]. Zero is never issued.
pub type EventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Running,
    Closing,
    Terminated,
}

struct ScheduledEvent {
    deadline: Instant,
    id: EventId,
    task: Task,
}

// Reversed so the BinaryHeap yields the earliest deadline first.
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledEvent {}

struct Inner {
    events: BinaryHeap<ScheduledEvent>,
    cancelled: HashSet<EventId>,
    next_id: EventId,
    state: SchedulerState,
}

pub struct Scheduler {
    inner: Mutex<Inner>,
    signal: Condvar,
    dispatcher: Arc<Dispatcher>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                events: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_id: 1,
                state: SchedulerState::Terminated,
            }),
            signal: Condvar::new(),
            dispatcher,
            thread: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Terminated {
                return Ok(());
            }
            inner.state = SchedulerState::Running;
        }

        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || scheduler.worker_loop());

        match handle {
            Ok(handle) => {
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                debug!("Scheduler started");
                Ok(())
            }
            Err(e) => {
                self.lock().state = SchedulerState::Terminated;
                Err(e)
            }
        }
    }

    fn worker_loop(&self) {
        let mut inner = self.lock();
        loop {
            if inner.state == SchedulerState::Terminated {
                break;
            }

            let now = Instant::now();
            let wait = match inner.events.peek().map(|event| event.deadline) {
                None => None,
                Some(deadline) if deadline > now => Some(deadline - now),
                Some(_) => {
                    let Some(event) = inner.events.pop() else {
                        continue;
                    };
                    if inner.cancelled.remove(&event.id) {
                        trace!(event_id = event.id, "Skipping cancelled event");
                        continue;
                    }
                    drop(inner);
                    trace!(event_id = event.id, "Event expired");
                    self.dispatcher.add_task(event.task, false);
                    inner = self.lock();
                    continue;
                }
            };

            inner = match wait {
                None => self
                    .signal
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(timeout) => {
                    self.signal
                        .wait_timeout(inner, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        debug!("Scheduler worker exited");
    }

    /// Deliver `task` to the dispatcher after `delay_ms` milliseconds.
    ///
    /// Delays below [`SCHEDULER_MIN_TICKS`] are raised to it. Returns 0 when
    /// the scheduler is not running.
    pub fn add_event(&self, delay_ms: u64, task: Task) -> EventId {
        let delay = Duration::from_millis(delay_ms.max(SCHEDULER_MIN_TICKS));
        let (id, do_signal) = {
            let mut inner = self.lock();
            if inner.state != SchedulerState::Running {
                trace!("Scheduler not running, event dropped");
                return 0;
            }

            let id = inner.next_id;
            inner.next_id += 1;
            let deadline = Instant::now() + delay;
            let do_signal = inner
                .events
                .peek()
                .map_or(true, |top| deadline < top.deadline);
            inner.events.push(ScheduledEvent { deadline, id, task });
            (id, do_signal)
        };

        if do_signal {
            self.signal.notify_one();
        }
        id
    }

    /// Cancel a pending event. Returns false if it already fired or never existed.
    pub fn stop_event(&self, id: EventId) -> bool {
        if id == 0 {
            return false;
        }
        let mut inner = self.lock();
        if inner.events.iter().any(|event| event.id == id) {
            inner.cancelled.insert(id)
        } else {
            false
        }
    }

    /// Stop accepting new events; pending ones still fire.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == SchedulerState::Running {
            inner.state = SchedulerState::Closing;
        }
    }

    /// Drop pending events and join the timer thread.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.state = SchedulerState::Terminated;
            inner.events.clear();
            inner.cancelled.clear();
        }
        self.signal.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
        debug!("Scheduler shut down");
    }

    /// Number of events waiting to fire, cancelled ones included.
    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn started() -> (Arc<Dispatcher>, Arc<Scheduler>) {
        let dispatcher = Dispatcher::new(None);
        dispatcher.start().unwrap();
        let scheduler = Scheduler::new(Arc::clone(&dispatcher));
        scheduler.start().unwrap();
        (dispatcher, scheduler)
    }

    #[test]
    fn test_event_fires_through_dispatcher() {
        let (dispatcher, scheduler) = started();
        let (tx, rx) = mpsc::channel();

        let inner = Arc::clone(&dispatcher);
        let start = Instant::now();
        let id = scheduler.add_event(
            10,
            Task::new(move || tx.send(inner.is_dispatcher_thread()).unwrap()),
        );
        assert_ne!(id, 0);

        let on_dispatcher = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(on_dispatcher);
        // Raised to the minimum tick
        assert!(start.elapsed() >= Duration::from_millis(SCHEDULER_MIN_TICKS));

        scheduler.shutdown();
        dispatcher.shutdown();
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let (dispatcher, scheduler) = started();
        let (tx, rx) = mpsc::channel();

        for (delay, n) in [(300u64, 3u32), (100, 1), (200, 2)] {
            let tx = tx.clone();
            scheduler.add_event(delay, Task::new(move || tx.send(n).unwrap()));
        }

        let order: Vec<u32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);

        scheduler.shutdown();
        dispatcher.shutdown();
    }

    #[test]
    fn test_stop_event_cancels() {
        let (dispatcher, scheduler) = started();
        let (tx, rx) = mpsc::channel();

        let cancelled_tx = tx.clone();
        let id = scheduler.add_event(100, Task::new(move || cancelled_tx.send(1).unwrap()));
        scheduler.add_event(200, Task::new(move || tx.send(2).unwrap()));

        assert!(scheduler.stop_event(id));
        assert!(!scheduler.stop_event(id + 100));
        assert!(!scheduler.stop_event(0));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        scheduler.shutdown();
        dispatcher.shutdown();
    }

    #[test]
    fn test_add_event_after_stop() {
        let (dispatcher, scheduler) = started();
        scheduler.stop();
        assert_eq!(scheduler.add_event(10, Task::new(|| {})), 0);
        assert_eq!(scheduler.pending_events(), 0);
        scheduler.shutdown();
        dispatcher.shutdown();
    }
}
