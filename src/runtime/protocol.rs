//! Protocol trait and the state every protocol shares.
//!
//! Hooks run on the connection's read task. Anything that touches shared
//! application state, or writes a reply, should go through
//! [`ProtocolBase::dispatch`] so it runs on the dispatcher inside an
//! execution frame; the frame's end flushes the reply.

use crate::context::ServerContext;
use crate::dispatch::{Task, SCHEDULER_MIN_TICKS};
use crate::error::MessageError;
use crate::runtime::connection::{Connection, ConnectionRef};
use crate::runtime::message::Message;
use crate::runtime::output::OutputMessage;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// A wire protocol bound to one connection.
pub trait Protocol: Send + Sync + 'static {
    fn base(&self) -> &ProtocolBase;

    /// Called once when a protocol that speaks first is attached.
    fn on_connect(&self) {}

    /// First message after the protocol was selected.
    ///
    /// For sniffed ports the selector byte has already been consumed.
    fn on_recv_first_message(&self, msg: &mut Message);

    fn parse_packet(&self, msg: &mut Message);

    fn on_recv_message(&self, msg: &mut Message) {
        self.parse_packet(msg);
    }

    /// Called just before `output` is handed to the writer.
    fn on_send_message(&self, output: &OutputMessage) {
        self.base().on_message_sent(output);
    }

    /// Final hook once the protocol is detached and unreferenced.
    fn on_release(&self) {}
}

/// Connection binding, output buffer and user context for a protocol.
pub struct ProtocolBase {
    connection: Mutex<Option<Arc<Connection>>>,
    context: Arc<ServerContext>,
    ref_count: AtomicUsize,
    output_buffer: Mutex<Option<OutputMessage>>,
    user_context: Mutex<Option<Box<dyn Any + Send>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProtocolBase {
    pub fn new(connection: &Arc<Connection>) -> Self {
        Self {
            connection: Mutex::new(Some(Arc::clone(connection))),
            context: Arc::clone(connection.context()),
            ref_count: AtomicUsize::new(0),
            output_buffer: Mutex::new(None),
            user_context: Mutex::new(None),
        }
    }

    /// The bound connection, or `None` once detached.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.connection).clone()
    }

    pub fn set_connection(&self, connection: Option<Arc<Connection>>) {
        *lock(&self.connection) = connection;
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn add_ref(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn un_ref(&self) -> usize {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "protocol reference count underflow");
        previous.saturating_sub(1)
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Run `f` on the dispatcher with this connection's current protocol.
    ///
    /// The connection stays referenced until the task has run. If the
    /// protocol was detached in the meantime the task is skipped. Returns
    /// false when the dispatcher rejected the task.
    pub fn dispatch<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Arc<dyn Protocol>) + Send + 'static,
    {
        let Some(connection) = self.connection() else {
            return false;
        };
        let guard = ConnectionRef::new(&connection);
        self.context.dispatcher().add_task(
            Task::new(move || {
                if let Some(protocol) = guard.protocol() {
                    f(&protocol);
                }
            }),
            false,
        )
    }

    /// Ask the connection to close.
    pub fn disconnect(&self) {
        if let Some(connection) = self.connection() {
            connection.close_connection();
        }
    }

    /// Close once the current frame's output has been handed to the writer.
    ///
    /// Used after a final reply so it is not discarded by the close.
    pub fn disconnect_after_flush(&self) {
        if !self.dispatch(|protocol| protocol.base().disconnect()) {
            self.disconnect();
        }
    }

    /// Append to the output buffer that is flushed at the end of the frame.
    ///
    /// A write that does not fit is rolled back; if the buffer already held
    /// data it is sent right away and `f` runs again on a fresh buffer.
    /// Writes on a detached protocol are dropped.
    pub fn with_output_buffer<F>(&self, mut f: F) -> Result<(), MessageError>
    where
        F: FnMut(&mut Message) -> Result<(), MessageError>,
    {
        let Some(connection) = self.connection() else {
            trace!("Write on detached protocol dropped");
            return Ok(());
        };

        let full = {
            let mut slot = self.acquire_output(&connection);
            let Some(output) = slot.as_mut() else {
                return Ok(());
            };
            let mark = output.len();
            let result = f(output.message_mut());
            match result {
                Ok(()) => return Ok(()),
                Err(MessageError::Overflow { .. }) if mark > 0 => {
                    output.message_mut().truncate(mark);
                }
                Err(e) => {
                    output.message_mut().truncate(mark);
                    return Err(e);
                }
            }
            slot.take()
        };

        if let Some(full) = full {
            trace!(conn_id = connection.id(), len = full.len(), "Output buffer full, sending");
            connection.send(full);
        }

        let mut slot = self.acquire_output(&connection);
        let Some(output) = slot.as_mut() else {
            return Ok(());
        };
        if let Err(e) = f(output.message_mut()) {
            output.message_mut().truncate(0);
            return Err(e);
        }
        Ok(())
    }

    fn acquire_output(&self, connection: &Arc<Connection>) -> MutexGuard<'_, Option<OutputMessage>> {
        let mut slot = lock(&self.output_buffer);
        if slot.is_none() {
            let pool = self.context.output_pool();
            *slot = Some(pool.get_output_message());
            pool.add_to_auto_send(connection);
        }
        slot
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), MessageError> {
        self.with_output_buffer(|msg| msg.add_bytes(bytes).map(|_| ()))
    }

    pub fn write_string(&self, value: &str) -> Result<(), MessageError> {
        self.with_output_buffer(|msg| msg.add_string(value).map(|_| ()))
    }

    /// Take the pending output buffer, if any.
    pub fn take_output_buffer(&self) -> Option<OutputMessage> {
        lock(&self.output_buffer).take()
    }

    /// Replace the per-connection user context.
    pub fn set_user_context<T: Any + Send>(&self, value: T) {
        *lock(&self.user_context) = Some(Box::new(value));
    }

    /// Borrow the user context as `T`. `f` sees `None` if unset or of another type.
    pub fn with_user_context<T, R, F>(&self, f: F) -> R
    where
        T: Any + Send,
        F: FnOnce(Option<&mut T>) -> R,
    {
        let mut slot = lock(&self.user_context);
        f(slot.as_mut().and_then(|value| value.downcast_mut::<T>()))
    }

    /// Default `on_send_message` behavior.
    ///
    /// An empty buffer left over from an earlier frame is recycled so the
    /// next write starts a fresh one registered for this frame's flush.
    pub fn on_message_sent(&self, _output: &OutputMessage) {
        let frame = self.context.output_pool().frame();
        let stale = {
            let mut slot = lock(&self.output_buffer);
            match slot.as_ref() {
                Some(buffer) if buffer.frame() < frame && buffer.is_empty() => slot.take(),
                _ => None,
            }
        };
        if let Some(stale) = stale {
            self.context.output_pool().release(stale);
        }
    }
}

/// Release a detached protocol.
///
/// While references remain the release is retried through the scheduler.
/// Once free, its pending output is recycled and `on_release` runs.
pub fn release_protocol(protocol: Arc<dyn Protocol>) {
    let base = protocol.base();
    let context = Arc::clone(base.context());

    if base.ref_count() > 0 {
        let retry = Arc::clone(&protocol);
        let event = context.scheduler().add_event(
            SCHEDULER_MIN_TICKS,
            Task::new(move || release_protocol(retry)),
        );
        if event != 0 {
            trace!(refs = base.ref_count(), "Protocol still referenced, retrying release");
            return;
        }
        warn!(refs = base.ref_count(), "Scheduler not running, releasing referenced protocol");
    }

    if let Some(output) = base.take_output_buffer() {
        context.output_pool().release(output);
    }
    protocol.on_release();
}
