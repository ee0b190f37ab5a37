//! Outbound message buffers and the per-frame flush.
//!
//! Protocols never write to sockets directly. Replies are appended to the
//! protocol's output buffer during a dispatch frame; when the frame ends the
//! dispatcher calls [`OutputMessagePool::send_all`] and every buffer that
//! received data is handed to its connection as one wire frame.
//!
//! Buffers are recycled through a LIFO free list so the hot path does not
//! allocate a fresh 16KB message per reply.

use crate::dispatch::OutputSink;
use crate::runtime::{Connection, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

/// A message on its way out, tagged with the dispatch frame it was allocated in.
#[derive(Debug)]
pub struct OutputMessage {
    message: Message,
    frame: u64,
}

impl OutputMessage {
    pub fn new(message: Message, frame: u64) -> Self {
        Self { message, frame }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Dispatch frame this buffer was handed out in.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn len(&self) -> usize {
        self.message.message_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

struct PoolInner {
    /// Recycled buffers (LIFO for cache locality).
    free: Vec<Message>,
    /// Connections whose protocol holds a buffer awaiting the frame flush.
    auto_send: Vec<Weak<Connection>>,
}

/// Recycling pool for output buffers and the frame flush driver.
pub struct OutputMessagePool {
    inner: Mutex<PoolInner>,
    max_free: usize,
    frame: AtomicU64,
}

impl OutputMessagePool {
    /// Create a pool with `count` pre-allocated buffers.
    ///
    /// The free list never grows past `count`; extra buffers are dropped
    /// when released.
    pub fn new(count: usize) -> Arc<Self> {
        let free = (0..count).map(|_| Message::new()).collect();
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                free,
                auto_send: Vec::new(),
            }),
            max_free: count,
            frame: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take an empty buffer, reusing a recycled one when available.
    pub fn get_output_message(&self) -> OutputMessage {
        let message = self.lock().free.pop().unwrap_or_default();
        OutputMessage::new(message, self.frame())
    }

    /// Return a buffer to the free list.
    pub fn release(&self, output: OutputMessage) {
        let mut message = output.into_message();
        message.reset();
        let mut inner = self.lock();
        if inner.free.len() < self.max_free {
            inner.free.push(message);
        }
    }

    /// Flush this connection's protocol buffer at the end of the current frame.
    pub fn add_to_auto_send(&self, connection: &Arc<Connection>) {
        self.lock().auto_send.push(Arc::downgrade(connection));
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Buffers currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Connections waiting for the frame flush.
    pub fn pending(&self) -> usize {
        self.lock().auto_send.len()
    }
}

impl OutputSink for OutputMessagePool {
    fn start_execution_frame(&self) {
        self.frame.fetch_add(1, Ordering::AcqRel);
    }

    fn send_all(&self) {
        let pending = std::mem::take(&mut self.lock().auto_send);
        if pending.is_empty() {
            return;
        }
        trace!(count = pending.len(), frame = self.frame(), "Flushing output");

        for connection in pending.iter().filter_map(Weak::upgrade) {
            let Some(protocol) = connection.protocol() else {
                continue;
            };
            let Some(output) = protocol.base().take_output_buffer() else {
                continue;
            };
            if output.is_empty() {
                self.release(output);
                continue;
            }
            connection.send(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_recycles_buffers() {
        let pool = OutputMessagePool::new(2);
        assert_eq!(pool.available(), 2);

        let mut a = pool.get_output_message();
        let b = pool.get_output_message();
        let c = pool.get_output_message();
        assert_eq!(pool.available(), 0);

        a.message_mut().add_u32(7).unwrap();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        // Capped at the pre-allocated count
        assert_eq!(pool.available(), 2);

        let reused = pool.get_output_message();
        assert!(reused.is_empty());
    }

    #[test]
    fn test_frame_counter() {
        let pool = OutputMessagePool::new(0);
        assert_eq!(pool.frame(), 0);
        pool.start_execution_frame();
        pool.start_execution_frame();
        assert_eq!(pool.get_output_message().frame(), 2);
    }

    #[test]
    fn test_send_all_with_nothing_pending() {
        let pool = OutputMessagePool::new(1);
        pool.send_all();
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.available(), 1);
    }
}
