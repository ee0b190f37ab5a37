//! Connection state machine and registry.
//!
//! A connection owns the two halves of its socket. The read half is driven
//! by a read loop that frames incoming bytes and hands each message to the
//! bound protocol; the write half belongs to a writer task that drains the
//! outgoing queue in batches, each batch under the write timeout.
//!
//! ## Close Sequence
//!
//! ```text
//! Open --close_connection--> RequestClose --close task--> Closing --> Closed
//! ```
//!
//! `close_connection` may be called from any thread; it only flips the state
//! and queues the close task on the dispatcher. The task detaches the
//! protocol and, if no write is in flight, closes the socket. Otherwise the
//! writer finishes the close when its write completes or times out. Removal
//! from the registry waits until no references remain, retrying through the
//! scheduler.
//!
//! All state lives behind one mutex that is never held across a call into a
//! protocol, the dispatcher or another connection method.

use crate::context::ServerContext;
use crate::dispatch::{Task, SCHEDULER_MIN_TICKS};
use crate::runtime::message::{Message, FRAME_HEADER_SIZE};
use crate::runtime::output::{OutputMessage, OutputMessagePool};
use crate::runtime::protocol::{release_protocol, Protocol};
use crate::runtime::service::ServicePort;
use bytes::{BufMut, BytesMut};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

/// Read half of a connection's transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection's transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on bytes coalesced into one write.
const MAX_WRITE_BATCH: usize = 64 * 1024;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Open,
    RequestClose,
    Closing,
    Closed,
}

/// How a transport error affects the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorDisposition {
    /// The operation was aborted because the socket is already closing.
    Ignore,
    /// The peer went away.
    PeerClosed,
    /// Anything else; logged once per connection.
    Failed,
}

pub(crate) fn classify_error(error: &io::Error) -> ErrorDisposition {
    match error.kind() {
        io::ErrorKind::Interrupted => ErrorDisposition::Ignore,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ErrorDisposition::PeerClosed,
        _ => ErrorDisposition::Failed,
    }
}

fn operation_aborted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "operation aborted")
}

struct ConnInner {
    state: ConnectionState,
    pending_reads: usize,
    pending_writes: usize,
    read_error: bool,
    write_error: bool,
    socket_open: bool,
    received_first: bool,
    protocol: Option<Arc<dyn Protocol>>,
    outgoing: Option<mpsc::UnboundedSender<OutputMessage>>,
}

/// A single client connection.
pub struct Connection {
    id: usize,
    peer: Option<SocketAddr>,
    context: Arc<ServerContext>,
    port: Arc<ServicePort>,
    inner: Mutex<ConnInner>,
    ref_count: AtomicUsize,
    log_error: AtomicBool,
    closed: watch::Sender<bool>,
}

enum ReadOutcome {
    Frame,
    TimedOut,
    Aborted,
    Failed(io::Error),
}

enum WriteOutcome {
    Written,
    TimedOut,
    Aborted,
    Failed(io::Error),
}

/// Read one length-prefixed frame into `msg`.
///
/// Frames longer than the message capacity are rejected as `InvalidData`
/// before any body byte is consumed.
pub(crate) async fn read_frame<R>(reader: &mut R, msg: &mut Message) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let len = u16::from_le_bytes(header) as usize;
    if len > msg.capacity() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {}", msg.capacity()),
        ));
    }
    reader.read_exact(&mut msg.buffer_mut()[..len]).await?;
    msg.set_message_length(len);
    Ok(len)
}

/// Append `body` to `out` as one wire frame.
pub(crate) fn encode_frame(out: &mut BytesMut, body: &[u8]) {
    out.reserve(FRAME_HEADER_SIZE + body.len());
    out.put_u16_le(body.len() as u16);
    out.put_slice(body);
}

impl Connection {
    pub(crate) fn new(
        id: usize,
        context: Arc<ServerContext>,
        port: Arc<ServicePort>,
        peer: Option<SocketAddr>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            context,
            port,
            inner: Mutex::new(ConnInner {
                state: ConnectionState::Open,
                pending_reads: 0,
                pending_writes: 0,
                read_error: false,
                write_error: false,
                socket_open: true,
                received_first: false,
                protocol: None,
                outgoing: None,
            }),
            ref_count: AtomicUsize::new(0),
            log_error: AtomicBool::new(true),
            closed: watch::channel(false).0,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn protocol(&self) -> Option<Arc<dyn Protocol>> {
        self.lock().protocol.clone()
    }

    pub fn pending_writes(&self) -> usize {
        self.lock().pending_writes
    }

    pub fn is_socket_open(&self) -> bool {
        self.lock().socket_open
    }

    pub fn add_ref(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn un_ref(&self) -> usize {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "connection reference count underflow");
        previous.saturating_sub(1)
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Start the writer and the read loop.
    ///
    /// A protocol supplied here (one that speaks first) is attached and its
    /// `on_connect` hook runs before the first read is issued.
    pub fn accept_connection(
        self: &Arc<Self>,
        reader: BoxedReader,
        writer: BoxedWriter,
        protocol: Option<Arc<dyn Protocol>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().outgoing = Some(tx);

        tokio::spawn(write_loop(
            Arc::downgrade(self),
            writer,
            rx,
            self.closed.subscribe(),
            self.context.settings().write_timeout,
            Arc::clone(self.context.output_pool()),
        ));

        if let Some(protocol) = protocol {
            self.lock().protocol = Some(Arc::clone(&protocol));
            protocol.on_connect();
        }

        tokio::spawn(Arc::clone(self).read_loop(reader));
    }

    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader) {
        let mut msg = Message::new();
        let mut closed = self.closed.subscribe();
        let read_timeout = self.context.settings().read_timeout;

        loop {
            {
                let mut inner = self.lock();
                if inner.state != ConnectionState::Open || inner.read_error || !inner.socket_open
                {
                    break;
                }
                inner.pending_reads += 1;
            }

            let outcome = tokio::select! {
                _ = closed.wait_for(|closed| *closed) => ReadOutcome::Aborted,
                outcome = read_with_timeout(&mut reader, &mut msg, read_timeout) => outcome,
            };

            match outcome {
                ReadOutcome::Frame => {}
                ReadOutcome::TimedOut => {
                    self.on_read_timeout();
                    break;
                }
                ReadOutcome::Aborted => {
                    self.handle_read_error(&operation_aborted());
                    break;
                }
                ReadOutcome::Failed(e) => {
                    self.handle_read_error(&e);
                    break;
                }
            }

            let proceed = {
                let mut inner = self.lock();
                inner.pending_reads = inner.pending_reads.saturating_sub(1);
                inner.state == ConnectionState::Open && !inner.read_error
            };
            if !proceed {
                self.close_connection();
                break;
            }

            trace!(conn_id = self.id, len = msg.message_length(), "Frame received");
            if !self.deliver(&mut msg) {
                break;
            }
        }
        trace!(conn_id = self.id, "Read loop finished");
    }

    /// Hand one message to the protocol, creating it on the first message.
    fn deliver(self: &Arc<Self>, msg: &mut Message) -> bool {
        let (first, protocol) = {
            let mut inner = self.lock();
            let first = !inner.received_first;
            inner.received_first = true;
            (first, inner.protocol.clone())
        };

        if !first {
            if let Some(protocol) = protocol {
                protocol.on_recv_message(msg);
            }
            return true;
        }

        let protocol = match protocol {
            Some(protocol) => protocol,
            None => {
                let Some(protocol) = self.port.make_protocol(self, msg) else {
                    debug!(conn_id = self.id, peer = ?self.peer, "No service matched first message");
                    self.close_connection();
                    return false;
                };

                let attached = {
                    let mut inner = self.lock();
                    if inner.state == ConnectionState::Open {
                        inner.protocol = Some(Arc::clone(&protocol));
                        true
                    } else {
                        false
                    }
                };
                if !attached {
                    protocol.base().set_connection(None);
                    release_protocol(protocol);
                    return false;
                }
                protocol
            }
        };

        protocol.on_recv_first_message(msg);
        true
    }

    /// Queue a message for writing.
    ///
    /// Returns false, recycling the buffer, unless the connection is open and
    /// no write error has occurred. When a write is already in flight the
    /// message is coalesced into the writer's next batch.
    pub fn send(&self, output: OutputMessage) -> bool {
        let queued = {
            let mut inner = self.lock();
            let writable = inner.state == ConnectionState::Open && !inner.write_error;
            match inner.outgoing.clone() {
                Some(outgoing) if writable => {
                    inner.pending_writes += 1;
                    Some((inner.protocol.clone(), outgoing, inner.pending_writes == 1))
                }
                _ => None,
            }
        };
        let Some((protocol, outgoing, immediate)) = queued else {
            self.context.output_pool().release(output);
            return false;
        };

        if let Some(protocol) = protocol {
            protocol.on_send_message(&output);
        }

        if !immediate {
            trace!(conn_id = self.id, len = output.len(), "Write pending, batching");
        }

        if let Err(mpsc::error::SendError(output)) = outgoing.send(output) {
            {
                let mut inner = self.lock();
                inner.pending_writes = inner.pending_writes.saturating_sub(1);
            }
            self.context.output_pool().release(output);
            return false;
        }
        true
    }

    /// Request teardown. Idempotent; safe from any thread.
    pub fn close_connection(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Open {
                return;
            }
            inner.state = ConnectionState::RequestClose;
        }
        trace!(conn_id = self.id, "Close requested");

        let connection = Arc::clone(self);
        let queued = self
            .context
            .dispatcher()
            .add_task(Task::new(move || connection.close_connection_task()), false);
        if !queued {
            debug!(conn_id = self.id, "Dispatcher not running, closing socket directly");
            self.close_socket();
        }
    }

    /// Detach the protocol and close the socket if no write is in flight.
    ///
    /// Runs on the dispatcher thread.
    pub fn close_connection_task(self: &Arc<Self>) {
        let (protocol, close_now) = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::RequestClose {
                error!(
                    conn_id = self.id,
                    state = ?inner.state,
                    "Close task run in unexpected state"
                );
                return;
            }
            let protocol = inner.protocol.take();
            inner.state = ConnectionState::Closing;
            (protocol, inner.pending_writes == 0 || inner.write_error)
        };

        if let Some(protocol) = protocol {
            protocol.base().set_connection(None);
            release_protocol(protocol);
        }

        if close_now {
            self.close_socket();
            self.finish_close();
        } else {
            trace!(conn_id = self.id, "Close deferred until pending write completes");
        }
    }

    fn finish_close(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Closing {
                return;
            }
            inner.state = ConnectionState::Closed;
        }
        debug!(conn_id = self.id, peer = ?self.peer, "Connection closed");
        self.release_connection();
    }

    fn schedule_finish_close(self: &Arc<Self>) {
        let connection = Arc::clone(self);
        let queued = self
            .context
            .dispatcher()
            .add_task(Task::new(move || connection.finish_close()), false);
        if !queued {
            self.finish_close();
        }
    }

    /// Shut the socket down. Both I/O tasks observe the signal and exit.
    fn close_socket(&self) {
        {
            let mut inner = self.lock();
            if !inner.socket_open {
                return;
            }
            inner.socket_open = false;
            inner.pending_reads = 0;
            inner.pending_writes = 0;
            inner.outgoing = None;
        }
        self.closed.send_replace(true);
        trace!(conn_id = self.id, "Socket closed");
    }

    /// Remove the connection from the registry once unreferenced.
    pub fn release_connection(self: &Arc<Self>) {
        if self.ref_count() > 0 {
            trace!(
                conn_id = self.id,
                refs = self.ref_count(),
                "Connection still referenced, retrying release"
            );
            let connection = Arc::clone(self);
            let event = self.context.scheduler().add_event(
                SCHEDULER_MIN_TICKS,
                Task::new(move || connection.release_connection()),
            );
            if event != 0 {
                return;
            }
            warn!(
                conn_id = self.id,
                "Scheduler not running, releasing referenced connection"
            );
        }

        if self.context.connections().remove(self).is_some() {
            trace!(conn_id = self.id, "Connection released");
        }
    }

    fn log_once(&self, what: &str, error: &io::Error) {
        if self.log_error.swap(false, Ordering::AcqRel) {
            warn!(conn_id = self.id, peer = ?self.peer, error = %error, "{what} failed");
        }
    }

    pub(crate) fn handle_read_error(self: &Arc<Self>, error: &io::Error) {
        match classify_error(error) {
            ErrorDisposition::Ignore => {}
            ErrorDisposition::PeerClosed => {
                trace!(conn_id = self.id, error = %error, "Peer closed while reading");
                self.close_connection();
            }
            ErrorDisposition::Failed => {
                self.log_once("Reading", error);
                self.close_connection();
            }
        }
        self.lock().read_error = true;
    }

    pub(crate) fn handle_write_error(self: &Arc<Self>, error: &io::Error) {
        match classify_error(error) {
            ErrorDisposition::Ignore => {}
            ErrorDisposition::PeerClosed => {
                trace!(conn_id = self.id, error = %error, "Peer closed while writing");
                self.close_connection();
            }
            ErrorDisposition::Failed => {
                self.log_once("Writing", error);
                self.close_connection();
            }
        }
        self.lock().write_error = true;
    }

    /// Completion of a write batch of `count` messages.
    fn on_write_operation(self: &Arc<Self>, count: usize, error: Option<io::Error>) {
        if let Some(error) = error {
            self.handle_write_error(&error);
        }

        let (close, finish) = {
            let mut inner = self.lock();
            inner.pending_writes = inner.pending_writes.saturating_sub(count);
            let close = inner.write_error
                || (inner.state != ConnectionState::Open && inner.pending_writes == 0);
            (close, inner.state == ConnectionState::Closing)
        };

        if close {
            self.close_socket();
            self.close_connection();
            if finish {
                self.schedule_finish_close();
            }
        }
    }

    fn on_write_timeout(self: &Arc<Self>) {
        let (close, finish) = {
            let inner = self.lock();
            (
                inner.pending_writes > 0 || inner.write_error,
                inner.state == ConnectionState::Closing,
            )
        };
        if close {
            warn!(conn_id = self.id, peer = ?self.peer, "Write timed out");
            self.close_socket();
            self.close_connection();
            if finish {
                self.schedule_finish_close();
            }
        }
    }

    fn on_read_timeout(self: &Arc<Self>) {
        let (close, finish) = {
            let inner = self.lock();
            (
                inner.pending_reads > 0 || inner.read_error,
                inner.state == ConnectionState::Closing,
            )
        };
        if close {
            debug!(conn_id = self.id, peer = ?self.peer, "Read timed out");
            self.close_socket();
            self.close_connection();
            if finish {
                self.schedule_finish_close();
            }
        }
    }
}

async fn read_with_timeout(
    reader: &mut BoxedReader,
    msg: &mut Message,
    timeout: Option<Duration>,
) -> ReadOutcome {
    let result = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, read_frame(reader, msg)).await {
            Ok(result) => result,
            Err(_) => return ReadOutcome::TimedOut,
        },
        None => read_frame(reader, msg).await,
    };
    match result {
        Ok(_) => ReadOutcome::Frame,
        Err(e) => ReadOutcome::Failed(e),
    }
}

/// Drain the outgoing queue, coalescing queued messages into one write.
///
/// Holds only a weak reference: if the connection is gone by the time a
/// write completes or times out, the writer just exits.
async fn write_loop(
    connection: Weak<Connection>,
    mut writer: BoxedWriter,
    mut outgoing: mpsc::UnboundedReceiver<OutputMessage>,
    mut closed: watch::Receiver<bool>,
    write_timeout: Duration,
    pool: Arc<OutputMessagePool>,
) {
    let mut batch = BytesMut::with_capacity(MAX_WRITE_BATCH);

    loop {
        let first = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => break,
            output = outgoing.recv() => match output {
                Some(output) => output,
                None => break,
            },
        };

        encode_frame(&mut batch, first.message().as_bytes());
        pool.release(first);
        let mut count = 1;
        while batch.len() < MAX_WRITE_BATCH {
            let Ok(output) = outgoing.try_recv() else {
                break;
            };
            encode_frame(&mut batch, output.message().as_bytes());
            pool.release(output);
            count += 1;
        }

        let outcome = tokio::select! {
            _ = closed.wait_for(|closed| *closed) => WriteOutcome::Aborted,
            result = tokio::time::timeout(write_timeout, async {
                writer.write_all(&batch).await?;
                writer.flush().await
            }) => match result {
                Ok(Ok(())) => WriteOutcome::Written,
                Ok(Err(e)) => WriteOutcome::Failed(e),
                Err(_) => WriteOutcome::TimedOut,
            },
        };
        let written = batch.len();
        batch.clear();

        let Some(conn) = connection.upgrade() else {
            break;
        };
        match outcome {
            WriteOutcome::Written => {
                trace!(conn_id = conn.id, bytes = written, count, "Write complete");
                conn.on_write_operation(count, None);
            }
            WriteOutcome::Failed(e) => conn.on_write_operation(count, Some(e)),
            WriteOutcome::TimedOut => {
                conn.on_write_timeout();
                break;
            }
            WriteOutcome::Aborted => break,
        }
    }

    let _ = writer.shutdown().await;
}

/// Counted handle that keeps a connection from being released.
///
/// Tasks that touch a connection after a delay hold one of these; the
/// connection's release retries until every handle is dropped.
pub struct ConnectionRef(Arc<Connection>);

impl ConnectionRef {
    pub fn new(connection: &Arc<Connection>) -> Self {
        connection.add_ref();
        Self(Arc::clone(connection))
    }
}

impl Deref for ConnectionRef {
    type Target = Arc<Connection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ConnectionRef {
    fn drop(&mut self) {
        self.0.un_ref();
    }
}

/// Registry of live connections using slab allocation.
///
/// The registry is the one owner that keeps a connection alive; everything
/// else holds a clone only for the duration of a task or a weak handle.
pub struct ConnectionRegistry {
    connections: Mutex<Slab<Arc<Connection>>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Mutex::new(Slab::with_capacity(max_connections.min(4096))),
            max_connections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slab<Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a connection built from its new id.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert_with<F>(&self, make: F) -> Option<Arc<Connection>>
    where
        F: FnOnce(usize) -> Arc<Connection>,
    {
        let mut connections = self.lock();
        if connections.len() >= self.max_connections {
            return None;
        }
        let entry = connections.vacant_entry();
        let connection = make(entry.key());
        entry.insert(Arc::clone(&connection));
        Some(connection)
    }

    /// Remove `connection` if it still occupies its slot.
    pub fn remove(&self, connection: &Connection) -> Option<Arc<Connection>> {
        let mut connections = self.lock();
        let same = connections
            .get(connection.id())
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), connection));
        if same {
            Some(connections.remove(connection.id()))
        } else {
            None
        }
    }

    pub fn contains(&self, id: usize) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Clone out every live connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().iter().map(|(_, c)| Arc::clone(c)).collect()
    }

    /// Request close on every live connection.
    pub fn close_all(&self) {
        for connection in self.snapshot() {
            connection.close_connection();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_error_classification() {
        let kinds = [
            (io::ErrorKind::Interrupted, ErrorDisposition::Ignore),
            (io::ErrorKind::UnexpectedEof, ErrorDisposition::PeerClosed),
            (io::ErrorKind::ConnectionReset, ErrorDisposition::PeerClosed),
            (io::ErrorKind::ConnectionAborted, ErrorDisposition::PeerClosed),
            (io::ErrorKind::BrokenPipe, ErrorDisposition::PeerClosed),
            (io::ErrorKind::InvalidData, ErrorDisposition::Failed),
            (io::ErrorKind::PermissionDenied, ErrorDisposition::Failed),
        ];
        for (kind, expected) in kinds {
            assert_eq!(classify_error(&io::Error::from(kind)), expected, "{kind:?}");
        }
        assert_eq!(classify_error(&operation_aborted()), ErrorDisposition::Ignore);
    }

    #[test]
    fn test_state_ordering() {
        assert!(ConnectionState::Open < ConnectionState::RequestClose);
        assert!(ConnectionState::RequestClose < ConnectionState::Closing);
        assert!(ConnectionState::Closing < ConnectionState::Closed);
    }

    #[test]
    fn test_encode_frame() {
        let mut out = BytesMut::new();
        encode_frame(&mut out, b"abc");
        encode_frame(&mut out, b"");
        assert_eq!(&out[..], &[3, 0, b'a', b'b', b'c', 0, 0]);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let mut reader = Builder::new()
            .read(&[5])
            .read(&[0, b'h', b'e'])
            .read(b"llo")
            .build();
        let mut msg = Message::new();
        let len = read_frame(&mut reader, &mut msg).await.unwrap();
        assert_eq!(len, 5);
        assert_eq!(msg.get_raw(), b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut reader = Builder::new().read(&[0xFF, 0xFF]).build();
        let mut msg = Message::with_capacity(16);
        let err = read_frame(&mut reader, &mut msg).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(classify_error(&err), ErrorDisposition::Failed);
    }

    #[tokio::test]
    async fn test_read_frame_eof_mid_body() {
        let mut reader = Builder::new().read(&[4, 0, 1, 2]).build();
        let mut msg = Message::new();
        let err = read_frame(&mut reader, &mut msg).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(classify_error(&err), ErrorDisposition::PeerClosed);
    }
}
