//! Per-connection protocol engine.
//!
//! Each connection owns its socket, a receive buffer of bytes not yet framed,
//! a transmit buffer of bytes not yet accepted by the socket, and the table
//! of framed requests still waiting for a response. All I/O is a single
//! non-blocking attempt per readiness notification; anything left over stays
//! buffered until the reactor reports the socket ready again.

use crate::protocols::xmlrpc::{self, ParseResult};
use crate::runtime::{CloseReason, ConnectionId, RequestHandler, RequestId, ResponseError};
use bytes::{Buf, Bytes, BytesMut};
use mio::Interest;
use slab::Slab;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use tracing::{debug, trace};

/// Bytes requested from the socket per readable event.
pub const DEFAULT_READ_CHUNK: usize = 8000;

/// Byte stream a connection can drive.
pub trait Stream: Read + Write {
    /// Pending socket error, if the stream can report one.
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }
}

impl Stream for mio::net::TcpStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }
}

/// Readiness reported by the poller for one socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub exception: bool,
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub fn from_event(event: &mio::event::Event) -> Self {
        Self {
            exception: event.is_error(),
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// A single client connection.
pub struct Connection<S> {
    id: ConnectionId,
    stream: S,
    /// Received bytes not yet consumed into a frame.
    rx: BytesMut,
    /// Queued bytes not yet accepted by the socket.
    tx: BytesMut,
    /// Raw envelope of each framed request awaiting a response.
    requests: HashMap<RequestId, Bytes>,
    next_request_id: RequestId,
    /// Scratch space for a single read.
    scratch: Vec<u8>,
}

impl<S: Stream> Connection<S> {
    /// Wrap a connected stream, assigning it a fresh connection id.
    pub fn new(stream: S, read_chunk: usize) -> Self {
        Self {
            id: ConnectionId::allocate(),
            stream,
            rx: BytesMut::new(),
            tx: BytesMut::new(),
            requests: HashMap::new(),
            next_request_id: RequestId::FIRST,
            scratch: vec![0u8; read_chunk.max(1)],
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Interest to register before the next poll.
    ///
    /// Always readable; writable only while there is queued output.
    pub fn interest(&self) -> Interest {
        if self.tx.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    /// Bytes waiting to be written.
    pub fn pending_output(&self) -> &[u8] {
        &self.tx
    }

    /// Bytes received but not yet framed.
    pub fn buffered_input(&self) -> &[u8] {
        &self.rx
    }

    /// Number of request envelopes retained for correlation.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// React to one readiness notification.
    ///
    /// An exceptional condition closes the connection without any I/O. A
    /// failed read closes it without attempting the write.
    pub fn dispatch<H>(&mut self, readiness: Readiness, handler: &mut H) -> Result<(), CloseReason>
    where
        H: RequestHandler + ?Sized,
    {
        if readiness.exception {
            let error = self.stream.take_error().unwrap_or_else(Some);
            debug!(conn_id = %self.id, error = ?error, "Exception on socket");
            return Err(CloseReason::Exception { error });
        }

        if readiness.readable {
            self.on_readable(handler)?;
        }

        if readiness.writable && !self.tx.is_empty() {
            self.on_writable()?;
        }

        Ok(())
    }

    /// Perform one bounded read, then attempt to frame one message.
    pub fn on_readable<H>(&mut self, handler: &mut H) -> Result<(), CloseReason>
    where
        H: RequestHandler + ?Sized,
    {
        match self.stream.read(&mut self.scratch) {
            Ok(0) => {
                debug!(conn_id = %self.id, "Connection closed by peer");
                return Err(CloseReason::PeerClosed);
            }
            Ok(n) => {
                trace!(conn_id = %self.id, bytes = n, "Read");
                self.rx.extend_from_slice(&self.scratch[..n]);
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(conn_id = %self.id, error = %e, "Read failed");
                return Err(CloseReason::Io(e));
            }
        }

        self.try_parse(handler);
        Ok(())
    }

    /// Write as much queued output as the socket accepts in one call.
    pub fn on_writable(&mut self) -> Result<(), CloseReason> {
        if self.tx.is_empty() {
            return Ok(());
        }

        match self.stream.write(&self.tx) {
            Ok(0) => {
                debug!(conn_id = %self.id, "Write accepted no bytes");
                Err(CloseReason::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned 0",
                )))
            }
            Ok(n) if n >= self.tx.len() => {
                trace!(conn_id = %self.id, bytes = n, "Wrote it all");
                self.tx.clear();
                Ok(())
            }
            Ok(n) => {
                self.tx.advance(n);
                trace!(conn_id = %self.id, bytes = n, remaining = self.tx.len(), "Partial write");
                Ok(())
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(())
            }
            Err(e) => {
                debug!(conn_id = %self.id, error = %e, "Write failed");
                Err(CloseReason::Io(e))
            }
        }
    }

    /// Frame at most one message from the receive buffer.
    ///
    /// A second complete message already sitting in the buffer waits for the
    /// next readable event.
    fn try_parse<H>(&mut self, handler: &mut H)
    where
        H: RequestHandler + ?Sized,
    {
        let (frame_len, consumed) = match xmlrpc::parse(&self.rx) {
            ParseResult::Complete {
                frame_len,
                consumed,
            } => (frame_len, consumed),
            ParseResult::Incomplete => return,
        };

        let frame = self.rx.split_to(consumed).freeze().slice(..frame_len);
        let request_id = self.next_request_id;
        self.requests.insert(request_id, frame.clone());

        trace!(conn_id = %self.id, request_id = %request_id, bytes = frame_len, "Framed request");
        handler.on_request(self.id, request_id, &frame);
        self.next_request_id = request_id.next();
    }

    /// Queue a response for `request_id`, keeping the request for further
    /// responses.
    pub fn send_response(&mut self, request_id: RequestId, body: &[u8]) -> Result<(), ResponseError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(ResponseError::UnknownRequest(request_id))?;
        let envelope = xmlrpc::splice(request, body);
        self.tx.extend_from_slice(&envelope);
        Ok(())
    }

    /// Queue the last response for `request_id` and forget the request.
    pub fn send_final_response(
        &mut self,
        request_id: RequestId,
        body: &[u8],
    ) -> Result<(), ResponseError> {
        let request = self
            .requests
            .remove(&request_id)
            .ok_or(ResponseError::UnknownRequest(request_id))?;
        let envelope = xmlrpc::splice(&request, body);
        self.tx.extend_from_slice(&envelope);
        Ok(())
    }

    /// Queue an unsolicited payload as-is.
    pub fn send_event(&mut self, body: &[u8]) {
        self.tx.extend_from_slice(body);
    }
}

/// Registry of live connections.
///
/// Slab keys double as mio tokens. Connection ids map back to their slab
/// key so responses can be routed by id; a removed connection's id is never
/// handed out again even when its slab slot is reused.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    keys: HashMap<ConnectionId, usize>,
    max_connections: usize,
}

impl<S: Stream> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            keys: HashMap::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let id = conn.id();
        let key = self.connections.insert(conn);
        self.keys.insert(id, key);
        Some(key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(key)
    }

    /// Look up a connection by its id.
    pub fn get_by_id_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        let key = *self.keys.get(&id)?;
        self.connections.get_mut(key)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, key: usize) -> Option<Connection<S>> {
        let conn = self.connections.try_remove(key)?;
        self.keys.remove(&conn.id());
        Some(conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Iterate over all connections mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection<S>)> {
        self.connections.iter_mut()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    struct ChunkedStream {
        chunks: std::collections::VecDeque<Vec<u8>>,
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ChunkedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Stream for ChunkedStream {}

    const MESSAGE: &[u8] =
        b"\r\n <ClickToCall>\r\n  <Request>\r\n    <Initiate from=\"a\" to=\"b\"/>\r\n  </Request>\r\n</ClickToCall>";

    proptest! {
        #[test]
        fn fragmentation_yields_one_identical_frame(sizes in prop::collection::vec(1usize..16, 1..64)) {
            let mut chunks = std::collections::VecDeque::new();
            let mut rest = MESSAGE;
            let mut sizes = sizes.iter().cycle();
            while !rest.is_empty() {
                let n = (*sizes.next().unwrap()).min(rest.len());
                chunks.push_back(rest[..n].to_vec());
                rest = &rest[n..];
            }
            let reads = chunks.len();

            let mut conn = Connection::new(ChunkedStream { chunks }, 8000);
            let mut seen: Vec<Vec<u8>> = Vec::new();
            let mut handler = |_: ConnectionId, _: RequestId, msg: &[u8]| seen.push(msg.to_vec());

            for _ in 0..reads {
                prop_assert!(conn.on_readable(&mut handler).is_ok());
            }

            prop_assert_eq!(seen.len(), 1);
            prop_assert_eq!(seen[0].as_slice(), MESSAGE);
            prop_assert!(conn.buffered_input().is_empty());
        }

        #[test]
        fn partial_writes_transmit_exact_bytes(budgets in prop::collection::vec(1usize..8, 1..32)) {
            struct Limited {
                budgets: std::collections::VecDeque<usize>,
                written: Vec<u8>,
            }
            impl Read for Limited {
                fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                    Err(io::ErrorKind::WouldBlock.into())
                }
            }
            impl Write for Limited {
                fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                    let n = self.budgets.pop_front().unwrap_or(buf.len()).min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                fn flush(&mut self) -> io::Result<()> {
                    Ok(())
                }
            }
            impl Stream for Limited {}

            let stream = Limited { budgets: budgets.iter().copied().collect(), written: Vec::new() };
            let mut conn = Connection::new(stream, 8000);
            conn.send_event(MESSAGE);

            for _ in 0..=budgets.len() {
                prop_assert!(conn.on_writable().is_ok());
            }

            prop_assert!(conn.pending_output().is_empty());
            prop_assert_eq!(conn.stream_mut().written.as_slice(), MESSAGE);
        }
    }
}
