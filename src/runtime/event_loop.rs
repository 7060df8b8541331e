//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Every connection is reregistered with its current interest before each
//! poll. Reregistration re-arms mio's edge-triggered notifications, so a
//! socket that is still readable (or a connection that just queued output)
//! is reported again on the next poll, the same way a select-style loop
//! would rebuild its descriptor sets each round.

use crate::config::Config;
use crate::runtime::handler::Outbound;
use crate::runtime::{
    CloseReason, Connection, ConnectionId, ConnectionRegistry, EventTarget, Readiness,
    RequestHandler, RequestId, ResponseSender, SubmitError,
};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Listener backlog.
const BACKLOG: i32 = 1024;

/// Single-threaded reactor owning the listener and every live connection.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    waker: Arc<Waker>,
    outbound_tx: Sender<Outbound>,
    outbound_rx: Receiver<Outbound>,
    connections: ConnectionRegistry<TcpStream>,
    read_chunk: usize,
}

impl Server {
    /// Bind the listener and set up the poller.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(config.listen)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (outbound_tx, outbound_rx) = mpsc::channel();

        info!(
            addr = %local_addr,
            max_connections = config.max_connections,
            read_chunk = config.read_chunk,
            "Server listening"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            listener,
            local_addr,
            waker,
            outbound_tx,
            outbound_rx,
            connections: ConnectionRegistry::new(config.max_connections),
            read_chunk: config.read_chunk,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for answering requests from outside the reactor thread.
    pub fn response_sender(&self) -> ResponseSender {
        ResponseSender::new(self.outbound_tx.clone(), Arc::clone(&self.waker))
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the reactor until polling fails.
    pub fn run<H>(&mut self, handler: &mut H) -> io::Result<()>
    where
        H: RequestHandler + ?Sized,
    {
        loop {
            self.run_once(handler, None)?;
        }
    }

    /// One reactor round: declare interest, poll, dispatch, apply queued
    /// responses.
    pub fn run_once<H>(&mut self, handler: &mut H, timeout: Option<Duration>) -> io::Result<()>
    where
        H: RequestHandler + ?Sized,
    {
        self.declare_interest();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<(Token, Readiness)> = self
            .events
            .iter()
            .map(|event| (event.token(), Readiness::from_event(event)))
            .collect();

        // Accept after dispatching so a freed slab slot is not reused by a
        // new connection while stale events for it are still pending.
        let mut accept = false;
        for (token, readiness) in ready {
            match token {
                LISTENER_TOKEN => accept = true,
                WAKER_TOKEN => {}
                Token(key) => self.dispatch(key, readiness, handler),
            }
        }

        if accept {
            self.accept_connections();
        }

        self.drain_outbound();
        Ok(())
    }

    /// Queue a response, keeping the request open for further responses.
    pub fn submit_response(
        &mut self,
        connection_id: ConnectionId,
        request_id: RequestId,
        body: &[u8],
    ) -> Result<(), SubmitError> {
        self.connections
            .get_by_id_mut(connection_id)
            .ok_or(SubmitError::UnknownConnection(connection_id))?
            .send_response(request_id, body)
            .map_err(|e| SubmitError::on_connection(connection_id, e))
    }

    /// Queue the last response for a request and release its envelope.
    pub fn submit_final_response(
        &mut self,
        connection_id: ConnectionId,
        request_id: RequestId,
        body: &[u8],
    ) -> Result<(), SubmitError> {
        self.connections
            .get_by_id_mut(connection_id)
            .ok_or(SubmitError::UnknownConnection(connection_id))?
            .send_final_response(request_id, body)
            .map_err(|e| SubmitError::on_connection(connection_id, e))
    }

    /// Queue an unsolicited event. Returns the number of connections reached.
    pub fn send_event(&mut self, target: EventTarget, body: &[u8]) -> usize {
        match target {
            EventTarget::Connection(id) => match self.connections.get_by_id_mut(id) {
                Some(conn) => {
                    conn.send_event(body);
                    1
                }
                None => 0,
            },
            EventTarget::Broadcast => {
                let mut reached = 0;
                for (_, conn) in self.connections.iter_mut() {
                    conn.send_event(body);
                    reached += 1;
                }
                reached
            }
        }
    }

    fn declare_interest(&mut self) {
        let registry = self.poll.registry();
        let mut failed = Vec::new();

        for (key, conn) in self.connections.iter_mut() {
            let interest = conn.interest();
            if let Err(e) = registry.reregister(conn.stream_mut(), Token(key), interest) {
                failed.push((key, e));
            }
        }

        for (key, e) in failed {
            self.close_connection(key, CloseReason::Io(e));
        }
    }

    fn dispatch<H>(&mut self, key: usize, readiness: Readiness, handler: &mut H)
    where
        H: RequestHandler + ?Sized,
    {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        if let Err(reason) = conn.dispatch(readiness, handler) {
            self.close_connection(key, reason);
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    if self.connections.len() >= self.connections.capacity() {
                        warn!(peer = %peer_addr, "Connection limit reached");
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let conn = Connection::new(stream, self.read_chunk);
                    let conn_id = conn.id();
                    let Some(key) = self.connections.insert(conn) else {
                        continue;
                    };

                    // Re-borrow after insert
                    let Some(conn) = self.connections.get_mut(key) else {
                        continue;
                    };
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(conn.stream_mut(), Token(key), Interest::READABLE)
                    {
                        warn!(conn_id = %conn_id, error = %e, "Failed to register connection");
                        self.connections.remove(key);
                        continue;
                    }

                    debug!(conn_id = %conn_id, peer = %peer_addr, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Apply responses and events queued through `ResponseSender`.
    fn drain_outbound(&mut self) {
        while let Ok(item) = self.outbound_rx.try_recv() {
            match item {
                Outbound::Response {
                    connection_id,
                    request_id,
                    body,
                    is_final,
                } => {
                    let result = if is_final {
                        self.submit_final_response(connection_id, request_id, &body)
                    } else {
                        self.submit_response(connection_id, request_id, &body)
                    };
                    if let Err(e) = result {
                        debug!(error = %e, "Dropping queued response");
                    }
                }
                Outbound::Event { target, body } => {
                    let reached = self.send_event(target, &body);
                    trace!(?target, reached, "Queued event");
                }
            }
        }
    }

    /// Deregister and drop a connection, closing its socket.
    fn close_connection(&mut self, key: usize, reason: CloseReason) {
        if let Some(mut conn) = self.connections.remove(key) {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            debug!(conn_id = %conn.id(), reason = %reason, "Connection closed");
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
