//! Application-facing hooks.
//!
//! The reactor hands every framed request to a [`RequestHandler`]. The
//! handler may answer right away through
//! [`Server::submit_response`](crate::runtime::Server::submit_response), or
//! later and from any thread through a [`ResponseSender`], which queues the
//! response and wakes the reactor so it can splice and write it.

use crate::protocols::xmlrpc;
use crate::runtime::{ConnectionId, RequestId, SubmitError};
use bytes::Bytes;
use mio::Waker;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::debug;

/// Receives framed requests.
///
/// Called synchronously on the reactor thread while a connection is being
/// processed, so implementations must not block.
pub trait RequestHandler {
    fn on_request(&mut self, connection_id: ConnectionId, request_id: RequestId, message: &[u8]);
}

impl<F> RequestHandler for F
where
    F: FnMut(ConnectionId, RequestId, &[u8]),
{
    fn on_request(&mut self, connection_id: ConnectionId, request_id: RequestId, message: &[u8]) {
        self(connection_id, request_id, message)
    }
}

/// Where an unsolicited event is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Connection(ConnectionId),
    /// Every live connection.
    Broadcast,
}

/// Work queued for the reactor by a [`ResponseSender`].
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    Response {
        connection_id: ConnectionId,
        request_id: RequestId,
        body: Bytes,
        is_final: bool,
    },
    Event {
        target: EventTarget,
        body: Bytes,
    },
}

/// Cloneable handle for submitting responses from outside the reactor.
#[derive(Clone)]
pub struct ResponseSender {
    queue: Sender<Outbound>,
    waker: Arc<Waker>,
}

impl ResponseSender {
    pub(crate) fn new(queue: Sender<Outbound>, waker: Arc<Waker>) -> Self {
        Self { queue, waker }
    }

    /// Queue a response, keeping the request open for further responses.
    pub fn send_response(
        &self,
        connection_id: ConnectionId,
        request_id: RequestId,
        body: impl Into<Bytes>,
    ) -> Result<(), SubmitError> {
        self.submit(Outbound::Response {
            connection_id,
            request_id,
            body: body.into(),
            is_final: false,
        })
    }

    /// Queue the last response for a request.
    pub fn send_final_response(
        &self,
        connection_id: ConnectionId,
        request_id: RequestId,
        body: impl Into<Bytes>,
    ) -> Result<(), SubmitError> {
        self.submit(Outbound::Response {
            connection_id,
            request_id,
            body: body.into(),
            is_final: true,
        })
    }

    /// Queue an unsolicited event.
    pub fn send_event(&self, target: EventTarget, body: impl Into<Bytes>) -> Result<(), SubmitError> {
        self.submit(Outbound::Event {
            target,
            body: body.into(),
        })
    }

    fn submit(&self, item: Outbound) -> Result<(), SubmitError> {
        self.queue.send(item).map_err(|_| SubmitError::ReactorGone)?;
        self.waker.wake().map_err(SubmitError::Wake)
    }
}

/// Answers every request with its own payload.
///
/// Useful for smoke testing a deployment: a client sending
/// `<Request>ping</Request>` gets back
/// `<Request>ping</Request>\r\n  <Response>ping</Response>\r\n`.
pub struct EchoHandler {
    sender: ResponseSender,
}

impl EchoHandler {
    pub fn new(sender: ResponseSender) -> Self {
        Self { sender }
    }
}

impl RequestHandler for EchoHandler {
    fn on_request(&mut self, connection_id: ConnectionId, request_id: RequestId, message: &[u8]) {
        let body = echo_body(message);
        if let Err(e) = self
            .sender
            .send_final_response(connection_id, request_id, Bytes::copy_from_slice(body))
        {
            debug!(conn_id = %connection_id, request_id = %request_id, error = %e, "Echo response dropped");
        }
    }
}

/// Contents of the `<Request>` element when present, otherwise the payload
/// of the outer tag.
fn echo_body(message: &[u8]) -> &[u8] {
    let inner = xmlrpc::payload(message).unwrap_or(message);
    match xmlrpc::payload(inner) {
        Some(nested) if inner.trim_ascii_start().starts_with(b"<Request>") => nested,
        _ => inner,
    }
}
