//! Connection state
//!
//! A `Connection` owns one transport for its whole lifetime, together with
//! the read-ahead buffer holding bytes received past the current request
//! (pipelined requests) and the keep-alive decision for the exchange in
//! progress.

use super::{Headers, HttpSession, Result, Status, Version};
use bytes::{Buf, BytesMut};
use log::{debug, trace};
use std::fmt;
use std::time::Duration;

const READ_CHUNK: usize = 4096;

/// Why a connection will close after the current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// HTTP/1.0 request without `Connection: keep-alive`
    Http10,
    /// The client sent `Connection: close`
    ClientRequested,
    /// The application set `Connection: close`
    ApplicationRequested,
    /// The response status always closes
    ClosingStatus(u16),
    /// `maxKeepAliveRequests` reached
    MaxKeepAliveRequests,
    /// Request body left unread beyond the swallow budget
    UnreadBody,
    /// The response body is delimited by the close
    CloseDelimited,
    /// Response body shorter than its declared length
    IncompleteResponse,
    /// Protocol or I/O error during the exchange
    Error,
    /// Async exchange timed out
    AsyncTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Http10 => write!(f, "HTTP/1.0 without keep-alive"),
            CloseReason::ClientRequested => write!(f, "client requested close"),
            CloseReason::ApplicationRequested => write!(f, "application requested close"),
            CloseReason::ClosingStatus(code) => write!(f, "status {} closes", code),
            CloseReason::MaxKeepAliveRequests => write!(f, "max keep-alive requests reached"),
            CloseReason::UnreadBody => write!(f, "request body not consumed"),
            CloseReason::CloseDelimited => write!(f, "close-delimited response"),
            CloseReason::IncompleteResponse => write!(f, "response shorter than Content-Length"),
            CloseReason::Error => write!(f, "error"),
            CloseReason::AsyncTimeout => write!(f, "async timeout"),
        }
    }
}

/// A client connection
pub struct Connection {
    id: u64,
    session: HttpSession,
    read_buf: BytesMut,
    close_reason: Option<CloseReason>,
    remaining: Option<u32>,
    served: u32,
}

impl Connection {
    /// Create a connection allowing `max_requests` exchanges (`None` for
    /// unlimited)
    pub fn new(id: u64, session: HttpSession, max_requests: Option<u32>) -> Self {
        Connection {
            id,
            session,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            close_reason: None,
            remaining: max_requests,
            served: 0,
        }
    }

    /// Connection id, used in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of requests started on this connection
    pub fn requests_served(&self) -> u32 {
        self.served
    }

    /// Set the timeout for subsequent reads and writes
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.read_buf
    }

    /// Discard `n` bytes from the front of the read-ahead buffer
    pub fn consume(&mut self, n: usize) {
        self.read_buf.advance(n);
    }

    /// Read more bytes into the read-ahead buffer
    ///
    /// Returns the number of bytes added; 0 means the peer closed.
    pub fn fill(&mut self) -> Result<usize> {
        let start = self.read_buf.len();
        self.read_buf.resize(start + READ_CHUNK, 0);

        let result = self.session.read(&mut self.read_buf[start..]);
        let n = *result.as_ref().unwrap_or(&0);
        self.read_buf.truncate(start + n);

        trace!("conn {}: read {} bytes", self.id, n);
        result
    }

    /// Write bytes to the peer
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        trace!("conn {}: write {} bytes", self.id, buf.len());
        self.session.write_all(buf)
    }

    /// Start a new exchange and apply the request-side keep-alive rules
    pub fn begin_request(&mut self, version: Version, headers: &Headers) {
        self.served += 1;

        match version {
            Version::Http10 if !headers.has_token("Connection", "keep-alive") => {
                self.close_after(CloseReason::Http10)
            }
            _ if headers.has_token("Connection", "close") => {
                self.close_after(CloseReason::ClientRequested)
            }
            _ => {}
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.close_after(CloseReason::MaxKeepAliveRequests);
            }
        }
    }

    /// Apply the response-side keep-alive rules
    pub fn apply_response(&mut self, status: Status, application_close: bool) {
        if status.forces_close() {
            self.close_after(CloseReason::ClosingStatus(status.code()));
        } else if application_close {
            self.close_after(CloseReason::ApplicationRequested);
        }
    }

    /// Mark the connection to close once the current exchange is done
    ///
    /// The first reason recorded is kept.
    pub fn close_after(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            debug!("conn {}: will close ({})", self.id, reason);
            self.close_reason = Some(reason);
        }
    }

    /// Whether the connection stays open after the current exchange
    pub fn is_keep_alive(&self) -> bool {
        self.close_reason.is_none()
    }

    /// Why the connection will close, if it will
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Close the transport
    pub fn close(&mut self) {
        if !self.session.is_closed() {
            debug!("conn {}: closing", self.id);
            if let Err(e) = self.session.close() {
                trace!("conn {}: close failed: {}", self.id, e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
