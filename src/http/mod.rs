//! HTTP/1.1 processor implementation
//!
//! This module contains the wire codec, the per-connection state machine,
//! the request processor and its recycler, and the async bridge.
//!
//! # Architecture
//!
//! Bytes flow through the layers as follows:
//!
//! - `SessionOps` abstracts the transport (poll, read, write, close)
//! - `Connection` owns one transport, its read-ahead buffer and the
//!   keep-alive bookkeeping
//! - `Processor` reads a request head through the `parser`, chooses the
//!   request body framing (`framing`), dispatches to a `Handler` through an
//!   `Exchange`, and serializes the `Response` with the framing chosen at
//!   commit time
//! - `ProcessorPool` recycles processors between connections, scrubbing all
//!   request state on the way back in
//! - `AsyncContext` lets a handler finish the exchange later from another
//!   thread without holding a worker

pub mod async_context;
pub mod chunked;
pub mod client;
pub mod connection;
pub mod cookie;
pub mod exchange;
pub mod framing;
pub mod headers;
pub mod message;
pub mod parser;
pub mod pool;
pub mod processor;
pub mod request;
pub mod response;
pub mod session;

pub use async_context::AsyncContext;
pub use client::{ClientResponse, HttpClient};
pub use connection::{CloseReason, Connection};
pub use cookie::Cookie;
pub use exchange::{Exchange, Handler};
pub use framing::{RequestFraming, ResponseFraming};
pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use parser::{RequestHead, RequestParser, ResponseHead};
pub use pool::{PooledProcessor, ProcessorPool};
pub use processor::{Processor, ProcessorState, SocketState};
pub use request::Request;
pub use response::Response;
pub use session::{HttpSession, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Request header block exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Response header block of {size} bytes exceeds {limit} bytes")]
    ResponseHeaderOverflow { size: usize, limit: usize },

    #[error("Response can no longer be written")]
    ResponseFailed,

    #[error("Incomplete message")]
    Incomplete,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Application error: {0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an arbitrary application error
    pub fn application(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Application(err.into())
    }

    /// The status a request-side protocol error is answered with
    ///
    /// Returns `None` for errors that leave no response possible (I/O
    /// failures, timeouts, peer close) or that are not request errors.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Parse(_)
            | Error::InvalidMethod(_)
            | Error::InvalidHeader(_)
            | Error::HeaderTooLarge(_)
            | Error::InvalidContentLength(_)
            | Error::InvalidChunkSize(_)
            | Error::Incomplete => Some(Status::BAD_REQUEST),
            Error::UnsupportedTransferEncoding(_) => Some(Status::NOT_IMPLEMENTED),
            Error::UnsupportedVersion(_) => Some(Status::VERSION_NOT_SUPPORTED),
            _ => None,
        }
    }

    /// Whether the error came from the transport
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout | Error::ConnectionClosed
        )
    }
}

/// Maximum number of headers accepted in a request head
pub const MAX_HEADERS: usize = 100;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
