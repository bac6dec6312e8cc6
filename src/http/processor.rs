//! HTTP/1.1 request processor
//!
//! A `Processor` drives the exchanges of one connection: it reads a request
//! head, chooses the body framing, dispatches to the [`Handler`], commits
//! the response with the framing picked at commit time, and decides whether
//! the connection survives. Between exchanges, and before it is returned to
//! the pool, the processor is scrubbed of all request state.

use super::async_context::{AsyncContext, AsyncEvent};
use super::chunked;
use super::framing::{self, CommitInfo, ResponseFraming};
use super::{
    CloseReason, Connection, Error, Exchange, Handler, Method, Request, RequestParser, Response,
    Result, Status, Version,
};
use crate::config::Config;
use crate::scheduler::Scheduler;
use bytes::BytesMut;
use log::{debug, error, trace, warn};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Processor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    ReadingRequest,
    Dispatched,
    Async,
    WritingResponse,
    Done,
    Error,
}

/// What the host should do with the connection next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Kept alive: call [`Processor::process`] again
    Open,
    /// Closed: release the processor
    Closed,
    /// Async exchange in progress: park until its context has events
    Suspended,
}

/// Per-connection request processor
pub struct Processor {
    id: u64,
    config: Arc<Config>,
    scheduler: Arc<Scheduler>,
    parser: RequestParser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    wire: BytesMut,
    state: ProcessorState,
    pub(crate) async_ctx: Option<AsyncContext>,
    exchanges: u64,
}

impl Processor {
    /// Create a processor
    pub fn new(id: u64, config: Arc<Config>, scheduler: Arc<Scheduler>) -> Self {
        Processor {
            id,
            parser: RequestParser::new(config.max_http_header_size),
            request: Request::new(),
            response: Response::new(config.output_buffer_size),
            wire: BytesMut::with_capacity(config.output_buffer_size),
            state: ProcessorState::Idle,
            async_ctx: None,
            exchanges: 0,
            config,
            scheduler,
        }
    }

    /// Processor id, stable across recycling
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Exchanges completed over the processor's lifetime
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Current request
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Current response
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Async context of a suspended exchange
    pub fn async_context(&self) -> Option<&AsyncContext> {
        self.async_ctx.as_ref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Serve requests from `conn` until it closes or an exchange goes async
    pub fn process(&mut self, conn: &mut Connection, handler: &dyn Handler) -> SocketState {
        loop {
            match self.read_request(conn) {
                Ok(true) => {}
                Ok(false) => {
                    self.recycle();
                    conn.close();
                    return SocketState::Closed;
                }
                Err(e) => return self.request_error(conn, e),
            }

            self.dispatch(conn, handler);

            if self.state == ProcessorState::Async {
                debug!("processor {}: exchange suspended", self.id);
                return SocketState::Suspended;
            }

            match self.end_exchange(conn) {
                SocketState::Open => continue,
                other => return other,
            }
        }
    }

    /// Apply the events queued on the async context
    ///
    /// Returns `Suspended` until the exchange completes or times out.
    pub fn resume(&mut self, conn: &mut Connection) -> SocketState {
        let ctx = match self.async_ctx.clone() {
            Some(ctx) => ctx,
            None => return self.end_exchange(conn),
        };

        for event in ctx.take_events() {
            trace!("processor {}: async event {:?}", self.id, event);

            match event {
                AsyncEvent::Write(data) => {
                    if let Err(e) = self.write(conn, &data) {
                        self.async_output_failed(conn, &ctx, e);
                    }
                }
                AsyncEvent::Flush => {
                    if let Err(e) = self.flush(conn) {
                        self.async_output_failed(conn, &ctx, e);
                    }
                }
                AsyncEvent::Complete => return self.end_async(conn),
                AsyncEvent::Timeout => {
                    conn.close_after(CloseReason::AsyncTimeout);
                    // a committed response is cut off instead
                    self.response.set_error(Status::INTERNAL_SERVER_ERROR, None);
                    return self.end_async(conn);
                }
            }
        }

        SocketState::Suspended
    }

    fn end_async(&mut self, conn: &mut Connection) -> SocketState {
        if let Some(ctx) = self.async_ctx.take() {
            ctx.finish();
        }
        self.end_exchange(conn)
    }

    fn async_output_failed(&mut self, conn: &mut Connection, ctx: &AsyncContext, e: Error) {
        debug!("processor {}: async output failed: {}", self.id, e);
        let kind = match &e {
            Error::Io(err) => err.kind(),
            Error::Timeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::BrokenPipe,
        };
        ctx.fail(kind);
        conn.close_after(CloseReason::Error);
    }

    /// Read and prepare the next request
    ///
    /// Returns Ok(false) when the connection ended cleanly between requests.
    fn read_request(&mut self, conn: &mut Connection) -> Result<bool> {
        self.state = ProcessorState::ReadingRequest;

        let idle = conn.requests_served() > 0 && conn.buffered().is_empty();
        conn.set_timeout(if idle {
            self.config.keep_alive_timeout()
        } else {
            self.config.connection_timeout
        });

        let (head, consumed) = loop {
            if let Some(parsed) = self.parser.parse(conn.buffered())? {
                break parsed;
            }

            let had_data = !conn.buffered().is_empty();
            match conn.fill() {
                Ok(0) => {
                    if had_data {
                        debug!("conn {}: peer closed mid-request", conn.id());
                    }
                    return Ok(false);
                }
                Ok(_) => conn.set_timeout(self.config.connection_timeout),
                Err(Error::Timeout) if !had_data => {
                    debug!("conn {}: keep-alive timeout", conn.id());
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        };
        conn.consume(consumed);

        debug!(
            "conn {}: {} {} {}",
            conn.id(),
            head.method,
            head.target,
            head.version
        );

        conn.begin_request(head.version, &head.headers);
        let body_framing = framing::request_framing(&head.headers);
        let head_only = head.method == Method::Head;

        self.request.prepare(head);
        self.response.prepare(head_only);
        self.request.body.reset(body_framing?);

        Ok(true)
    }

    fn request_error(&mut self, conn: &mut Connection, e: Error) -> SocketState {
        self.state = ProcessorState::Error;

        match e.status() {
            Some(status) => {
                warn!("conn {}: rejecting request: {}", conn.id(), e);
                conn.close_after(CloseReason::Error);
                self.response.set_error(status, None);
                if let Err(e) = self.finish_response(conn) {
                    debug!("conn {}: error response failed: {}", conn.id(), e);
                }
            }
            None => debug!("conn {}: {}", conn.id(), e),
        }

        self.recycle();
        conn.close();
        SocketState::Closed
    }

    fn dispatch(&mut self, conn: &mut Connection, handler: &dyn Handler) {
        self.state = ProcessorState::Dispatched;

        let result = {
            let mut exchange = Exchange::new(self, conn);
            panic::catch_unwind(AssertUnwindSafe(|| handler.service(&mut exchange)))
        };

        let result = match result {
            Ok(result) => result,
            Err(_) => Err(Error::application("handler panicked")),
        };

        if let Err(e) = result {
            self.application_error(conn, e);
        }

        if self.async_ctx.is_some() {
            self.state = ProcessorState::Async;
        }
    }

    fn application_error(&mut self, conn: &mut Connection, e: Error) {
        if let Some(ctx) = self.async_ctx.take() {
            ctx.finish();
        }

        conn.close_after(CloseReason::Error);

        if self.response.is_failed() {
            debug!("processor {}: handler failed after output error: {}", self.id, e);
            return;
        }
        if self.response.is_error() {
            // error page already pending, e.g. after a header overflow
            return;
        }

        let status = e.status().unwrap_or(Status::INTERNAL_SERVER_ERROR);
        if self.response.set_error(status, None) {
            error!(
                "processor {}: {} {} failed: {}",
                self.id,
                self.request.method(),
                self.request.target(),
                e
            );
        } else {
            error!(
                "processor {}: {} {} failed after commit: {}",
                self.id,
                self.request.method(),
                self.request.target(),
                e
            );
        }
    }

    /// Buffer body bytes, committing or draining once the buffer is full
    pub(crate) fn write(&mut self, conn: &mut Connection, data: &[u8]) -> Result<()> {
        if self.response.is_failed() {
            return Err(Error::ResponseFailed);
        }
        if self.response.is_error() {
            // replaced by the error page
            return Ok(());
        }

        self.response.buffer.extend_from_slice(data);

        if self.response.buffered_len() > self.response.buffer_size() {
            self.flush(conn)?;
        }

        Ok(())
    }

    /// Send everything buffered, committing first if needed
    pub(crate) fn flush(&mut self, conn: &mut Connection) -> Result<()> {
        if self.response.is_failed() {
            return Err(Error::ResponseFailed);
        }
        if self.response.is_error() {
            return Ok(());
        }

        if !self.response.is_committed() {
            return self.commit(conn, true);
        }

        self.wire.clear();
        self.response.drain_body(&mut self.wire);
        self.send_wire(conn)
    }

    /// Read request body bytes, sending `100 Continue` first if expected
    pub(crate) fn read_body(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Result<usize> {
        self.request.open_body();

        if self.request.expect_continue {
            self.request.expect_continue = false;
            if !self.request.body.is_complete() && !self.response.is_committed() {
                trace!("conn {}: sending 100 Continue", conn.id());
                conn.write_all(CONTINUE_RESPONSE)?;
            }
        }

        let result = self.request.body.read(conn, buf);
        if result.is_err() {
            conn.close_after(CloseReason::Error);
        }
        result
    }

    pub(crate) fn send_error(&mut self, status: Status, message: Option<String>) -> Result<()> {
        if self.response.is_committed() {
            return Err(Error::ResponseFailed);
        }
        self.response.set_error(status, message);
        Ok(())
    }

    pub(crate) fn start_async(&mut self) -> AsyncContext {
        if let Some(ctx) = &self.async_ctx {
            return ctx.clone();
        }

        debug!("processor {}: starting async", self.id);
        let ctx = AsyncContext::new(self.id, self.config.async_timeout, self.scheduler.clone());
        self.async_ctx = Some(ctx.clone());
        ctx
    }

    /// Whether an unread request body rules out keeping the connection
    fn body_blocks_keep_alive(&self) -> bool {
        let body = &self.request.body;
        if body.is_complete() {
            return false;
        }
        // the client is still waiting for 100 Continue
        if self.request.expect_continue {
            return true;
        }
        matches!(
            (body.remaining_fixed(), self.config.max_swallow_size),
            (Some(remaining), Some(budget)) if remaining > budget
        )
    }

    /// Serialize and send the head plus the buffered body
    ///
    /// `flushed` is true when the application has not finished writing.
    fn commit(&mut self, conn: &mut Connection, flushed: bool) -> Result<()> {
        let version = self.request.version();
        let status = self.response.status();

        conn.apply_response(
            status,
            self.response.headers().has_token("Connection", "close"),
        );
        if self.body_blocks_keep_alive() {
            conn.close_after(CloseReason::UnreadBody);
        }

        let framing = framing::response_framing(&CommitInfo {
            status,
            version,
            content_length: self.response.content_length(),
            closing: !conn.is_keep_alive(),
            flushed,
            buffered: self.response.buffered_len(),
        });
        if framing.closes_connection() {
            conn.close_after(CloseReason::CloseDelimited);
        }

        let connection = if !conn.is_keep_alive() {
            Some("close")
        } else if version == Version::Http10 {
            Some("keep-alive")
        } else {
            None
        };

        self.wire.clear();
        self.response.write_head(framing, connection, &mut self.wire);

        let limit = self.config.max_http_header_size;
        if self.wire.len() > limit {
            let size = self.wire.len();
            self.wire.clear();
            warn!(
                "processor {}: response header block of {} bytes exceeds {}",
                self.id, size, limit
            );
            self.response.set_error(Status::INTERNAL_SERVER_ERROR, None);
            return Err(Error::ResponseHeaderOverflow { size, limit });
        }

        trace!("processor {}: committed with {:?}", self.id, framing);
        self.response.mark_committed(framing);
        self.response.drain_body(&mut self.wire);
        self.send_wire(conn)
    }

    fn send_wire(&mut self, conn: &mut Connection) -> Result<()> {
        if self.wire.is_empty() {
            return Ok(());
        }

        let result = conn.write_all(&self.wire);
        self.wire.clear();

        if result.is_err() {
            self.response.fail();
            conn.close_after(CloseReason::Error);
        }
        result
    }

    /// Complete the response on the wire
    fn finish_response(&mut self, conn: &mut Connection) -> Result<()> {
        if self.response.is_failed() {
            conn.close_after(CloseReason::Error);
            return Ok(());
        }

        if !self.response.is_committed() {
            // settle keep-alive before the head goes out
            self.discard_body(conn);

            if !self.response.is_error() {
                match self.commit(conn, false) {
                    Ok(()) => {}
                    // answered with the error page below
                    Err(Error::ResponseHeaderOverflow { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            if self.response.is_error() && !self.response.is_committed() {
                self.response.render_error_page();
                self.commit(conn, false)?;
            }
        }

        self.wire.clear();
        self.response.drain_body(&mut self.wire);
        if self.response.framing() == Some(ResponseFraming::Chunked)
            && self.request.method() != &Method::Head
        {
            chunked::encode_last_chunk(&mut self.wire);
        }
        self.send_wire(conn)?;

        if self.response.is_short() {
            conn.close_after(CloseReason::IncompleteResponse);
        }

        Ok(())
    }

    /// Discard what the application left of the request body
    ///
    /// Closes the connection instead when the body is over the swallow
    /// budget or the client still waits for 100 Continue.
    fn discard_body(&mut self, conn: &mut Connection) {
        if !conn.is_keep_alive() || self.request.body.is_complete() {
            return;
        }
        if self.request.expect_continue {
            conn.close_after(CloseReason::UnreadBody);
            return;
        }

        match self.request.body.swallow(conn, self.config.max_swallow_size) {
            Ok(true) => {}
            Ok(false) => conn.close_after(CloseReason::UnreadBody),
            Err(e) => {
                debug!("conn {}: discarding request body failed: {}", conn.id(), e);
                conn.close_after(CloseReason::Error);
            }
        }
    }

    fn end_exchange(&mut self, conn: &mut Connection) -> SocketState {
        self.state = ProcessorState::WritingResponse;

        if let Err(e) = self.finish_response(conn) {
            debug!("processor {}: response failed: {}", self.id, e);
            conn.close_after(CloseReason::Error);
        }

        self.discard_body(conn);

        debug!(
            "conn {}: {} {} -> {}",
            conn.id(),
            self.request.method(),
            self.request.target(),
            self.response.status().code()
        );

        self.state = ProcessorState::Done;
        self.exchanges += 1;

        let keep_alive = conn.is_keep_alive();
        self.recycle();

        if keep_alive {
            SocketState::Open
        } else {
            conn.close();
            SocketState::Closed
        }
    }

    /// Scrub all request-scoped state
    ///
    /// Afterwards the processor cannot be told apart from a new one by any
    /// request dispatched through it.
    pub fn recycle(&mut self) {
        self.request.recycle();
        self.response.recycle();
        self.wire.clear();
        if let Some(ctx) = self.async_ctx.take() {
            ctx.finish();
        }
        self.state = ProcessorState::Idle;
    }
}
