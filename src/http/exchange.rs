//! Application-facing view of one request/response exchange

use super::request::parse_form;
use super::{AsyncContext, Connection, Processor, Request, Response, Result, Status};

/// Application callback invoked once per request
///
/// Returning an error before the response is committed produces an error
/// page (500 unless the error maps to another status); after commit the
/// connection is closed.
pub trait Handler: Send + Sync {
    fn service(&self, exchange: &mut Exchange<'_>) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&mut Exchange<'_>) -> Result<()> + Send + Sync,
{
    fn service(&self, exchange: &mut Exchange<'_>) -> Result<()> {
        self(exchange)
    }
}

/// A request being served, with the means to answer it
pub struct Exchange<'a> {
    processor: &'a mut Processor,
    conn: &'a mut Connection,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(processor: &'a mut Processor, conn: &'a mut Connection) -> Self {
        Exchange { processor, conn }
    }

    pub fn request(&self) -> &Request {
        &self.processor.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.processor.request
    }

    pub fn response(&self) -> &Response {
        &self.processor.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.processor.response
    }

    /// Id of the processor serving this exchange
    pub fn processor_id(&self) -> u64 {
        self.processor.id()
    }

    /// Id of the underlying connection
    pub fn connection_id(&self) -> u64 {
        self.conn.id()
    }

    /// Requests received on this connection so far, this one included
    pub fn connection_requests(&self) -> u32 {
        self.conn.requests_served()
    }

    /// Read decoded request body bytes; 0 marks the end of the body
    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.processor.read_body(self.conn, buf)
    }

    /// Read the rest of the request body
    pub fn read_body_to_end(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = self.read_body(&mut buf)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Query parameters, followed by form parameters from an
    /// `application/x-www-form-urlencoded` body
    ///
    /// Reading form parameters consumes the body.
    pub fn parameters(&mut self) -> Result<Vec<(String, String)>> {
        let mut params = Vec::new();

        if let Some(query) = self.request().query() {
            parse_form(query, &mut params);
        }

        let is_form = self
            .request()
            .header("Content-Type")
            .and_then(|v| v.split(';').next())
            .map_or(false, |v| {
                v.trim()
                    .eq_ignore_ascii_case("application/x-www-form-urlencoded")
            });

        if is_form && !self.request().body_opened() {
            let body = self.read_body_to_end()?;
            parse_form(&String::from_utf8_lossy(&body), &mut params);
        }

        Ok(params)
    }

    /// Append body bytes to the response
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.processor.write(self.conn, data)
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write(s.as_bytes())
    }

    /// Send the head, if not yet sent, and everything buffered
    pub fn flush(&mut self) -> Result<()> {
        self.processor.flush(self.conn)
    }

    /// Replace the response with an error page
    ///
    /// Fails once the response has been committed.
    pub fn send_error(&mut self, status: Status, message: Option<&str>) -> Result<()> {
        self.processor
            .send_error(status, message.map(|m| m.to_string()))
    }

    /// Switch the exchange to async mode
    ///
    /// Once the handler returns, the response is finished through the
    /// returned context rather than when the handler returns. Calling this
    /// again returns the same context.
    pub fn start_async(&mut self) -> AsyncContext {
        self.processor.start_async()
    }

    pub fn is_async_started(&self) -> bool {
        self.processor.async_ctx.is_some()
    }

    pub fn async_context(&self) -> Option<AsyncContext> {
        self.processor.async_ctx.clone()
    }

    /// Default async timeout configured for the connector
    pub fn default_async_timeout(&self) -> std::time::Duration {
        self.processor.config().async_timeout
    }
}
