//! Server-side request state
//!
//! A `Request` is owned by its processor and reused across exchanges. All
//! request-scoped state (headers, cookies, attributes, body progress) is
//! dropped by [`Request::recycle`].

use super::chunked::ChunkedDecoder;
use super::cookie::{parse_cookie_header, Cookie};
use super::framing::RequestFraming;
use super::parser::RequestHead;
use super::{Connection, Error, Headers, Method, Result, Version};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute value stored on a request
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// An HTTP request being processed
pub struct Request {
    method: Method,
    target: String,
    query_start: Option<usize>,
    version: Version,
    headers: Headers,
    cookies: Option<Vec<Cookie>>,
    attributes: HashMap<String, Attribute>,
    pub(crate) body: RequestBody,
    body_opened: bool,
    pub(crate) expect_continue: bool,
}

impl Request {
    pub(crate) fn new() -> Self {
        Request {
            method: Method::Get,
            target: String::new(),
            query_start: None,
            version: Version::Http11,
            headers: Headers::new(),
            cookies: None,
            attributes: HashMap::new(),
            body: RequestBody::new(),
            body_opened: false,
            expect_continue: false,
        }
    }

    /// Load a freshly parsed head
    pub(crate) fn prepare(&mut self, head: RequestHead) {
        self.query_start = head.target.find('?');
        self.method = head.method;
        self.target = head.target;
        self.version = head.version;
        self.headers = head.headers;
        self.expect_continue = self.version == Version::Http11
            && self
                .headers
                .get("Expect")
                .map_or(false, |v| v.eq_ignore_ascii_case("100-continue"));
    }

    /// Request method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request-target, including any query string
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Request path, without the query string
    pub fn uri(&self) -> &str {
        match self.query_start {
            Some(q) => &self.target[..q],
            None => &self.target,
        }
    }

    /// Query string, without the leading `?`
    pub fn query(&self) -> Option<&str> {
        self.query_start.map(|q| &self.target[q + 1..])
    }

    /// Protocol version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable request headers, or `None` once the body has been opened
    pub fn headers_mut(&mut self) -> Option<&mut Headers> {
        if self.body_opened {
            None
        } else {
            Some(&mut self.headers)
        }
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Request cookies
    ///
    /// Parsed from the `Cookie` headers on first access; later header
    /// changes are not seen.
    pub fn cookies(&mut self) -> &[Cookie] {
        let headers = &self.headers;
        self.cookies.get_or_insert_with(|| {
            let mut cookies = Vec::new();
            for value in headers.get_all("Cookie") {
                parse_cookie_header(value, &mut cookies);
            }
            cookies
        })
    }

    /// Look up a cookie by name
    pub fn cookie(&mut self, name: &str) -> Option<&Cookie> {
        self.cookies().iter().find(|c| c.name() == name)
    }

    /// Whether the cookies have been parsed for this request
    pub fn cookies_parsed(&self) -> bool {
        self.cookies.is_some()
    }

    /// Store an attribute
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Arc::new(value));
    }

    /// Get an attribute of type `T`
    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name)?.downcast_ref::<T>()
    }

    /// Get a shared handle to an attribute, whatever its type
    pub fn attribute_any(&self, name: &str) -> Option<Attribute> {
        self.attributes.get(name).cloned()
    }

    /// Remove an attribute
    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    /// Names of all attributes
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Request body framing
    pub fn body_framing(&self) -> RequestFraming {
        self.body.framing
    }

    /// Whether the body has been opened for reading
    pub fn body_opened(&self) -> bool {
        self.body_opened
    }

    pub(crate) fn open_body(&mut self) {
        self.body_opened = true;
    }

    /// Drop all request-scoped state, keeping allocations
    pub(crate) fn recycle(&mut self) {
        self.method = Method::Get;
        self.target.clear();
        self.query_start = None;
        self.version = Version::Http11;
        self.headers.clear();
        self.cookies = None;
        self.attributes.clear();
        self.body.reset(RequestFraming::Empty);
        self.body_opened = false;
        self.expect_continue = false;
    }
}

/// Request body progress
#[derive(Debug)]
pub(crate) struct RequestBody {
    framing: RequestFraming,
    remaining: u64,
    decoder: ChunkedDecoder,
    complete: bool,
}

impl RequestBody {
    fn new() -> Self {
        RequestBody {
            framing: RequestFraming::Empty,
            remaining: 0,
            decoder: ChunkedDecoder::new(),
            complete: true,
        }
    }

    pub(crate) fn reset(&mut self, framing: RequestFraming) {
        self.framing = framing;
        self.decoder.reset();
        match framing {
            RequestFraming::Empty => {
                self.remaining = 0;
                self.complete = true;
            }
            RequestFraming::Fixed(n) => {
                self.remaining = n;
                self.complete = n == 0;
            }
            RequestFraming::Chunked => {
                self.remaining = 0;
                self.complete = false;
            }
        }
    }

    /// Whether every body byte has been read
    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes still expected for a fixed-length body
    pub(crate) fn remaining_fixed(&self) -> Option<u64> {
        match self.framing {
            RequestFraming::Fixed(_) => Some(self.remaining),
            _ => None,
        }
    }

    /// Read decoded body bytes, using the connection's read-ahead first
    ///
    /// Returns 0 at the end of the body.
    pub(crate) fn read(&mut self, conn: &mut Connection, buf: &mut [u8]) -> Result<usize> {
        if self.complete || buf.is_empty() {
            return Ok(0);
        }

        match self.framing {
            RequestFraming::Empty => Ok(0),
            RequestFraming::Fixed(_) => {
                if conn.buffered().is_empty() && conn.fill()? == 0 {
                    return Err(Error::Incomplete);
                }

                let available = conn.buffered().len() as u64;
                let n = self.remaining.min(available).min(buf.len() as u64) as usize;
                buf[..n].copy_from_slice(&conn.buffered()[..n]);
                conn.consume(n);

                self.remaining -= n as u64;
                self.complete = self.remaining == 0;
                Ok(n)
            }
            RequestFraming::Chunked => loop {
                let (consumed, decoded, done) = self.decoder.decode(conn.buffered(), buf)?;
                conn.consume(consumed);

                if done {
                    self.complete = true;
                }
                if decoded > 0 || done {
                    return Ok(decoded);
                }
                if conn.fill()? == 0 {
                    return Err(Error::Incomplete);
                }
            },
        }
    }

    /// Discard the unread body so the next request can be parsed
    ///
    /// Returns false if the body is larger than `budget` bytes.
    pub(crate) fn swallow(&mut self, conn: &mut Connection, budget: Option<u64>) -> Result<bool> {
        if let (Some(remaining), Some(budget)) = (self.remaining_fixed(), budget) {
            if remaining > budget {
                return Ok(false);
            }
        }

        let mut scratch = [0u8; 4096];
        let mut swallowed = 0u64;
        while !self.complete {
            swallowed += self.read(conn, &mut scratch)? as u64;
            if budget.map_or(false, |b| swallowed > b) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Decode `application/x-www-form-urlencoded` pairs
///
/// Only `+` is translated (to a space); percent escapes are kept as sent.
pub fn parse_form(input: &str, out: &mut Vec<(String, String)>) {
    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.push((name.replace('+', " "), value.replace('+', " ")));
    }
}
