//! Server-side response state
//!
//! A `Response` buffers the status, headers and body written by the
//! application. Nothing reaches the wire until the processor commits it;
//! from then on the head is sealed and header mutations are ignored.

use super::chunked;
use super::framing::ResponseFraming;
use super::{Headers, Result, Error, Status, CRLF};
use bytes::{BufMut, BytesMut};

/// An HTTP response being produced
pub struct Response {
    status: Status,
    reason: Option<String>,
    headers: Headers,
    content_type: Option<String>,
    content_length: Option<u64>,
    pub(crate) buffer: BytesMut,
    capacity: usize,
    committed: bool,
    framing: Option<ResponseFraming>,
    body_written: u64,
    head_only: bool,
    error: Option<ErrorPage>,
    failed: bool,
}

/// Pending error page
#[derive(Debug, Clone)]
pub(crate) struct ErrorPage {
    pub status: Status,
    pub message: Option<String>,
}

impl Response {
    pub(crate) fn new(capacity: usize) -> Self {
        Response {
            status: Status::OK,
            reason: None,
            headers: Headers::new(),
            content_type: None,
            content_length: None,
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            committed: false,
            framing: None,
            body_written: 0,
            head_only: false,
            error: None,
            failed: false,
        }
    }

    pub(crate) fn prepare(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    /// Response status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the status; ignored once committed
    pub fn set_status(&mut self, status: Status) {
        if !self.committed {
            self.status = status;
            self.reason = None;
        }
    }

    /// Set the status from a numeric code
    pub fn set_status_code(&mut self, code: u16) -> Result<()> {
        let status = Status::new(code)?;
        self.set_status(status);
        Ok(())
    }

    /// Set the status with a custom reason phrase; ignored once committed
    pub fn set_status_with_reason(&mut self, status: Status, reason: impl Into<String>) {
        if !self.committed {
            self.status = status;
            self.reason = Some(reason.into());
        }
    }

    /// Response headers, excluding `Content-Type` and `Content-Length`
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Replace a header; ignored once committed
    ///
    /// `Content-Type` and `Content-Length` are routed to their setters.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if self.committed {
            return;
        }
        let value = value.into();
        if !self.special_header(name, &value) {
            self.headers.set(name, value);
        }
    }

    /// Add a header value; ignored once committed
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        if self.committed {
            return;
        }
        let value = value.into();
        if !self.special_header(name, &value) {
            self.headers.insert(name, value);
        }
    }

    /// Remove a header; ignored once committed
    pub fn remove_header(&mut self, name: &str) {
        if !self.committed {
            self.headers.remove(name);
        }
    }

    fn special_header(&mut self, name: &str, value: &str) -> bool {
        if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value.to_string());
            true
        } else if name.eq_ignore_ascii_case("Content-Length") {
            // an unparsable length is treated as unset
            self.content_length = value.trim().parse().ok();
            true
        } else {
            false
        }
    }

    /// Content type, if set
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Set the content type; ignored once committed
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        if !self.committed {
            self.content_type = Some(content_type.into());
        }
    }

    /// Declared content length, if set
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Declare the body length; ignored once committed
    pub fn set_content_length(&mut self, length: u64) {
        if !self.committed {
            self.content_length = Some(length);
        }
    }

    /// Whether the head has been sent
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Framing chosen at commit
    pub fn framing(&self) -> Option<ResponseFraming> {
        self.framing
    }

    /// Body bytes buffered and not yet sent
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Output buffer capacity
    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    /// Body bytes put on the wire so far
    pub fn body_bytes_written(&self) -> u64 {
        self.body_written
    }

    /// Discard buffered body bytes
    ///
    /// Fails once the response is committed.
    pub fn reset_buffer(&mut self) -> Result<()> {
        if self.committed {
            return Err(Error::ResponseFailed);
        }
        self.buffer.clear();
        Ok(())
    }

    /// Whether an error page will replace the application's response
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether output has failed and nothing more can be written
    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn fail(&mut self) {
        self.failed = true;
    }

    /// Drop the application's status, headers and body in favour of an
    /// error page
    ///
    /// Returns false if the response is already committed.
    pub(crate) fn set_error(&mut self, status: Status, message: Option<String>) -> bool {
        if self.committed {
            self.failed = true;
            return false;
        }
        self.status = status;
        self.reason = None;
        self.headers.clear();
        self.content_type = None;
        self.content_length = None;
        self.buffer.clear();
        self.error = Some(ErrorPage { status, message });
        true
    }

    /// Replace the buffered body with the pending error page
    pub(crate) fn render_error_page(&mut self) {
        let page = match self.error.as_ref() {
            Some(page) => page,
            None => return,
        };
        let status = page.status;

        self.buffer.clear();
        self.content_length = None;
        if status.allows_body() {
            let mut body = format!(
                "<!doctype html><html lang=\"en\"><head><title>HTTP Status {} - {}</title></head>\
                 <body><h1>HTTP Status {} - {}</h1>",
                status.code(),
                status.reason_phrase(),
                status.code(),
                status.reason_phrase()
            );
            if let Some(message) = page.message.as_deref() {
                body.push_str("<p>");
                body.push_str(&escape_html(message));
                body.push_str("</p>");
            }
            body.push_str("</body></html>");

            self.content_type = Some("text/html;charset=utf-8".to_string());
            self.buffer.put_slice(body.as_bytes());
        }
    }

    /// Serialize the status line and headers
    ///
    /// Application `Connection`, `Transfer-Encoding` and `Content-Length`
    /// headers are replaced by the ones matching `framing` and
    /// `connection`.
    pub(crate) fn write_head(
        &self,
        framing: ResponseFraming,
        connection: Option<&str>,
        out: &mut BytesMut,
    ) {
        let reason = self
            .reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase());
        out.put_slice(format!("HTTP/1.1 {} {}", self.status.code(), reason).as_bytes());
        out.put_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Connection")
                || name.eq_ignore_ascii_case("Transfer-Encoding")
                || name.eq_ignore_ascii_case("Content-Length")
            {
                continue;
            }
            put_header(out, name, value);
        }

        if framing != ResponseFraming::None {
            if let Some(content_type) = self.content_type.as_deref() {
                put_header(out, "Content-Type", content_type);
            }
        }

        match framing {
            ResponseFraming::ContentLength(n) => put_header(out, "Content-Length", &n.to_string()),
            ResponseFraming::Chunked => put_header(out, "Transfer-Encoding", "chunked"),
            ResponseFraming::Close | ResponseFraming::None => {}
        }

        if let Some(connection) = connection {
            put_header(out, "Connection", connection);
        }

        out.put_slice(CRLF.as_bytes());
    }

    pub(crate) fn mark_committed(&mut self, framing: ResponseFraming) {
        self.committed = true;
        self.framing = Some(framing);
    }

    /// Move the buffered body to `out`, encoded for the committed framing
    pub(crate) fn drain_body(&mut self, out: &mut BytesMut) {
        let framing = self.framing.unwrap_or(ResponseFraming::None);
        let data = &self.buffer[..];

        if !self.head_only {
            match framing {
                ResponseFraming::ContentLength(length) => {
                    let room = length.saturating_sub(self.body_written);
                    let n = (data.len() as u64).min(room) as usize;
                    out.put_slice(&data[..n]);
                    self.body_written += n as u64;
                }
                ResponseFraming::Chunked => {
                    chunked::encode_chunk(data, out);
                    self.body_written += data.len() as u64;
                }
                ResponseFraming::Close => {
                    out.put_slice(data);
                    self.body_written += data.len() as u64;
                }
                ResponseFraming::None => {}
            }
        }

        self.buffer.clear();
    }

    /// Whether a `Content-Length` body was cut short
    pub(crate) fn is_short(&self) -> bool {
        match self.framing {
            Some(ResponseFraming::ContentLength(length)) => {
                !self.head_only && self.body_written < length
            }
            _ => false,
        }
    }

    /// Drop all exchange state, keeping the buffer allocation
    pub(crate) fn recycle(&mut self) {
        self.status = Status::OK;
        self.reason = None;
        self.headers.clear();
        self.content_type = None;
        self.content_length = None;
        self.buffer.clear();
        self.committed = false;
        self.framing = None;
        self.body_written = 0;
        self.head_only = false;
        self.error = None;
        self.failed = false;
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(CRLF.as_bytes());
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(response: &Response, framing: ResponseFraming, connection: Option<&str>) -> String {
        let mut out = BytesMut::new();
        response.write_head(framing, connection, &mut out);
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn test_write_head_strips_framing_headers() {
        let mut response = Response::new(8192);
        response.set_header("Connection", "keep-alive");
        response.set_header("Transfer-Encoding", "gzip");
        response.set_header("Content-Length", "2");
        response.set_header("X-Test", "1");
        response.set_content_type("text/plain");

        let text = head(&response, ResponseFraming::ContentLength(2), Some("close"));
        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\nX-Test: 1\r\nContent-Type: text/plain\r\n\
             Content-Length: 2\r\nConnection: close\r\n\r\n"
        );
        assert_eq!(response.content_length(), Some(2));
    }

    #[test]
    fn test_write_head_no_body_status() {
        let mut response = Response::new(8192);
        response.set_status(Status::NO_CONTENT);
        response.set_content_type("text/plain");

        let text = head(&response, ResponseFraming::None, None);
        assert_eq!(text, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn test_mutation_after_commit_ignored() {
        let mut response = Response::new(8192);
        response.mark_committed(ResponseFraming::Chunked);

        response.set_status(Status::NOT_FOUND);
        response.set_header("X-Late", "1");
        response.set_content_length(10);
        response.set_content_type("text/html");

        assert_eq!(response.status(), Status::OK);
        assert!(response.header("X-Late").is_none());
        assert_eq!(response.content_length(), None);
        assert!(response.reset_buffer().is_err());
    }

    #[test]
    fn test_drain_body_framings() {
        let mut response = Response::new(8192);
        response.mark_committed(ResponseFraming::ContentLength(3));
        response.buffer.put_slice(b"abcdef");
        let mut out = BytesMut::new();
        response.drain_body(&mut out);
        assert_eq!(&out[..], b"abc");
        assert!(!response.is_short());

        let mut response = Response::new(8192);
        response.mark_committed(ResponseFraming::Chunked);
        response.buffer.put_slice(b"OK");
        let mut out = BytesMut::new();
        response.drain_body(&mut out);
        assert_eq!(&out[..], b"2\r\nOK\r\n");
        assert_eq!(response.buffered_len(), 0);
        assert_eq!(response.body_bytes_written(), 2);

        let mut response = Response::new(8192);
        response.mark_committed(ResponseFraming::ContentLength(5));
        response.buffer.put_slice(b"OK");
        response.drain_body(&mut BytesMut::new());
        assert!(response.is_short());
    }

    #[test]
    fn test_head_only_suppresses_body() {
        let mut response = Response::new(8192);
        response.prepare(true);
        response.mark_committed(ResponseFraming::ContentLength(2));
        response.buffer.put_slice(b"OK");
        let mut out = BytesMut::new();
        response.drain_body(&mut out);
        assert!(out.is_empty());
        assert!(!response.is_short());
    }

    #[test]
    fn test_error_page_replaces_application_output() {
        let mut response = Response::new(8192);
        response.set_header("x-Test", "x".repeat(100));
        response.buffer.put_slice(b"FAIL");

        assert!(response.set_error(Status::INTERNAL_SERVER_ERROR, Some("<oops>".into())));
        response.render_error_page();

        let body = String::from_utf8(response.buffer.to_vec()).unwrap();
        assert!(body.contains("HTTP Status 500 - Internal Server Error"));
        assert!(body.contains("&lt;oops&gt;"));
        assert!(!body.contains("FAIL"));
        assert!(response.header("x-Test").is_none());
        assert_eq!(response.content_type(), Some("text/html;charset=utf-8"));
    }

    #[test]
    fn test_recycle() {
        let mut response = Response::new(16);
        response.set_status(Status::NOT_FOUND);
        response.set_header("Set-Cookie", "a=1");
        response.buffer.put_slice(b"body");
        response.mark_committed(ResponseFraming::Close);
        response.fail();

        response.recycle();
        assert_eq!(response.status(), Status::OK);
        assert!(response.headers().is_empty());
        assert_eq!(response.buffered_len(), 0);
        assert!(!response.is_committed());
        assert!(response.framing().is_none());
        assert!(!response.is_failed());
        assert!(!response.is_error());
    }
}
