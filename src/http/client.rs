//! Raw-wire HTTP/1.1 client
//!
//! This module provides a client for exercising the processor over a real
//! socket. Requests are written as raw bytes, optionally split into parts
//! with pauses in between, and responses are read back one at a time, so
//! pipelined responses can be checked individually.

use super::chunked::ChunkedDecoder;
use super::parser::parse_response_head;
use super::session::TcpSession;
use super::{Error, Headers, HttpSession, Result, SessionOps, Status, Version};
use bytes::{Buf, BytesMut};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Response read by [`HttpClient`]
#[derive(Debug, Clone)]
pub struct ClientResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
}

impl ClientResponse {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, with invalid UTF-8 replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the server announced it will close the connection
    pub fn is_close(&self) -> bool {
        self.headers.has_token("Connection", "close")
    }
}

/// HTTP client
pub struct HttpClient {
    session: HttpSession,
    buffer: BytesMut,
    eof: bool,
}

impl HttpClient {
    /// Create a client over an established session
    pub fn new(session: impl SessionOps + 'static) -> Self {
        HttpClient {
            session: HttpSession::new(session),
            buffer: BytesMut::with_capacity(8192),
            eof: false,
        }
    }

    /// Connect over TCP
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(TcpSession::new(stream)))
    }

    /// Set the timeout for each read and write
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Write raw request bytes
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.session.write_all(data)
    }

    /// Write request bytes in parts, pausing between them
    pub fn send_parts(&mut self, parts: &[&[u8]], pause: Duration) -> Result<()> {
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                thread::sleep(pause);
            }
            self.send(part)?;
        }
        Ok(())
    }

    /// Send a GET request and read its response
    pub fn get(&mut self, uri: &str) -> Result<ClientResponse> {
        self.send(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", uri).as_bytes())?;
        self.receive_response()
    }

    /// Send a request with extra headers and a `Content-Length` body
    pub fn request(
        &mut self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<ClientResponse> {
        let mut wire = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n", method, uri);
        for (name, value) in headers {
            wire.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !body.is_empty() {
            wire.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        wire.push_str("\r\n");

        let mut data = wire.into_bytes();
        data.extend_from_slice(body);
        self.send(&data)?;

        if method.eq_ignore_ascii_case("HEAD") {
            self.receive_head_response()
        } else {
            self.receive_response()
        }
    }

    /// Read the next response, including interim 1xx responses
    pub fn receive_response(&mut self) -> Result<ClientResponse> {
        self.receive(false)
    }

    /// Read the next response to a HEAD request
    pub fn receive_head_response(&mut self) -> Result<ClientResponse> {
        self.receive(true)
    }

    fn receive(&mut self, head_request: bool) -> Result<ClientResponse> {
        let (head, consumed) = loop {
            if let Some(parsed) = parse_response_head(&self.buffer)? {
                break parsed;
            }
            if self.fill()? == 0 {
                return Err(Error::ConnectionClosed);
            }
        };
        self.buffer.advance(consumed);

        let no_body = head_request || !head.status.allows_body() || head.status.is_informational();

        let body = if no_body {
            Vec::new()
        } else if head.headers.has_token("Transfer-Encoding", "chunked") {
            self.read_chunked()?
        } else if let Some(length) = head.headers.get("Content-Length") {
            let length = length
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::InvalidContentLength(length.to_string()))?;
            self.read_exact(length)?
        } else {
            self.read_to_close()?
        };

        Ok(ClientResponse {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        })
    }

    fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }

        let mut temp = [0u8; 4096];
        let n = self.session.read(&mut temp)?;
        if n == 0 {
            self.eof = true;
        }
        self.buffer.extend_from_slice(&temp[..n]);
        Ok(n)
    }

    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>> {
        while self.buffer.len() < length {
            if self.fill()? == 0 {
                return Err(Error::Incomplete);
            }
        }
        Ok(self.buffer.split_to(length).to_vec())
    }

    fn read_chunked(&mut self) -> Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        let mut out = [0u8; 8192];

        loop {
            let (consumed, decoded, complete) = decoder.decode(&self.buffer, &mut out)?;
            self.buffer.advance(consumed);
            body.extend_from_slice(&out[..decoded]);

            if complete {
                return Ok(body);
            }
            if consumed == 0 && decoded == 0 && self.fill()? == 0 {
                return Err(Error::Incomplete);
            }
        }
    }

    fn read_to_close(&mut self) -> Result<Vec<u8>> {
        while self.fill()? > 0 {}
        Ok(self.buffer.split().to_vec())
    }

    /// Whether the server has closed the connection
    ///
    /// Waits up to the session timeout for the close; unread response bytes
    /// count as the connection being open.
    pub fn is_closed(&mut self) -> bool {
        if !self.buffer.is_empty() {
            return false;
        }
        match self.fill() {
            Ok(0) => true,
            Ok(_) => false,
            Err(Error::Timeout) => false,
            // reset by the peer
            Err(_) => true,
        }
    }

    /// Bytes received but not yet consumed by a response
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::testing::MemorySession;

    fn client(input: &[u8]) -> HttpClient {
        let (session, _) = MemorySession::new(input);
        HttpClient::new(session)
    }

    #[test]
    fn test_pipelined_responses() {
        let mut client = client(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK\
              HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nOK\r\n0\r\n\r\n",
        );

        let first = client.receive_response().unwrap();
        assert_eq!(first.status().code(), 200);
        assert_eq!(first.body(), b"OK");

        let second = client.receive_response().unwrap();
        assert_eq!(second.text(), "OK");
        assert!(client.buffered().is_empty());
        assert!(client.is_closed());
    }

    #[test]
    fn test_interim_and_close_delimited() {
        let mut client = client(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nConnection: close\r\n\r\nall of it",
        );

        let interim = client.receive_response().unwrap();
        assert_eq!(interim.status().code(), 100);
        assert!(interim.body().is_empty());

        let response = client.receive_response().unwrap();
        assert!(response.is_close());
        assert_eq!(response.text(), "all of it");
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut client = client(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        let response = client.receive_head_response().unwrap();
        assert_eq!(response.header("Content-Length"), Some("5"));
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_truncated_response() {
        let mut client = client(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nab");
        assert!(matches!(client.receive_response(), Err(Error::Incomplete)));

        let mut client = self::client(b"HTTP/1.1 200 OK\r\n");
        assert!(matches!(
            client.receive_response(),
            Err(Error::ConnectionClosed)
        ));
    }
}
