//! HTTP message head parsing
//!
//! This module parses request heads for the processor and response heads for
//! the test client. Bodies are framed separately (see `framing` and
//! `chunked`), so parsers only report how many bytes the head occupied and
//! leave everything after it in the caller's buffer.

use super::{Error, Headers, Method, Result, Status, Version, MAX_HEADERS};

/// Parse HTTP request line
///
/// Format: METHOD SP REQUEST-TARGET SP VERSION
/// Example: GET /index.html HTTP/1.1
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split(' ').collect();

    if parts.len() != 3 {
        return Err(Error::Parse(format!(
            "Invalid request line: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let method = Method::parse(parts[0])?;
    let target = parts[1];
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_control()) {
        return Err(Error::Parse(format!("Invalid request target: {:?}", target)));
    }
    let version = Version::parse(parts[2])?;

    Ok((method, target.to_string(), version))
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::parse(parts[0])?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = if parts.len() == 3 {
        parts[2].to_string()
    } else {
        status.reason_phrase().to_string()
    };

    Ok((version, status, reason))
}

/// Locate the end of a message head
///
/// Returns the offset just past the empty line terminating the head. Bare LF
/// line endings are tolerated.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' {
            let line = &buf[line_start..i];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() && line_start > 0 {
                return Some(i + 1);
            }
            line_start = i + 1;
        }
    }
    None
}

/// Decode a head line: UTF-8 when valid, ISO-8859-1 otherwise
fn decode_line(line: &[u8]) -> String {
    match std::str::from_utf8(line) {
        Ok(s) => s.to_string(),
        Err(_) => line.iter().map(|&b| b as char).collect(),
    }
}

/// Split a complete head into its lines, without terminators
fn head_lines(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    head.split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .take_while(|l| !l.is_empty())
}

fn parse_header_block<'a>(lines: impl Iterator<Item = &'a [u8]>) -> Result<Headers> {
    let mut headers = Headers::new();
    for line in lines {
        if line[0] == b' ' || line[0] == b'\t' {
            return Err(Error::InvalidHeader("Folded header line".to_string()));
        }
        if headers.len() >= MAX_HEADERS {
            return Err(Error::Parse(format!("More than {} headers", MAX_HEADERS)));
        }
        let (name, value) = Headers::parse_header_line(&decode_line(line))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

/// HTTP request head parser
pub struct RequestParser {
    max_header_size: usize,
}

impl RequestParser {
    /// Create a new request parser with a limit on the head size
    pub fn new(max_header_size: usize) -> Self {
        RequestParser { max_header_size }
    }

    /// Try to parse a request head from the start of `buf`
    ///
    /// Returns Ok(Some((head, consumed))) when a complete head is present,
    /// Ok(None) if more data is needed, or Err on a malformed or oversized
    /// head. Empty lines before the request line are skipped.
    pub fn parse(&self, buf: &[u8]) -> Result<Option<(RequestHead, usize)>> {
        let skip = buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();

        let end = match find_head_end(&buf[skip..]) {
            Some(end) => end,
            None => {
                if buf.len() > self.max_header_size {
                    return Err(Error::HeaderTooLarge(self.max_header_size));
                }
                return Ok(None);
            }
        };

        if end > self.max_header_size {
            return Err(Error::HeaderTooLarge(self.max_header_size));
        }

        let mut lines = head_lines(&buf[skip..skip + end]);
        let request_line = lines
            .next()
            .ok_or_else(|| Error::Parse("Missing request line".to_string()))?;
        let (method, target, version) = parse_request_line(&decode_line(request_line))?;
        let headers = parse_header_block(lines)?;

        Ok(Some((
            RequestHead {
                method,
                target,
                version,
                headers,
            },
            skip + end,
        )))
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(8192)
    }
}

/// Parsed status line and headers
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: Status,
    pub reason: String,
    pub headers: Headers,
}

/// Try to parse a response head from the start of `buf`
///
/// Returns Ok(Some((head, consumed))) when a complete head is present and
/// Ok(None) if more data is needed.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>> {
    let end = match find_head_end(buf) {
        Some(end) => end,
        None => return Ok(None),
    };

    let mut lines = head_lines(&buf[..end]);
    let status_line = lines
        .next()
        .ok_or_else(|| Error::Parse("Missing status line".to_string()))?;
    let (version, status, reason) = parse_status_line(&decode_line(status_line))?;
    let headers = parse_header_block(lines)?;

    Ok(Some((
        ResponseHead {
            version,
            status,
            reason,
            headers,
        },
        end,
    )))
}
