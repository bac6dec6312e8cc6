//! Message body framing decisions
//!
//! Both directions are decided by a single ordered table each: the request
//! side from the received headers, the response side at commit time from the
//! state of the response.

use super::{Error, Headers, Result, Status, Version};

/// How the request body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFraming {
    /// No body
    Empty,
    /// `Content-Length` bytes
    Fixed(u64),
    /// Chunked transfer coding
    Chunked,
}

/// Choose the request body framing
///
/// 1. `Transfer-Encoding` present: a final `chunked` coding wins over any
///    `Content-Length`; a lone `identity` falls through to the
///    `Content-Length` rules; any other coding is unsupported.
/// 2. `Content-Length` present: fixed length.
/// 3. Otherwise no body.
pub fn request_framing(headers: &Headers) -> Result<RequestFraming> {
    let codings: Vec<&str> = headers.tokens("Transfer-Encoding").collect();
    let has_te = headers.contains("Transfer-Encoding");

    if has_te {
        match codings.split_last() {
            Some((last, rest)) if last.eq_ignore_ascii_case("chunked") => {
                if let Some(other) = rest.iter().find(|c| !c.eq_ignore_ascii_case("identity")) {
                    return Err(Error::UnsupportedTransferEncoding(other.to_string()));
                }
                return Ok(RequestFraming::Chunked);
            }
            Some((last, rest)) if last.eq_ignore_ascii_case("identity") => {
                if let Some(other) = rest.iter().find(|c| !c.eq_ignore_ascii_case("identity")) {
                    return Err(Error::UnsupportedTransferEncoding(other.to_string()));
                }
            }
            Some((last, _)) => {
                return Err(Error::UnsupportedTransferEncoding(last.to_string()));
            }
            None => {
                return Err(Error::UnsupportedTransferEncoding(String::new()));
            }
        }
    }

    match content_length(headers)? {
        Some(0) | None => Ok(RequestFraming::Empty),
        Some(n) => Ok(RequestFraming::Fixed(n)),
    }
}

/// Parse the `Content-Length` header
///
/// Repeated values must agree; `1, 1` is accepted as a single value.
pub fn content_length(headers: &Headers) -> Result<Option<u64>> {
    let mut length = None;

    for value in headers.get_all("Content-Length") {
        for element in value.split(',') {
            let element = element.trim();
            if element.is_empty() || !element.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidContentLength(value.to_string()));
            }
            let n: u64 = element
                .parse()
                .map_err(|_| Error::InvalidContentLength(value.to_string()))?;
            match length {
                Some(prev) if prev != n => {
                    return Err(Error::InvalidContentLength(value.to_string()));
                }
                _ => length = Some(n),
            }
        }
    }

    Ok(length)
}

/// How the response body is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    /// `Content-Length` header with this many body bytes
    ContentLength(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the connection closes
    Close,
    /// Status forbids a body
    None,
}

impl ResponseFraming {
    /// Whether this framing ends the connection after the body
    pub fn closes_connection(&self) -> bool {
        matches!(self, ResponseFraming::Close)
    }
}

/// Response state consulted at commit time
#[derive(Debug, Clone, Copy)]
pub struct CommitInfo {
    pub status: Status,
    pub version: Version,
    /// Length declared by the application, if any
    pub content_length: Option<u64>,
    /// Whether the connection is already known to close after this response
    pub closing: bool,
    /// Whether commit was forced before the application finished writing
    pub flushed: bool,
    /// Body bytes buffered so far
    pub buffered: usize,
}

/// Choose the response body framing
pub fn response_framing(info: &CommitInfo) -> ResponseFraming {
    if !info.status.allows_body() {
        ResponseFraming::None
    } else if let Some(length) = info.content_length {
        ResponseFraming::ContentLength(length)
    } else if info.flushed && info.closing {
        ResponseFraming::Close
    } else if info.flushed && info.version == Version::Http11 {
        ResponseFraming::Chunked
    } else if info.flushed {
        // HTTP/1.0 has no chunking, so an open-ended body is close-delimited
        ResponseFraming::Close
    } else {
        ResponseFraming::ContentLength(info.buffered as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_request_framing_te_overrides_cl() {
        let h = headers(&[("Content-Length", "1"), ("Transfer-Encoding", "chunked")]);
        assert_eq!(request_framing(&h).unwrap(), RequestFraming::Chunked);

        let h = headers(&[("Transfer-Encoding", "Chunked")]);
        assert_eq!(request_framing(&h).unwrap(), RequestFraming::Chunked);
    }

    #[test]
    fn test_request_framing_identity() {
        let h = headers(&[("Transfer-Encoding", "identity"), ("Content-Length", "9")]);
        assert_eq!(request_framing(&h).unwrap(), RequestFraming::Fixed(9));

        let h = headers(&[("Transfer-Encoding", "identity")]);
        assert_eq!(request_framing(&h).unwrap(), RequestFraming::Empty);

        let h = headers(&[("Transfer-Encoding", "identity, chunked")]);
        assert_eq!(request_framing(&h).unwrap(), RequestFraming::Chunked);
    }

    #[test]
    fn test_request_framing_unknown_codings() {
        for coding in ["void", "buffered", "savedrequest", "unsupported", "gzip"] {
            let h = headers(&[("Transfer-Encoding", coding), ("Content-Length", "9")]);
            let err = request_framing(&h).unwrap_err();
            assert_eq!(err.status(), Some(Status::NOT_IMPLEMENTED), "{}", coding);
        }

        // chunked must be the final coding
        let h = headers(&[("Transfer-Encoding", "chunked, gzip")]);
        assert!(request_framing(&h).is_err());
        let h = headers(&[("Transfer-Encoding", "chunked"), ("Transfer-Encoding", "void")]);
        assert!(request_framing(&h).is_err());
        let h = headers(&[("Transfer-Encoding", "")]);
        assert!(request_framing(&h).is_err());
    }

    #[test]
    fn test_content_length() {
        assert_eq!(content_length(&headers(&[])).unwrap(), None);
        assert_eq!(
            content_length(&headers(&[("Content-Length", "42")])).unwrap(),
            Some(42)
        );
        assert_eq!(
            content_length(&headers(&[("Content-Length", "7, 7")])).unwrap(),
            Some(7)
        );

        for bad in ["-1", "abc", "", "1 2", "+5"] {
            let err = content_length(&headers(&[("Content-Length", bad)])).unwrap_err();
            assert_eq!(err.status(), Some(Status::BAD_REQUEST), "{:?}", bad);
        }
        assert!(content_length(&headers(&[("Content-Length", "1"), ("Content-Length", "2")]))
            .is_err());
    }

    fn info(status: u16) -> CommitInfo {
        CommitInfo {
            status: Status::new(status).unwrap(),
            version: Version::Http11,
            content_length: None,
            closing: false,
            flushed: false,
            buffered: 2,
        }
    }

    #[test]
    fn test_response_framing_no_body_statuses() {
        for code in [100, 204, 304] {
            let mut i = info(code);
            i.content_length = Some(10);
            i.flushed = true;
            assert_eq!(response_framing(&i), ResponseFraming::None);
        }
    }

    #[test]
    fn test_response_framing_table() {
        let mut i = info(200);
        assert_eq!(response_framing(&i), ResponseFraming::ContentLength(2));

        i.flushed = true;
        assert_eq!(response_framing(&i), ResponseFraming::Chunked);

        i.closing = true;
        assert_eq!(response_framing(&i), ResponseFraming::Close);

        i.content_length = Some(5);
        assert_eq!(response_framing(&i), ResponseFraming::ContentLength(5));

        let mut i = info(200);
        i.version = Version::Http10;
        i.flushed = true;
        assert_eq!(response_framing(&i), ResponseFraming::Close);
        assert!(response_framing(&i).closes_connection());
    }
}
