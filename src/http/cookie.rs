//! Request cookie parsing

use std::fmt;

/// A cookie sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
}

impl Cookie {
    /// Create a cookie
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Cookie name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value, without surrounding quotes
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Parse one `Cookie` header value
///
/// Pairs are separated by `;` (or `,` for RFC 2109 clients). `$`-prefixed
/// attributes such as `$Version` and `$Path` are skipped, as are pairs with
/// an empty or invalid name.
pub fn parse_cookie_header(value: &str, cookies: &mut Vec<Cookie>) {
    for pair in value.split([';', ',']) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (pair, ""),
        };

        if name.is_empty()
            || name.starts_with('$')
            || !name.bytes().all(super::message::is_token_byte)
        {
            continue;
        }

        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        cookies.push(Cookie::new(name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> Vec<Cookie> {
        let mut cookies = Vec::new();
        parse_cookie_header(value, &mut cookies);
        cookies
    }

    #[test]
    fn test_parse_pairs() {
        let cookies = parse("something.that.should.not.leak=true; b=2");
        assert_eq!(
            cookies,
            vec![
                Cookie::new("something.that.should.not.leak", "true"),
                Cookie::new("b", "2")
            ]
        );
    }

    #[test]
    fn test_quoted_and_attributes() {
        let cookies = parse("$Version=1; session=\"abc def\"; $Path=/");
        assert_eq!(cookies, vec![Cookie::new("session", "abc def")]);
    }

    #[test]
    fn test_skips_malformed() {
        let cookies = parse(";; =value; bad name=1; flag");
        assert_eq!(cookies, vec![Cookie::new("flag", "")]);
    }
}
