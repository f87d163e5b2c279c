//! HTTP/1.0 request parsing
//!
//! Only the request line is interpreted. The request must arrive in a single
//! read; anything beyond the buffer is ignored.
//!
//! ```text
//! GET /stream?fps=5&q=80 HTTP/1.0\r\n
//! ^^^ ^^^^^^^ ^^^^^^^^^^ ^^^^^^^^
//! method path  query      ignored
//! ```

use std::fmt;

/// A parsed request line plus raw header lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method token (`GET`, `HEAD`, ...)
    pub method: String,
    /// Absolute path, always starts with `/`
    pub path: String,
    /// Raw text after `?`, if present
    pub query: Option<String>,
    /// `query` split on `&`, no URL-decoding
    pub query_fields: Vec<String>,
    /// Header lines after the request line, unparsed
    pub headers: Vec<String>,
}

impl Request {
    /// Parse the bytes of one read
    ///
    /// Returns `None` when the request line lacks a method or an absolute
    /// path; such requests are answered with `404`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(buf);
        let mut lines = text.split("\r\n");

        let first = lines.next()?;
        let mut tokens = first.split_whitespace();
        let method = tokens.next()?;
        let target = tokens.next()?;

        if !target.starts_with('/') {
            return None;
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let query_fields = match query {
            Some(q) if !q.is_empty() => q.split('&').map(str::to_string).collect(),
            _ => Vec::new(),
        };

        let headers = lines
            .take_while(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        Some(Self {
            method: method.to_string(),
            path: path.to_string(),
            query: query.map(str::to_string),
            query_fields,
            headers,
        })
    }

    /// Whether this request may be routed to a resource
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Look up a query field by case-insensitive name prefix
    ///
    /// Returns the text after the first `=` of the first matching field.
    pub fn query_field(&self, name: &str) -> Option<&str> {
        self.query_fields.iter().find_map(|field| {
            let head = field.get(..name.len())?;
            if !head.eq_ignore_ascii_case(name) {
                return None;
            }
            field.split_once('=').map(|(_, value)| value)
        })
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    /// Value of the `Content-Length` header
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.parse().ok()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{} {}?{}", self.method, self.path, q),
            None => write!(f, "{} {}", self.method, self.path),
        }
    }
}
