//! HTTP/1.0 response framing
//!
//! Every response is `HTTP/1.0 <code> <reason>`, a `Server` header, optional
//! further headers and a blank line. Stream responses then continue with
//! frames:
//!
//! ```text
//! multipart/x-mixed-replace              image/jpeg (one-shot)
//!
//! \r\n                                   Content-Length: N\r\n
//! ----gst-mjpg-ns-boundary--\r\n         \r\n
//! Content-Type: image/jpeg\r\n           <N bytes>            -> close
//! Content-Length: N\r\n
//! \r\n
//! <N bytes>
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Token separating the parts of a multipart stream
pub const MULTIPART_BOUNDARY: &str = "--gst-mjpg-ns-boundary--";

/// Response status codes used by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    NotFound,
    UnsupportedMediaType,
    InternalServerError,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NotFound => 404,
            StatusCode::UnsupportedMediaType => 415,
            StatusCode::InternalServerError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NotFound => "Not Found",
            StatusCode::UnsupportedMediaType => "Unsupported Media Type",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Content type delivered by a stream resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    /// Single JPEG, connection closes after the first frame
    Jpeg,
    /// Endless `multipart/x-mixed-replace` stream of JPEGs
    #[default]
    Multipart,
}

impl StreamFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            StreamFormat::Jpeg => "image/jpeg",
            StreamFormat::Multipart => "multipart/x-mixed-replace",
        }
    }

    /// Whether the subscriber is closed after one frame
    pub fn is_one_shot(&self) -> bool {
        matches!(self, StreamFormat::Jpeg)
    }

    /// Framing written in front of each frame
    pub fn frame_header(&self, len: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        match self {
            StreamFormat::Multipart => {
                buf.put_slice(b"\r\n");
                put_line(&mut buf, &format!("--{}", MULTIPART_BOUNDARY));
                put_line(&mut buf, "Content-Type: image/jpeg");
                put_line(&mut buf, &format!("Content-Length: {}", len));
                buf.put_slice(b"\r\n");
            }
            StreamFormat::Jpeg => {
                put_line(&mut buf, &format!("Content-Length: {}", len));
                buf.put_slice(b"\r\n");
            }
        }
        buf.freeze()
    }
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "image/jpeg" => Ok(StreamFormat::Jpeg),
            "multipart/x-mixed-replace" => Ok(StreamFormat::Multipart),
            other => Err(format!("unsupported stream type '{}'", other)),
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Response filled in by request handlers
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl Response {
    pub fn new() -> Self {
        Self::with_status(StatusCode::Ok)
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    /// Append a header line
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append raw body bytes
    pub fn body(&mut self, data: &[u8]) -> &mut Self {
        self.body.put_slice(data);
        self
    }

    /// Append a body line terminated with CRLF
    pub fn body_line(&mut self, line: &str) -> &mut Self {
        put_line(&mut self.body, line);
        self
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Serialize status line, headers, blank line and body
    pub fn encode(&self, server_name: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        put_status(&mut buf, self.status, server_name);
        for (name, value) in &self.headers {
            put_line(&mut buf, &format!("{}: {}", name, value));
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Bodyless response carrying only a status, e.g. `404 Not Found`
pub fn status_response(status: StatusCode, server_name: &str) -> Bytes {
    Response::with_status(status).encode(server_name)
}

/// The `200 OK` preamble sent before the first frame of a stream
///
/// For one-shot JPEG the header block stays open: `Content-Length` and the
/// blank line are written together with the frame.
pub fn stream_preamble(format: StreamFormat, server_name: &str, now: SystemTime) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    put_status(&mut buf, StatusCode::Ok, server_name);
    match format {
        StreamFormat::Jpeg => {
            put_line(&mut buf, &format!("Content-Type: {}", format.mime_type()));
        }
        StreamFormat::Multipart => {
            put_line(
                &mut buf,
                &format!(
                    "Content-Type: {}; boundary={}",
                    format.mime_type(),
                    MULTIPART_BOUNDARY
                ),
            );
            put_line(&mut buf, &format!("Expires: {}", http_date(now)));
            buf.put_slice(b"\r\n");
        }
    }
    buf.freeze()
}

/// Format a timestamp as an RFC-1123 date
pub fn http_date(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn put_status(buf: &mut BytesMut, status: StatusCode, server_name: &str) {
    put_line(buf, &format!("HTTP/1.0 {}", status));
    put_line(buf, &format!("Server: {}", server_name));
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}
