//! Minimal HTTP/1.0 subset
//!
//! One request per connection, no keep-alive, no chunked encoding. Enough to
//! drive an `<img>` tag pointed at a `multipart/x-mixed-replace` stream.

pub mod request;
pub mod response;

pub use request::Request;
pub use response::{
    http_date, status_response, stream_preamble, Response, StatusCode, StreamFormat,
    MULTIPART_BOUNDARY,
};
