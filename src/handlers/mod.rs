//! Synchronous request handlers
//!
//! A handler resource answers a request in one call by filling in a
//! [`Response`]. Closures with the right signature are handlers:
//!
//! ```no_run
//! use mjpeg_httpd::handlers::HandlerAction;
//! use mjpeg_httpd::http::{Request, Response};
//! use mjpeg_httpd::server::ClientInfo;
//!
//! let hello = |_: &Request, _: &ClientInfo, response: &mut Response| {
//!     response.header("Content-Type", "text/plain").body_line("hello");
//!     HandlerAction::Close
//! };
//! # let _ = hello;
//! ```

pub mod static_files;
pub mod status;

use crate::http::{Request, Response};
use crate::server::ClientInfo;

pub use static_files::StaticFiles;
pub use status::StatusHandler;

/// What the connection does after the response is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Close the connection
    Close,
    /// Keep the connection open until the peer closes or the server stops
    KeepOpen,
}

/// Synchronous request handler
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &Request, client: &ClientInfo, response: &mut Response)
        -> HandlerAction;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request, &ClientInfo, &mut Response) -> HandlerAction + Send + Sync + 'static,
{
    fn handle(
        &self,
        request: &Request,
        client: &ClientInfo,
        response: &mut Response,
    ) -> HandlerAction {
        self(request, client, response)
    }
}
