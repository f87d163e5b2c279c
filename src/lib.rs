//! Embedded HTTP/1.0 server multiplexing live MJPEG streams
//!
//! A small number of capture pipelines are fanned out to any number of HTTP
//! clients from a single reactor. Producers start lazily with the first
//! subscriber and stop when the last one leaves. Synchronous handlers (status
//! JSON, static pages) share the same listener.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mjpeg_httpd::media::CommandProducerFactory;
//! use mjpeg_httpd::{HttpServer, ServerConfig, StreamOptions};
//!
//! # async fn run() -> mjpeg_httpd::Result<()> {
//! let server = HttpServer::new(
//!     ServerConfig::with_addr("0.0.0.0", "8080"),
//!     Arc::new(CommandProducerFactory::new()),
//! );
//! server.add_stream("/cam", "/dev/video0 med", StreamOptions::default())?;
//! server.run().await
//! # }
//! ```

pub mod config_file;
pub mod error;
pub mod handlers;
pub mod http;
pub mod media;
pub mod registry;
pub mod server;
pub mod stats;

pub use error::{Error, Result, StartError};
pub use handlers::{HandlerAction, RequestHandler};
pub use media::{Frame, FrameSink, MediaResource, Producer, ProducerFactory};
pub use registry::MediaRegistry;
pub use server::{HttpServer, ServerConfig, ServerHandle, StreamOptions};
