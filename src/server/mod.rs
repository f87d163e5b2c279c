//! HTTP server
//!
//! The server owns the listening socket, the resource registry and the table
//! of live connections. Every accepted socket runs in its own task:
//!
//! ```text
//!   accept ─► Connection::run ─► read request ─► registry.find
//!                                                  │
//!                        ┌─────────────────────────┴──────────┐
//!                        ▼                                    ▼
//!               handler.handle() ─► write ─► close   resource.attach(write half)
//!                                                    wait: peer close | resource | shutdown
//!                                                    resource.detach
//! ```

pub mod config;
pub(crate) mod connection;
pub mod listener;
pub mod state;

pub use config::ServerConfig;
pub use listener::{HttpServer, ServerHandle, StreamOptions};
pub use state::{ClientInfo, ClientSnapshot, ConnectionPhase, ConnectionState, ConnectionTable};
