//! Server status as JSON
//!
//! ```json
//! {
//!   "media":   [{ "path": "cam", "desc": "Front door" }],
//!   "clients": [{ "path": "/cam", "framesize": 42, "bitrate": 1234.5,
//!                 "framerate": 15, "ip": "10.0.0.7", "port": 51234 }],
//!   "cpu":     { "usr": 3.5, "sys": 1.0, ... },
//!   "memory":  { "used": 1024, "free": 512, "buffers": 64, "cached": 256 },
//!   "load":    "0.10 0.20 0.30 1/100 42"
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::handlers::{HandlerAction, RequestHandler};
use crate::http::{Request, Response, StatusCode};
use crate::registry::MediaRegistry;
use crate::server::{ClientInfo, ConnectionTable};
use crate::stats::{CpuUsage, MemoryInfo, SystemStats};

#[derive(Debug, Serialize)]
struct MediaEntry {
    path: String,
    desc: String,
}

#[derive(Debug, Serialize)]
struct ClientEntry {
    path: String,
    /// Average frame size in KiB
    framesize: u64,
    /// kbit/s
    bitrate: f64,
    framerate: u64,
    ip: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    media: Vec<MediaEntry>,
    clients: Vec<ClientEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<CpuUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<MemoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    load: Option<String>,
}

/// Reports resources, streaming clients and host diagnostics
pub struct StatusHandler {
    registry: Arc<MediaRegistry>,
    connections: Arc<ConnectionTable>,
    system: Option<Arc<SystemStats>>,
}

impl StatusHandler {
    pub fn new(registry: Arc<MediaRegistry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            registry,
            connections,
            system: None,
        }
    }

    /// Include CPU, memory and load figures
    pub fn with_system_stats(mut self, system: Arc<SystemStats>) -> Self {
        self.system = Some(system);
        self
    }

    fn report(&self, client: &ClientInfo) -> StatusReport {
        let media = self
            .registry
            .resources()
            .iter()
            .filter_map(|resource| {
                let desc = resource.get_description()?;
                let path = resource.path();
                let path = match path.strip_prefix('/') {
                    Some(rest) if !rest.is_empty() => rest,
                    _ => path,
                };
                Some(MediaEntry {
                    path: path.to_string(),
                    desc: desc.to_string(),
                })
            })
            .collect();

        let clients = self
            .connections
            .snapshot()
            .into_iter()
            .filter(|c| c.info.id != client.id)
            .filter_map(|c| {
                Some(ClientEntry {
                    path: c.path?,
                    framesize: c.frame_size / 1024,
                    bitrate: c.bitrate_kbps,
                    framerate: c.framerate,
                    ip: c.info.ip().to_string(),
                    port: c.info.port(),
                })
            })
            .collect();

        let system = self.system.as_deref();
        StatusReport {
            media,
            clients,
            cpu: system.map(SystemStats::cpu),
            memory: system.and_then(SystemStats::memory),
            load: system.and_then(SystemStats::load),
        }
    }
}

impl RequestHandler for StatusHandler {
    fn handle(&self, _request: &Request, client: &ClientInfo, response: &mut Response) -> HandlerAction {
        tracing::info!(peer = %client.peer_addr, "Serving server status");

        match serde_json::to_vec_pretty(&self.report(client)) {
            Ok(body) => {
                response
                    .header("Cache-Control", "no-cache")
                    .header("Content-Type", "application/json")
                    .header("Content-Length", body.len().to_string())
                    .body(&body);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode status");
                response.status = StatusCode::InternalServerError;
            }
        }
        HandlerAction::Close
    }
}
