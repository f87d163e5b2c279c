//! Connection state machine
//!
//! Tracks each connection from accept to close and keeps the table of live
//! connections the status handler reports on.
//!
//! ```text
//!   Idle ─► Reading ─► Dispatching ─┬─► Streaming ────────┐
//!             │                     ├─► HandlerCompleted ─┼─► Closed
//!             └─────────────────────┴─► Error ────────────┘
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::media::MediaResource;
use crate::stats::ClientStats;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted, nothing read yet
    Idle,
    /// Waiting for the request
    Reading,
    /// Request parsed, resolving the resource
    Dispatching,
    /// Subscribed to a stream resource
    Streaming,
    /// Handler response written
    HandlerCompleted,
    /// Error response written or transport failure
    Error,
    /// Socket closed
    Closed,
}

impl ConnectionPhase {
    /// Whether `next` may follow this phase
    pub fn can_transition(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) | (_, Error) => true,
            (Idle, Reading) => true,
            (Reading, Dispatching) => true,
            (Dispatching, Streaming) | (Dispatching, HandlerCompleted) => true,
            _ => false,
        }
    }
}

/// Addresses of an accepted connection, handed to handlers
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Unique connection ID
    pub id: u64,
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// Local address the connection was accepted on
    pub local_addr: SocketAddr,
    /// Accept time
    pub connected_at: Instant,
}

impl ClientInfo {
    pub fn new(id: u64, peer_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            local_addr,
            connected_at: Instant::now(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.peer_addr.port()
    }

    /// Get connection duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Complete state of one connection
#[derive(Debug)]
pub struct ConnectionState {
    pub info: ClientInfo,
    pub phase: ConnectionPhase,
    /// Resource the connection is streaming from
    pub resource: Option<Arc<MediaResource>>,
    /// Delivery statistics, shared with the resource's subscriber
    pub stats: Arc<Mutex<ClientStats>>,
}

impl ConnectionState {
    pub fn new(info: ClientInfo) -> Self {
        Self {
            info,
            phase: ConnectionPhase::Idle,
            resource: None,
            stats: Arc::new(Mutex::new(ClientStats::new())),
        }
    }

    /// Move to `next` if the transition is allowed
    pub fn transition(&mut self, next: ConnectionPhase) -> bool {
        if !self.phase.can_transition(next) {
            tracing::trace!(
                connection_id = self.info.id,
                from = ?self.phase,
                to = ?next,
                "Ignored phase transition"
            );
            return false;
        }
        self.phase = next;
        true
    }

    /// Bind to a stream resource
    pub fn bind(&mut self, resource: Arc<MediaResource>) {
        if self.transition(ConnectionPhase::Streaming) {
            self.resource = Some(resource);
        }
    }

    /// Close and release the bound resource
    pub fn close(&mut self) -> Option<Arc<MediaResource>> {
        self.transition(ConnectionPhase::Closed);
        self.resource.take()
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == ConnectionPhase::Streaming
    }
}

/// Point-in-time view of a connection for reporting
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub info: ClientInfo,
    pub phase: ConnectionPhase,
    /// Path of the bound resource
    pub path: Option<String>,
    /// Average frame size in bytes
    pub frame_size: u64,
    pub bitrate_kbps: f64,
    pub framerate: u64,
}

/// Table of live connections
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: Mutex<HashMap<u64, ConnectionState>>,
    total: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its stats handle
    pub fn insert(&self, info: ClientInfo) -> Arc<Mutex<ClientStats>> {
        let state = ConnectionState::new(info);
        let stats = Arc::clone(&state.stats);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(state.info.id, state);
        stats
    }

    /// Run `f` on a connection's state
    pub fn update<R>(&self, id: u64, f: impl FnOnce(&mut ConnectionState) -> R) -> Option<R> {
        self.lock().get_mut(&id).map(f)
    }

    /// Transition a connection to `phase`
    pub fn set_phase(&self, id: u64, phase: ConnectionPhase) -> bool {
        self.update(id, |state| state.transition(phase))
            .unwrap_or(false)
    }

    pub fn phase(&self, id: u64) -> Option<ConnectionPhase> {
        self.lock().get(&id).map(|s| s.phase)
    }

    /// Close and drop a connection
    pub fn remove(&self, id: u64) -> Option<ConnectionState> {
        let mut state = self.lock().remove(&id)?;
        state.close();
        Some(state)
    }

    /// Currently open connections
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections accepted since start
    pub fn total_accepted(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn streaming_count(&self) -> usize {
        self.lock().values().filter(|s| s.is_streaming()).count()
    }

    /// Reporting view of every connection, ordered by ID
    pub fn snapshot(&self) -> Vec<ClientSnapshot> {
        let connections = self.lock();
        let mut clients: Vec<ClientSnapshot> = connections
            .values()
            .map(|state| {
                let stats = state.stats.lock().unwrap_or_else(PoisonError::into_inner);
                ClientSnapshot {
                    info: state.info.clone(),
                    phase: state.phase,
                    path: state.resource.as_ref().map(|r| r.path().to_string()),
                    frame_size: stats.ewma_frame_size,
                    bitrate_kbps: stats.bitrate_kbps(),
                    framerate: stats.framerate(),
                }
            })
            .collect();
        clients.sort_by_key(|c| c.info.id);
        clients
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ConnectionState>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
