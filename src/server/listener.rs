//! HTTP server listener
//!
//! Handles address resolution, the accept loop and connection tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::handlers::RequestHandler;
use crate::http::StreamFormat;
use crate::media::{CapturePattern, MediaResource, PipelineSpec, ProducerFactory};
use crate::registry::MediaRegistry;
use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, ServerContext};
use crate::server::state::{ClientInfo, ConnectionTable};
use crate::stats::ServerStats;

/// Options for a stream resource registered with [`HttpServer::add_stream`]
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub description: Option<String>,
    pub format: StreamFormat,
    pub capture: Option<CapturePattern>,
}

impl StreamOptions {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn format(mut self, format: StreamFormat) -> Self {
        self.format = format;
        self
    }

    pub fn capture(mut self, pattern: CapturePattern) -> Self {
        self.capture = Some(pattern);
        self
    }
}

/// Clonable handle used to stop a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting, close every connection and stop all producers
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// HTTP stream server
pub struct HttpServer {
    context: ServerContext,
    factory: Arc<dyn ProducerFactory>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: Arc<watch::Sender<bool>>,
    started_at: Instant,
}

impl HttpServer {
    /// Create a new server with the given configuration and producer factory
    pub fn new(config: ServerConfig, factory: Arc<dyn ProducerFactory>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (shutdown, _) = watch::channel(false);

        Self {
            context: ServerContext {
                config: Arc::new(config),
                registry: Arc::new(MediaRegistry::new()),
                connections: Arc::new(ConnectionTable::new()),
            },
            factory,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown: Arc::new(shutdown),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Get a reference to the resource registry
    pub fn registry(&self) -> &Arc<MediaRegistry> {
        &self.context.registry
    }

    /// Get a reference to the live connection table
    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.context.connections
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Register a stream resource produced by this server's factory
    pub fn add_stream(
        &self,
        path: &str,
        pipeline: &str,
        options: StreamOptions,
    ) -> Result<Arc<MediaResource>> {
        let spec = PipelineSpec::parse(pipeline)?;
        let mut resource =
            MediaResource::stream(spec, Arc::clone(&self.factory)).format(options.format);
        if let Some(description) = options.description {
            resource = resource.description(description);
        }
        if let Some(pattern) = options.capture {
            resource = resource.capture(pattern);
        }
        Ok(self.context.registry.add(path, resource)?)
    }

    /// Register a synchronous handler
    pub fn add_handler<H: RequestHandler>(&self, path: &str, handler: H) -> Result<Arc<MediaResource>> {
        Ok(self.context.registry.add(path, MediaResource::handler(handler))?)
    }

    /// Register a prepared resource
    pub fn add_resource(&self, path: &str, resource: MediaResource) -> Result<Arc<MediaResource>> {
        Ok(self.context.registry.add(path, resource)?)
    }

    /// Unregister a resource, disconnecting its subscribers
    pub async fn remove(&self, path: &str) -> Result<Arc<MediaResource>> {
        Ok(self.context.registry.remove(path).await?)
    }

    /// Server-wide statistics
    pub fn stats(&self) -> ServerStats {
        let connections = &self.context.connections;
        ServerStats {
            total_connections: connections.total_accepted(),
            active_connections: connections.len() as u64,
            streaming_connections: connections.streaming_count() as u64,
            resources: self.context.registry.len() as u64,
            uptime: self.started_at.elapsed(),
        }
    }

    /// Resolve and bind the configured address
    ///
    /// Every resolved candidate is tried in order until one binds.
    pub async fn listen(&self) -> Result<TcpListener> {
        let config = &self.context.config;
        let port = config
            .port()
            .ok_or_else(|| Error::Config(format!("invalid service '{}'", config.service)))?;
        let target = format!("{}:{}", config.address, port);

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((config.address.as_str(), port))
            .await
            .map_err(|_| Error::Resolve(target.clone()))?
            .collect();
        if candidates.is_empty() {
            return Err(Error::Resolve(target));
        }

        let mut last_error = None;
        for addr in candidates {
            match bind(addr, config.backlog) {
                Ok(listener) => {
                    tracing::info!(addr = %addr, "HTTP server listening");
                    return Ok(listener);
                }
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "Bind candidate failed");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Bind {
            address: target,
            source: last_error
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address")),
        })
    }

    /// Run the server
    ///
    /// This method returns after [`ServerHandle::shutdown`] was called.
    pub async fn run(&self) -> Result<()> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.listen().await?;
        let handle = self.handle();

        tokio::select! {
            result = self.serve(listener) => result,
            _ = async {
                shutdown.await;
                tracing::info!("Shutdown signal received");
                handle.shutdown();
                std::future::pending::<()>().await
            } => Ok(()),
        }
    }

    /// Accept connections on `listener` until shutdown
    ///
    /// On shutdown the listener is closed, every stream resource is stopped
    /// and all connection tasks are awaited.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(&mut tasks, socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(connections = tasks.len(), "Shutting down");

        self.context.registry.stop_all().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Connection task failed");
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    fn handle_connection(&self, tasks: &mut JoinSet<()>, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let local_addr = match socket.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(peer = %peer_addr, error = %e, "Failed to read local address");
                return;
            }
        };

        // Configure socket
        if self.context.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, peer = %peer_addr, "New connection");

        let info = ClientInfo::new(id, peer_addr, local_addr);
        let context = self.context.clone();
        let stats = context.connections.insert(info.clone());
        let shutdown = self.shutdown.subscribe();

        tasks.spawn(async move {
            let _permit = permit;
            let connections = Arc::clone(&context.connections);
            let connection = Connection::new(info, socket, context, stats, shutdown);

            if let Err(e) = connection.run().await {
                tracing::debug!(connection_id = id, error = %e, "Connection error");
            }

            connections.remove(id);
            tracing::debug!(connection_id = id, "Connection closed");
        });
    }
}

fn bind(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
