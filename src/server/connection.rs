//! Per-connection task
//!
//! Reads one request, resolves it through the registry and either writes a
//! handler response or hands the write half of the socket to a stream
//! resource. A streaming connection then only waits for the end: peer close,
//! a close notification from the resource, or server shutdown.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};

use crate::error::Result;
use crate::handlers::{HandlerAction, RequestHandler};
use crate::http::{status_response, stream_preamble, Request, Response, StatusCode};
use crate::media::{AttachError, CloseReason, MediaResource, ResourceKind, Subscriber};
use crate::registry::MediaRegistry;
use crate::server::config::ServerConfig;
use crate::server::state::{ClientInfo, ConnectionPhase, ConnectionTable};
use crate::stats::ClientStats;

/// State shared by all connections of a server
#[derive(Clone)]
pub(crate) struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<MediaRegistry>,
    pub connections: Arc<ConnectionTable>,
}

/// How a streaming connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// The resource dropped the subscriber
    Resource(CloseReason),
    /// Peer closed its side or the read failed
    PeerClosed,
    /// Server shutting down
    Shutdown,
}

/// One accepted connection
pub(crate) struct Connection<S> {
    info: ClientInfo,
    socket: S,
    context: ServerContext,
    stats: Arc<Mutex<ClientStats>>,
    shutdown: watch::Receiver<bool>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        info: ClientInfo,
        socket: S,
        context: ServerContext,
        stats: Arc<Mutex<ClientStats>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            info,
            socket,
            context,
            stats,
            shutdown,
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.context.connections.set_phase(self.info.id, phase);
    }

    fn server_name(&self) -> &str {
        &self.context.config.server_name
    }

    /// Drive the connection until it is done
    pub async fn run(mut self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Ok(());
        }

        self.set_phase(ConnectionPhase::Reading);
        let mut buf = vec![0u8; self.context.config.read_buffer_size];
        let n = tokio::select! {
            read = self.socket.read(&mut buf) => read?,
            _ = self.shutdown.changed() => return Ok(()),
        };
        if n == 0 {
            tracing::debug!(connection_id = self.info.id, "Peer closed before sending a request");
            return Ok(());
        }

        self.set_phase(ConnectionPhase::Dispatching);
        let request = Request::parse(&buf[..n]);
        let resource = match &request {
            Some(req) if req.is_get() => self.context.registry.find(&req.path),
            _ => None,
        };

        let (request, resource) = match (request, resource) {
            (Some(request), Some(resource)) => (request, resource),
            (request, _) => {
                tracing::debug!(
                    connection_id = self.info.id,
                    peer = %self.info.peer_addr,
                    request = ?request.map(|r| r.to_string()),
                    "No resource for request"
                );
                return self.respond_status(StatusCode::NotFound).await;
            }
        };

        tracing::debug!(
            connection_id = self.info.id,
            peer = %self.info.peer_addr,
            request = %request,
            resource = %resource.path(),
            "Dispatching request"
        );

        let handler = match resource.kind() {
            ResourceKind::Handler(handler) => Some(Arc::clone(handler)),
            ResourceKind::Stream(_) => None,
        };
        match handler {
            Some(handler) => self.serve_handler(&request, handler.as_ref()).await,
            None => self.serve_stream(resource).await,
        }
    }

    async fn respond_status(mut self, status: StatusCode) -> Result<()> {
        self.set_phase(ConnectionPhase::Error);
        let response = status_response(status, self.server_name());
        self.socket.write_all(&response).await?;
        self.socket.shutdown().await?;
        Ok(())
    }

    async fn serve_handler(mut self, request: &Request, handler: &dyn RequestHandler) -> Result<()> {
        let mut response = Response::new();
        let action = handler.handle(request, &self.info, &mut response);
        self.set_phase(ConnectionPhase::HandlerCompleted);

        tracing::debug!(
            connection_id = self.info.id,
            status = %response.status,
            action = ?action,
            "Handler completed"
        );

        let bytes = response.encode(self.server_name());
        self.socket.write_all(&bytes).await?;
        self.socket.flush().await?;

        match action {
            HandlerAction::Close => self.socket.shutdown().await?,
            HandlerAction::KeepOpen => {
                let mut socket = self.socket;
                wait_for_close(&mut socket, &mut self.shutdown).await;
            }
        }
        Ok(())
    }

    async fn serve_stream(self, resource: Arc<MediaResource>) -> Result<()> {
        let id = self.info.id;
        let format = match resource.kind() {
            ResourceKind::Stream(stream) => stream.format(),
            ResourceKind::Handler(_) => return self.respond_status(StatusCode::InternalServerError).await,
        };

        let Connection {
            info,
            socket,
            context,
            stats,
            mut shutdown,
        } = self;
        let server_name = context.config.server_name.as_str();

        let (mut reader, writer) = tokio::io::split(socket);
        let (closed_tx, closed_rx) = oneshot::channel();
        let subscriber = Subscriber::new(id, writer, stats, closed_tx);
        let preamble = stream_preamble(format, server_name, SystemTime::now());

        match resource.attach(subscriber, preamble).await {
            Ok(subscribers) => {
                tracing::debug!(
                    connection_id = id,
                    peer = %info.peer_addr,
                    path = %resource.path(),
                    subscribers,
                    "Streaming"
                );
            }
            Err(AttachError::Start { error, subscriber }) => {
                context.connections.set_phase(id, ConnectionPhase::Error);
                tracing::warn!(
                    connection_id = id,
                    path = %resource.path(),
                    error = %error,
                    "Stream unavailable"
                );
                let mut writer = subscriber.into_writer();
                writer
                    .write_all(&status_response(StatusCode::UnsupportedMediaType, server_name))
                    .await?;
                writer.shutdown().await?;
                return Ok(());
            }
            Err(AttachError::Write(e)) => {
                context.connections.set_phase(id, ConnectionPhase::Error);
                return Err(e.into());
            }
        }

        context
            .connections
            .update(id, |state| state.bind(Arc::clone(&resource)));

        let end = wait_for_end(&mut reader, closed_rx, &mut shutdown).await;
        resource.detach(id).await;

        tracing::debug!(connection_id = id, path = %resource.path(), end = ?end, "Stream ended");
        Ok(())
    }
}

/// Wait until the stream is over for this connection
///
/// Input from the peer is read and discarded; it only serves to notice that
/// the peer went away.
pub(crate) async fn wait_for_end<R>(
    reader: &mut R,
    mut closed: oneshot::Receiver<CloseReason>,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd
where
    R: AsyncRead + Unpin,
{
    let mut discard = [0u8; 512];
    loop {
        tokio::select! {
            reason = &mut closed => {
                return StreamEnd::Resource(reason.unwrap_or(CloseReason::Detached));
            }
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => return StreamEnd::PeerClosed,
                Ok(_) => {}
            },
            _ = shutdown.changed() => return StreamEnd::Shutdown,
        }
    }
}

async fn wait_for_close<R>(reader: &mut R, shutdown: &mut watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    let mut discard = [0u8; 512];
    loop {
        tokio::select! {
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::io::duplex;

    use super::*;

    fn context() -> ServerContext {
        ServerContext {
            config: Arc::new(ServerConfig::default().server_name("test")),
            registry: Arc::new(MediaRegistry::new()),
            connections: Arc::new(ConnectionTable::new()),
        }
    }

    fn spawn_connection<S>(
        context: &ServerContext,
        socket: S,
    ) -> (tokio::task::JoinHandle<Result<()>>, watch::Sender<bool>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let info = ClientInfo::new(1, addr, addr);
        let stats = context.connections.insert(info.clone());
        let (tx, rx) = watch::channel(false);
        let connection = Connection::new(info, socket, context.clone(), stats, rx);
        (tokio::spawn(connection.run()), tx)
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let context = context();
        let socket = tokio_test::io::Builder::new()
            .read(b"GET /missing HTTP/1.0\r\n\r\n")
            .write(b"HTTP/1.0 404 Not Found\r\nServer: test\r\n\r\n")
            .build();

        let (task, _tx) = spawn_connection(&context, socket);
        task.await.unwrap().unwrap();
        assert_eq!(context.connections.phase(1), Some(ConnectionPhase::Error));
    }

    #[tokio::test]
    async fn test_non_get_is_404() {
        let context = context();
        context
            .registry
            .add("*", MediaResource::handler(|_: &Request, _: &ClientInfo, _: &mut Response| {
                HandlerAction::Close
            }))
            .unwrap();
        let socket = tokio_test::io::Builder::new()
            .read(b"POST /x HTTP/1.0\r\n\r\n")
            .write(b"HTTP/1.0 404 Not Found\r\nServer: test\r\n\r\n")
            .build();

        let (task, _tx) = spawn_connection(&context, socket);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handler_response() {
        let context = context();
        context
            .registry
            .add(
                "/hello",
                MediaResource::handler(|req: &Request, client: &ClientInfo, resp: &mut Response| {
                    resp.header("Content-Type", "text/plain")
                        .body_line(&format!("{} from {}", req.query_field("name").unwrap_or("?"), client.port()));
                    HandlerAction::Close
                }),
            )
            .unwrap();
        let socket = tokio_test::io::Builder::new()
            .read(b"GET /hello?name=cam HTTP/1.0\r\n\r\n")
            .write(b"HTTP/1.0 200 OK\r\nServer: test\r\nContent-Type: text/plain\r\n\r\ncam from 5000\r\n")
            .build();

        let (task, _tx) = spawn_connection(&context, socket);
        task.await.unwrap().unwrap();
        assert_eq!(
            context.connections.phase(1),
            Some(ConnectionPhase::HandlerCompleted)
        );
    }

    #[tokio::test]
    async fn test_keep_open_handler_waits_for_shutdown() {
        let context = context();
        context
            .registry
            .add(
                "/events",
                MediaResource::handler(|_: &Request, _: &ClientInfo, _: &mut Response| {
                    HandlerAction::KeepOpen
                }),
            )
            .unwrap();
        let (mut client, server) = duplex(4096);
        let (task, tx) = spawn_connection(&context, server);

        client.write_all(b"GET /events HTTP/1.0\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"HTTP/1.0 200 OK\r\n"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_before_request() {
        let context = context();
        let socket = tokio_test::io::Builder::new().build();
        let (task, _tx) = spawn_connection(&context, socket);
        task.await.unwrap().unwrap();
        assert_eq!(context.connections.phase(1), Some(ConnectionPhase::Reading));
    }

    #[tokio::test]
    async fn test_wait_for_end_variants() {
        let (_tx, mut shutdown) = watch::channel(false);

        let (closed_tx, closed_rx) = oneshot::channel();
        closed_tx.send(CloseReason::Completed).unwrap();
        let (_client, mut server) = duplex(64);
        assert_eq!(
            wait_for_end(&mut server, closed_rx, &mut shutdown).await,
            StreamEnd::Resource(CloseReason::Completed)
        );

        let (_closed_tx, closed_rx) = oneshot::channel();
        let (client, mut server) = duplex(64);
        drop(client);
        assert_eq!(
            wait_for_end(&mut server, closed_rx, &mut shutdown).await,
            StreamEnd::PeerClosed
        );

        let (tx, mut shutdown) = watch::channel(false);
        let (_closed_tx, closed_rx) = oneshot::channel();
        let (_client, mut server) = duplex(64);
        tx.send_replace(true);
        assert_eq!(
            wait_for_end(&mut server, closed_rx, &mut shutdown).await,
            StreamEnd::Shutdown
        );
    }
}
