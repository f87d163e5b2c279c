//! Media resources and stream fan-out
//!
//! A stream resource owns a lazily started producer and the set of
//! subscribers writing its frames to their sockets. Everything that mutates
//! the set or the producer runs under one lock, including the whole fan-out
//! of a frame. A stop request first raises the resource's interrupt signal,
//! which aborts any socket write the lock holder is blocked on.
//!
//! ```text
//!   Idle ──attach──► Starting ──ok──► Active ──last detach──► Idle
//!                       │               │
//!                       └─err─► Idle    └─producer error─► Faulted ──► Idle
//! ```

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::StartError;
use crate::handlers::RequestHandler;
use crate::http::StreamFormat;
use crate::media::capture::{self, CapturePattern};
use crate::media::pipeline::PipelineSpec;
use crate::media::producer::{Frame, FrameSink, Producer, ProducerEvent, ProducerFactory};
use crate::stats::ClientStats;

/// Lifecycle of a stream resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No producer
    Idle,
    /// Producer being constructed for the first subscriber
    Starting,
    /// Producer running with at least one subscriber
    Active,
    /// Producer reported an error, subscribers are being dropped
    Faulted,
}

/// Why a subscriber stopped receiving frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Writing a frame failed
    WriteFailed,
    /// One-shot image delivered
    Completed,
    /// Detached by its connection
    Detached,
    /// Resource stopped all subscribers
    Stopped,
    /// Producer failed
    ProducerFault,
}

/// A connection subscribed to a stream
///
/// Owns the write half of the connection's socket while attached.
pub struct Subscriber {
    id: u64,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    stats: Arc<Mutex<ClientStats>>,
    closed: Option<oneshot::Sender<CloseReason>>,
}

impl Subscriber {
    pub fn new<W>(
        id: u64,
        writer: W,
        stats: Arc<Mutex<ClientStats>>,
        closed: oneshot::Sender<CloseReason>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            writer: Box::new(writer),
            stats,
            closed: Some(closed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take back the writer, e.g. to send an error response
    pub fn into_writer(self) -> Box<dyn AsyncWrite + Send + Unpin> {
        self.writer
    }

    async fn write_all(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        for part in parts {
            self.writer.write_all(part).await?;
        }
        self.writer.flush().await
    }

    /// Like `write_all`, but gives up when `interrupt` fires
    ///
    /// Returns `None` when interrupted; the socket may then hold a partial
    /// frame.
    async fn write_interruptible(
        &mut self,
        parts: &[&[u8]],
        interrupt: &mut watch::Receiver<u64>,
    ) -> Option<io::Result<()>> {
        tokio::select! {
            result = self.write_all(parts) => Some(result),
            _ = interrupt.changed() => None,
        }
    }

    /// Account a delivered frame, returning the new frame count
    fn record_frame(&self, size: usize) -> u64 {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.record_frame(size);
        stats.frame_count()
    }

    fn notify(&mut self, reason: CloseReason) {
        if let Some(tx) = self.closed.take() {
            let _ = tx.send(reason);
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// Failure to attach a subscriber
#[derive(Debug)]
pub enum AttachError {
    /// The producer could not be started; the subscriber is handed back
    Start {
        error: StartError,
        subscriber: Subscriber,
    },
    /// Writing the response preamble failed
    Write(io::Error),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::Start { error, .. } => write!(f, "{}", error),
            AttachError::Write(e) => write!(f, "failed to write preamble: {}", e),
        }
    }
}

impl std::error::Error for AttachError {}

struct RunningProducer {
    producer: Box<dyn Producer>,
    pump: JoinHandle<()>,
}

struct StreamState {
    state: ResourceState,
    subscribers: Vec<Subscriber>,
    producer: Option<RunningProducer>,
    generation: u64,
    width: u32,
    height: u32,
}

/// Stream half of a resource
pub struct StreamPipeline {
    spec: PipelineSpec,
    format: StreamFormat,
    capture: Option<CapturePattern>,
    factory: Arc<dyn ProducerFactory>,
    inner: tokio::sync::Mutex<StreamState>,
    subscriber_count: AtomicUsize,
    next_generation: AtomicU64,
    /// Bumped before `stop_all` takes the lock
    interrupt: watch::Sender<u64>,
}

impl StreamPipeline {
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn capture(&self) -> Option<&CapturePattern> {
        self.capture.as_ref()
    }
}

/// What a resource serves
pub enum ResourceKind {
    Stream(StreamPipeline),
    Handler(Arc<dyn RequestHandler>),
}

impl fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Stream(stream) => f
                .debug_struct("Stream")
                .field("pipeline", &stream.spec)
                .field("format", &stream.format)
                .finish(),
            ResourceKind::Handler(_) => f.write_str("Handler"),
        }
    }
}

/// An addressable resource registered under a path
#[derive(Debug)]
pub struct MediaResource {
    pub(crate) path: String,
    description: Option<String>,
    kind: ResourceKind,
}

impl MediaResource {
    /// Stream resource, multipart by default
    pub fn stream(spec: PipelineSpec, factory: Arc<dyn ProducerFactory>) -> Self {
        Self {
            path: String::new(),
            description: None,
            kind: ResourceKind::Stream(StreamPipeline {
                spec,
                format: StreamFormat::default(),
                capture: None,
                factory,
                inner: tokio::sync::Mutex::new(StreamState {
                    state: ResourceState::Idle,
                    subscribers: Vec::new(),
                    producer: None,
                    generation: 0,
                    width: 0,
                    height: 0,
                }),
                subscriber_count: AtomicUsize::new(0),
                next_generation: AtomicU64::new(1),
                interrupt: watch::channel(0).0,
            }),
        }
    }

    /// Handler resource
    pub fn handler<H: RequestHandler>(handler: H) -> Self {
        Self::from_handler(Arc::new(handler))
    }

    pub fn from_handler(handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            path: String::new(),
            description: None,
            kind: ResourceKind::Handler(handler),
        }
    }

    /// Set the human-readable description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the stream format; ignored for handlers
    pub fn format(mut self, format: StreamFormat) -> Self {
        if let ResourceKind::Stream(ref mut stream) = self.kind {
            stream.format = format;
        }
        self
    }

    /// Dump every delivered frame to files named by `pattern`
    pub fn capture(mut self, pattern: CapturePattern) -> Self {
        if let ResourceKind::Stream(ref mut stream) = self.kind {
            stream.capture = Some(pattern);
        }
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, ResourceKind::Stream(_))
    }

    /// Number of subscribers, without taking the stream lock
    pub fn subscriber_count(&self) -> usize {
        match &self.kind {
            ResourceKind::Stream(stream) => stream.subscriber_count.load(Ordering::Relaxed),
            ResourceKind::Handler(_) => 0,
        }
    }

    pub async fn state(&self) -> ResourceState {
        match &self.kind {
            ResourceKind::Stream(stream) => stream.inner.lock().await.state,
            ResourceKind::Handler(_) => ResourceState::Idle,
        }
    }

    /// Frame dimensions, once the first frame carried them
    pub async fn dimensions(&self) -> Option<(u32, u32)> {
        let ResourceKind::Stream(stream) = &self.kind else {
            return None;
        };
        let inner = stream.inner.lock().await;
        (inner.width > 0 && inner.height > 0).then_some((inner.width, inner.height))
    }

    /// Whether a producer is currently running
    pub async fn is_producing(&self) -> bool {
        match &self.kind {
            ResourceKind::Stream(stream) => stream.inner.lock().await.producer.is_some(),
            ResourceKind::Handler(_) => false,
        }
    }

    /// Subscribe a connection, starting the producer if needed
    ///
    /// `preamble` (the `200 OK` header block) is written only once the
    /// producer runs, so a start failure leaves the socket untouched for a
    /// `415` response. Returns the new subscriber count.
    pub async fn attach(
        self: &Arc<Self>,
        mut subscriber: Subscriber,
        preamble: Bytes,
    ) -> Result<usize, AttachError> {
        let ResourceKind::Stream(stream) = &self.kind else {
            return Err(AttachError::Start {
                error: StartError::NotAStream,
                subscriber,
            });
        };

        let mut interrupt = stream.interrupt.subscribe();
        let mut inner = stream.inner.lock().await;

        if inner.producer.is_none() {
            if let Err(error) = self.start_producer(stream, &mut inner) {
                return Err(AttachError::Start { error, subscriber });
            }
        }

        let written = subscriber
            .write_interruptible(&[&preamble[..]], &mut interrupt)
            .await
            .unwrap_or_else(|| {
                Err(io::Error::new(io::ErrorKind::Interrupted, "resource stopped"))
            });
        if let Err(e) = written {
            if inner.subscribers.is_empty() {
                self.stop_producer(&mut inner);
            }
            return Err(AttachError::Write(e));
        }

        inner.subscribers.push(subscriber);
        inner.state = ResourceState::Active;
        let count = inner.subscribers.len();
        stream.subscriber_count.store(count, Ordering::Relaxed);

        tracing::info!(path = %self.path, subscribers = count, "Subscriber added");
        Ok(count)
    }

    /// Remove a subscriber; stops the producer when it was the last one
    ///
    /// Returns `false` if the subscriber was not attached.
    pub async fn detach(&self, id: u64) -> bool {
        let ResourceKind::Stream(stream) = &self.kind else {
            return false;
        };
        let mut inner = stream.inner.lock().await;
        self.detach_locked(stream, &mut inner, id, CloseReason::Detached)
    }

    /// Disconnect every subscriber and stop the producer
    ///
    /// Returns the number of subscribers dropped.
    pub async fn stop_all(&self) -> usize {
        let ResourceKind::Stream(stream) = &self.kind else {
            return 0;
        };
        stream.interrupt.send_modify(|n| *n = n.wrapping_add(1));
        let mut inner = stream.inner.lock().await;
        self.stop_all_locked(stream, &mut inner, CloseReason::Stopped)
    }

    /// Fan a frame out to every subscriber
    ///
    /// Events from a producer generation other than the current one are
    /// dropped. A concurrent [`stop_all`](Self::stop_all) cuts the fan-out
    /// short.
    pub async fn on_frame(&self, generation: u64, frame: Frame) {
        let ResourceKind::Stream(stream) = &self.kind else {
            return;
        };
        let mut interrupt = stream.interrupt.subscribe();
        let mut inner = stream.inner.lock().await;
        if inner.generation != generation || inner.producer.is_none() {
            tracing::trace!(path = %self.path, generation, "Stale frame dropped");
            return;
        }

        if inner.width == 0 && frame.width > 0 && frame.height > 0 {
            inner.width = frame.width;
            inner.height = frame.height;
            tracing::info!(
                path = %self.path,
                width = frame.width,
                height = frame.height,
                "Stream dimensions known"
            );
        }

        let header = stream.format.frame_header(frame.len());
        let one_shot = stream.format.is_one_shot();
        let mut finished = Vec::new();

        for subscriber in inner.subscribers.iter_mut() {
            let written = subscriber
                .write_interruptible(&[&header[..], &frame.data[..]], &mut interrupt)
                .await;
            match written {
                None => {
                    tracing::debug!(path = %self.path, "Fan-out interrupted");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        path = %self.path,
                        connection_id = subscriber.id,
                        error = %e,
                        "Frame write failed"
                    );
                    finished.push((subscriber.id, CloseReason::WriteFailed));
                    continue;
                }
                Some(Ok(())) => {}
            }

            let count = subscriber.record_frame(frame.len());
            if let Some(pattern) = &stream.capture {
                capture::write_frame(pattern, count, &frame.data).await;
            }
            if one_shot {
                finished.push((subscriber.id, CloseReason::Completed));
            }
        }

        for (id, reason) in finished {
            self.detach_locked(stream, &mut inner, id, reason);
        }
    }

    /// Report a producer fault to all subscribers and tear the stream down
    pub async fn on_error(&self, generation: u64, message: &str) {
        let ResourceKind::Stream(stream) = &self.kind else {
            return;
        };
        let mut interrupt = stream.interrupt.subscribe();
        let mut inner = stream.inner.lock().await;
        if inner.generation != generation || inner.producer.is_none() {
            return;
        }

        inner.state = ResourceState::Faulted;
        tracing::error!(
            path = %self.path,
            error = %message,
            subscribers = inner.subscribers.len(),
            "Pipeline error"
        );

        let line = format!("Stream Error: {}\r\n\r\n", message);
        for subscriber in inner.subscribers.iter_mut() {
            let written = subscriber
                .write_interruptible(&[line.as_bytes()], &mut interrupt)
                .await;
            if written.is_none() {
                break;
            }
        }

        self.stop_all_locked(stream, &mut inner, CloseReason::ProducerFault);
    }

    fn start_producer(
        self: &Arc<Self>,
        stream: &StreamPipeline,
        inner: &mut StreamState,
    ) -> Result<(), StartError> {
        inner.state = ResourceState::Starting;
        let generation = stream.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sink, mut events) = FrameSink::channel(generation);

        let producer = match stream.factory.start(&stream.spec, sink) {
            Ok(producer) => producer,
            Err(e) => {
                inner.state = ResourceState::Idle;
                tracing::warn!(path = %self.path, pipeline = %stream.spec, error = %e, "Failed to start producer");
                return Err(e);
            }
        };

        let resource: Weak<Self> = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            while let Some((generation, event)) = events.recv().await {
                let Some(resource) = resource.upgrade() else {
                    break;
                };
                match event {
                    ProducerEvent::Frame(frame) => resource.on_frame(generation, frame).await,
                    ProducerEvent::Error(message) => resource.on_error(generation, &message).await,
                }
            }
        });

        inner.generation = generation;
        inner.producer = Some(RunningProducer { producer, pump });
        tracing::info!(path = %self.path, pipeline = %stream.spec, generation, "Producer started");
        Ok(())
    }

    fn stop_producer(&self, inner: &mut StreamState) {
        if let Some(mut running) = inner.producer.take() {
            running.producer.stop();
            running.pump.abort();
            tracing::info!(path = %self.path, generation = inner.generation, "Producer stopped");
        }
        inner.state = ResourceState::Idle;
    }

    fn detach_locked(
        &self,
        stream: &StreamPipeline,
        inner: &mut StreamState,
        id: u64,
        reason: CloseReason,
    ) -> bool {
        let Some(index) = inner.subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let mut subscriber = inner.subscribers.remove(index);
        subscriber.notify(reason);

        let remaining = inner.subscribers.len();
        stream.subscriber_count.store(remaining, Ordering::Relaxed);
        tracing::debug!(
            path = %self.path,
            connection_id = id,
            reason = ?reason,
            subscribers = remaining,
            "Subscriber removed"
        );

        if remaining == 0 {
            self.stop_producer(inner);
        }
        true
    }

    fn stop_all_locked(
        &self,
        stream: &StreamPipeline,
        inner: &mut StreamState,
        reason: CloseReason,
    ) -> usize {
        let dropped = inner.subscribers.len();
        for mut subscriber in inner.subscribers.drain(..) {
            subscriber.notify(reason);
        }
        stream.subscriber_count.store(0, Ordering::Relaxed);
        self.stop_producer(inner);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    use super::*;

    #[derive(Default)]
    struct StubFactory {
        starts: AtomicUsize,
        stops: Arc<AtomicUsize>,
        fail: bool,
        sinks: Mutex<Vec<FrameSink>>,
    }

    struct StubProducer {
        stops: Arc<AtomicUsize>,
        stopped: bool,
    }

    impl Producer for StubProducer {
        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl ProducerFactory for StubFactory {
        fn start(
            &self,
            _spec: &PipelineSpec,
            sink: FrameSink,
        ) -> Result<Box<dyn Producer>, StartError> {
            if self.fail {
                return Err(StartError::DeviceUnavailable("/dev/video9".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(StubProducer {
                stops: Arc::clone(&self.stops),
                stopped: false,
            }))
        }
    }

    impl StubFactory {
        fn sink(&self) -> FrameSink {
            self.sinks.lock().unwrap().last().unwrap().clone()
        }
    }

    fn resource(factory: &Arc<StubFactory>, format: StreamFormat) -> Arc<MediaResource> {
        let spec = PipelineSpec::parse("videotestsrc ! jpegenc").unwrap();
        let factory: Arc<dyn ProducerFactory> = factory.clone();
        let mut resource = MediaResource::stream(spec, factory).format(format);
        resource.path = "/stream".into();
        Arc::new(resource)
    }

    fn subscriber(id: u64) -> (Subscriber, DuplexStream, oneshot::Receiver<CloseReason>) {
        let (client, server) = duplex(64 * 1024);
        let (tx, rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(ClientStats::new()));
        (Subscriber::new(id, server, stats, tx), client, rx)
    }

    fn frame(len: usize) -> Frame {
        Frame::with_dimensions(Bytes::from(vec![0xAB; len]), 320, 240)
    }

    async fn read_available(client: &mut DuplexStream) -> Vec<u8> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_attach_starts_producer_once() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, mut client_a, _rx_a) = subscriber(1);
        let (b, _client_b, _rx_b) = subscriber(2);

        assert_eq!(res.attach(a, Bytes::from_static(b"PRE")).await.unwrap(), 1);
        assert_eq!(res.attach(b, Bytes::from_static(b"PRE")).await.unwrap(), 2);

        assert_eq!(factory.starts.load(Ordering::SeqCst), 1);
        assert_eq!(res.subscriber_count(), 2);
        assert_eq!(res.state().await, ResourceState::Active);
        assert_eq!(read_available(&mut client_a).await, b"PRE");
    }

    #[tokio::test]
    async fn test_last_detach_stops_producer_once() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, _ca, _ra) = subscriber(1);
        let (b, _cb, _rb) = subscriber(2);
        res.attach(a, Bytes::new()).await.unwrap();
        res.attach(b, Bytes::new()).await.unwrap();

        assert!(res.detach(1).await);
        assert!(res.is_producing().await);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 0);

        assert!(res.detach(2).await);
        assert!(!res.detach(2).await);
        assert!(!res.is_producing().await);
        assert_eq!(res.subscriber_count(), 0);
        assert_eq!(res.state().await, ResourceState::Idle);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);

        // Restart on the next subscriber
        let (c, _cc, _rc) = subscriber(3);
        res.attach(c, Bytes::new()).await.unwrap();
        assert_eq!(factory.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_failure_returns_subscriber() {
        let factory = Arc::new(StubFactory {
            fail: true,
            ..Default::default()
        });
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, _ca, _ra) = subscriber(7);
        match res.attach(a, Bytes::from_static(b"PRE")).await {
            Err(AttachError::Start { error, subscriber }) => {
                assert!(matches!(error, StartError::DeviceUnavailable(_)));
                assert_eq!(subscriber.id(), 7);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(res.subscriber_count(), 0);
        assert_eq!(res.state().await, ResourceState::Idle);
    }

    #[tokio::test]
    async fn test_fan_out_frames_to_all() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let mut clients = Vec::new();
        for id in 1..=3 {
            let (s, client, rx) = subscriber(id);
            res.attach(s, Bytes::new()).await.unwrap();
            clients.push((client, rx));
        }

        let generation = factory.sink().generation();
        res.on_frame(generation, frame(100)).await;

        let expected_header = StreamFormat::Multipart.frame_header(100);
        for (client, _) in clients.iter_mut() {
            let data = read_available(client).await;
            assert_eq!(&data[..expected_header.len()], &expected_header[..]);
            assert_eq!(data.len(), expected_header.len() + 100);
        }
        assert_eq!(res.dimensions().await, Some((320, 240)));
    }

    #[tokio::test]
    async fn test_failed_writer_is_reaped() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, mut client_a, _ra) = subscriber(1);
        let (b, client_b, rx_b) = subscriber(2);
        res.attach(a, Bytes::new()).await.unwrap();
        res.attach(b, Bytes::new()).await.unwrap();
        drop(client_b);

        let generation = factory.sink().generation();
        res.on_frame(generation, frame(10)).await;

        assert_eq!(rx_b.await.unwrap(), CloseReason::WriteFailed);
        assert_eq!(res.subscriber_count(), 1);
        assert!(!read_available(&mut client_a).await.is_empty());

        // The reaped subscriber is gone for good
        assert!(!res.detach(2).await);
        assert!(res.is_producing().await);
    }

    #[tokio::test]
    async fn test_one_shot_closes_after_first_frame() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Jpeg);

        let (a, mut client, rx) = subscriber(1);
        res.attach(a, Bytes::new()).await.unwrap();

        let generation = factory.sink().generation();
        res.on_frame(generation, frame(5)).await;

        assert_eq!(rx.await.unwrap(), CloseReason::Completed);
        assert_eq!(
            read_available(&mut client).await,
            b"Content-Length: 5\r\n\r\n\xAB\xAB\xAB\xAB\xAB"
        );
        assert_eq!(res.subscriber_count(), 0);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);

        // Writer was dropped with the subscriber
        assert_eq!(read_available(&mut client).await, b"");
    }

    #[tokio::test]
    async fn test_error_broadcasts_and_stops() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, mut client_a, rx_a) = subscriber(1);
        let (b, mut client_b, rx_b) = subscriber(2);
        res.attach(a, Bytes::new()).await.unwrap();
        res.attach(b, Bytes::new()).await.unwrap();

        let generation = factory.sink().generation();
        res.on_error(generation, "device gone").await;

        for client in [&mut client_a, &mut client_b] {
            assert_eq!(
                read_available(client).await,
                b"Stream Error: device gone\r\n\r\n"
            );
        }
        assert_eq!(rx_a.await.unwrap(), CloseReason::ProducerFault);
        assert_eq!(rx_b.await.unwrap(), CloseReason::ProducerFault);
        assert_eq!(res.subscriber_count(), 0);
        assert_eq!(res.state().await, ResourceState::Idle);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, _ca, _ra) = subscriber(1);
        res.attach(a, Bytes::new()).await.unwrap();
        let stale = factory.sink().generation();
        res.detach(1).await;

        let (b, _cb, rx_b) = subscriber(2);
        res.attach(b, Bytes::new()).await.unwrap();

        res.on_error(stale, "old pipeline").await;
        assert_eq!(res.subscriber_count(), 1);
        drop(rx_b);
    }

    #[tokio::test]
    async fn test_pump_delivers_sink_events() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, mut client, rx) = subscriber(1);
        res.attach(a, Bytes::new()).await.unwrap();

        let sink = factory.sink();
        assert!(sink.frame(frame(4)).await);
        let data = read_available(&mut client).await;
        assert!(data.ends_with(&[0xAB; 4]));

        assert!(sink.error("eos").await);
        assert_eq!(rx.await.unwrap(), CloseReason::ProducerFault);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        let (a, _ca, rx_a) = subscriber(1);
        res.attach(a, Bytes::new()).await.unwrap();

        assert_eq!(res.stop_all().await, 1);
        assert_eq!(rx_a.await.unwrap(), CloseReason::Stopped);
        assert_eq!(res.stop_all().await, 0);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_all_interrupts_blocked_fan_out() {
        let factory = Arc::new(StubFactory::default());
        let res = resource(&factory, StreamFormat::Multipart);

        // A viewer whose socket buffer fills up and is never drained
        let (client, server) = duplex(64);
        let (tx, rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(ClientStats::new()));
        res.attach(Subscriber::new(1, server, stats, tx), Bytes::new())
            .await
            .unwrap();

        let generation = factory.sink().generation();
        let fan_out = tokio::spawn({
            let res = Arc::clone(&res);
            async move { res.on_frame(generation, frame(4096)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fan_out.is_finished());

        let stopped = tokio::time::timeout(Duration::from_secs(1), res.stop_all())
            .await
            .unwrap();
        assert_eq!(stopped, 1);
        tokio::time::timeout(Duration::from_secs(1), fan_out)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.await.unwrap(), CloseReason::Stopped);
        assert_eq!(factory.stops.load(Ordering::SeqCst), 1);
        assert_eq!(res.state().await, ResourceState::Idle);
        drop(client);
    }

    #[tokio::test]
    async fn test_capture_writes_each_frame() {
        let dir = tempfile::tempdir().unwrap();
        let pattern =
            CapturePattern::parse(&format!("{}/f%d.jpg", dir.path().display())).unwrap();

        let factory = Arc::new(StubFactory::default());
        let spec = PipelineSpec::parse("videotestsrc ! jpegenc").unwrap();
        let dyn_factory: Arc<dyn ProducerFactory> = factory.clone();
        let mut resource = MediaResource::stream(spec, dyn_factory).capture(pattern);
        resource.path = "/stream".into();
        let res = Arc::new(resource);

        let (a, mut client_a, _rx_a) = subscriber(1);
        let (b, mut client_b, _rx_b) = subscriber(2);
        res.attach(a, Bytes::new()).await.unwrap();
        res.attach(b, Bytes::new()).await.unwrap();

        let generation = factory.sink().generation();
        res.on_frame(generation, Frame::with_dimensions(Bytes::from_static(b"first"), 320, 240))
            .await;
        res.on_frame(generation, Frame::with_dimensions(Bytes::from_static(b"second"), 320, 240))
            .await;

        assert_eq!(std::fs::read(dir.path().join("f1.jpg")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("f2.jpg")).unwrap(), b"second");
        assert!(!dir.path().join("f3.jpg").exists());

        for client in [&mut client_a, &mut client_b] {
            let data = read_available(client).await;
            assert!(data.ends_with(b"second"));
        }
    }

    #[tokio::test]
    async fn test_handler_resource_rejects_attach() {
        let res = Arc::new(MediaResource::handler(
            |_: &crate::http::Request,
             _: &crate::server::ClientInfo,
             _: &mut crate::http::Response| crate::handlers::HandlerAction::Close,
        ));
        let (a, _ca, _ra) = subscriber(1);
        assert!(matches!(
            res.attach(a, Bytes::new()).await,
            Err(AttachError::Start {
                error: StartError::NotAStream,
                ..
            })
        ));
    }
}
