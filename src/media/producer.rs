//! Producer boundary
//!
//! A producer is the capture/encode backend behind a stream resource. The core
//! only starts and stops it; frames and faults come back through a
//! [`FrameSink`].
//!
//! ```text
//!   producer thread/task          reactor
//!   ────────────────────          ───────────────────────────────
//!   sink.frame(f) ──► mpsc(1) ──► pump task ──► resource.on_frame
//!   sink.error(m) ──►         ──►           ──► resource.on_error
//! ```
//!
//! The channel holds a single event, so a producer that outruns its slowest
//! subscriber is held back instead of queueing frames.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StartError;
use crate::media::pipeline::PipelineSpec;

/// One encoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Complete JPEG image
    pub data: Bytes,
    /// Width in pixels, 0 when unknown
    pub width: u32,
    /// Height in pixels, 0 when unknown
    pub height: u32,
}

impl Frame {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            width: 0,
            height: 0,
        }
    }

    pub fn with_dimensions(data: Bytes, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Event delivered by a producer
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// A new frame is ready
    Frame(Frame),
    /// The pipeline failed at runtime
    Error(String),
}

/// Event tagged with the producer generation that emitted it
pub(crate) type TaggedEvent = (u64, ProducerEvent);

/// Handle through which a running producer reports frames and faults
///
/// Cheap to clone. Every send returns `false` once the producer has been
/// stopped and the receiving side is gone.
#[derive(Debug, Clone)]
pub struct FrameSink {
    generation: u64,
    tx: mpsc::Sender<TaggedEvent>,
}

impl FrameSink {
    pub(crate) fn channel(generation: u64) -> (Self, mpsc::Receiver<TaggedEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { generation, tx }, rx)
    }

    /// Generation of the producer this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a frame from async code
    pub async fn frame(&self, frame: Frame) -> bool {
        self.send(ProducerEvent::Frame(frame)).await
    }

    /// Report a runtime fault from async code
    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.send(ProducerEvent::Error(message.into())).await
    }

    /// Deliver a frame from a producer-owned thread
    ///
    /// Must not be called from within the async runtime.
    pub fn blocking_frame(&self, frame: Frame) -> bool {
        self.tx
            .blocking_send((self.generation, ProducerEvent::Frame(frame)))
            .is_ok()
    }

    /// Report a runtime fault from a producer-owned thread
    pub fn blocking_error(&self, message: impl Into<String>) -> bool {
        self.tx
            .blocking_send((self.generation, ProducerEvent::Error(message.into())))
            .is_ok()
    }

    /// Whether the owning resource stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: ProducerEvent) -> bool {
        self.tx.send((self.generation, event)).await.is_ok()
    }
}

/// A running producer
pub trait Producer: Send {
    /// Stop producing. Calling it again is a no-op.
    fn stop(&mut self);
}

/// Creates producers for stream resources
///
/// `start` is called with the resource lock held, when the first subscriber
/// attaches. It must not block; long-running work belongs in a task or thread
/// that reports through `sink`.
pub trait ProducerFactory: Send + Sync + 'static {
    fn start(&self, spec: &PipelineSpec, sink: FrameSink) -> Result<Box<dyn Producer>, StartError>;
}
