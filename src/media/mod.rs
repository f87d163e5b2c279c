//! Media resources and their producers
//!
//! This module provides:
//! - `MediaResource`: stream fan-out and producer lifecycle
//! - The `Producer` / `ProducerFactory` boundary and `FrameSink`
//! - Pipeline description parsing and device shorthands
//! - A `gst-launch-1.0` child process producer with JPEG frame splitting
//! - Frame capture to disk

pub mod capture;
pub mod command;
pub mod jpeg;
pub mod pipeline;
pub mod producer;
pub mod resource;

pub use capture::CapturePattern;
pub use command::CommandProducerFactory;
pub use jpeg::JpegSplitter;
pub use pipeline::{CaptureConfig, PipelineSpec};
pub use producer::{Frame, FrameSink, Producer, ProducerEvent, ProducerFactory};
pub use resource::{
    AttachError, CloseReason, MediaResource, ResourceKind, ResourceState, StreamPipeline,
    Subscriber,
};
