//! Producer backed by a `gst-launch-1.0` child process
//!
//! The pipeline is launched with its JPEG output written to stdout:
//!
//! ```text
//! gst-launch-1.0 -q <pipeline> ! fdsink fd=1
//! ```
//!
//! stdout is split into frames; the last stderr line is kept as the fault
//! message when the process exits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::StartError;
use crate::media::jpeg::{self, JpegSplitter};
use crate::media::pipeline::PipelineSpec;
use crate::media::producer::{Frame, FrameSink, Producer, ProducerFactory};

/// Default launcher binary
pub const DEFAULT_LAUNCHER: &str = "gst-launch-1.0";

const READ_CHUNK: usize = 64 * 1024;

/// Starts stream producers as child processes
#[derive(Debug, Clone)]
pub struct CommandProducerFactory {
    launcher: PathBuf,
    extra_args: Vec<String>,
    check_devices: bool,
}

impl CommandProducerFactory {
    pub fn new() -> Self {
        Self::with_launcher(DEFAULT_LAUNCHER)
    }

    /// Use another launcher binary
    pub fn with_launcher(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            extra_args: vec!["-q".to_string()],
            check_devices: true,
        }
    }

    /// Skip the capture device existence check before launching
    pub fn skip_device_check(mut self) -> Self {
        self.check_devices = false;
        self
    }

    /// Command line for a pipeline
    pub fn command_args(&self, spec: &PipelineSpec) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.extend(
            spec.launch_description()
                .split_whitespace()
                .map(str::to_string),
        );
        args.extend(["!", "fdsink", "fd=1"].map(str::to_string));
        args
    }

    pub fn launcher(&self) -> &Path {
        &self.launcher
    }
}

impl Default for CommandProducerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerFactory for CommandProducerFactory {
    fn start(&self, spec: &PipelineSpec, sink: FrameSink) -> Result<Box<dyn Producer>, StartError> {
        if self.check_devices {
            if let Some(device) = spec.device() {
                if !Path::new(device).exists() {
                    return Err(StartError::DeviceUnavailable(device.to_string()));
                }
            }
        }

        let args = self.command_args(spec);
        tracing::debug!(launcher = %self.launcher.display(), args = ?args, "Launching pipeline");

        let mut child = Command::new(&self.launcher)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(StartError::Launch)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StartError::InvalidPipeline(spec.launch_description()))?;
        let last_error = Arc::new(Mutex::new(None));

        let stderr_task = child.stderr.take().map(|stderr| {
            let last_error = Arc::clone(&last_error);
            tokio::spawn(collect_stderr(stderr, last_error))
        });
        let reader = tokio::spawn(read_frames(stdout, sink, last_error));

        tracing::info!(pid = ?child.id(), pipeline = %spec, "Pipeline process started");

        Ok(Box::new(CommandProducer {
            child: Some(child),
            reader,
            stderr_task,
        }))
    }
}

/// A running pipeline process
pub struct CommandProducer {
    child: Option<Child>,
    reader: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl Producer for CommandProducer {
    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.reader.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "Pipeline process already exited");
        }
        tracing::debug!(pid = ?child.id(), "Pipeline process killed");
    }
}

impl Drop for CommandProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn collect_stderr<R>(stderr: R, last_error: Arc<Mutex<Option<String>>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(line = %line, "Pipeline stderr");
        *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(line.to_string());
    }
}

async fn read_frames<R>(mut stdout: R, sink: FrameSink, last_error: Arc<Mutex<Option<String>>>)
where
    R: AsyncRead + Unpin,
{
    let mut splitter = JpegSplitter::new();
    let mut dims = None;

    let failure = loop {
        splitter.buffer_mut().reserve(READ_CHUNK);
        match stdout.read_buf(splitter.buffer_mut()).await {
            Ok(0) => break "pipeline exited".to_string(),
            Ok(_) => {}
            Err(e) => break format!("pipeline read failed: {}", e),
        }

        while let Some(data) = splitter.next_frame() {
            if dims.is_none() {
                dims = jpeg::dimensions(&data);
            }
            let (width, height) = dims.unwrap_or((0, 0));
            if !sink.frame(Frame::with_dimensions(data, width, height)).await {
                return;
            }
        }
    };

    // Give the stderr reader a moment to catch the final message
    tokio::task::yield_now().await;
    let message = last_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or(failure);
    sink.error(message).await;
}
