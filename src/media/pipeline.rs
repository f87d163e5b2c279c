//! Pipeline descriptions
//!
//! A mapping's pipeline is either an explicit launch description such as
//! `videotestsrc ! jpegenc`, or a device shorthand:
//!
//! ```text
//! [/dev/videoN] [low|med|high] [WxH]
//! ```
//!
//! Anything containing a `!` stage separator is treated as explicit.

use std::fmt;

use crate::error::StartError;

/// Device used when the shorthand does not name one
pub const DEFAULT_DEVICE: &str = "/dev/video0";

const STAGE_SEPARATOR: char = '!';

/// Capture parameters resolved from a device shorthand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl CaptureConfig {
    pub fn new(device: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
        }
    }

    /// Resolve a shorthand like `/dev/video1 med` or `1280x720`
    pub fn from_shorthand(text: &str) -> Self {
        let mut config = Self::default();
        let mut tokens = text.split_whitespace().peekable();

        if let Some(device) = tokens.next_if(|t| t.starts_with("/dev/video")) {
            config.device = device.to_string();
        }
        // Keywords are checked in order, so `low high` ends up as `high`
        for (keyword, width, height) in [("low", 640, 480), ("med", 1024, 768), ("high", 2592, 1944)] {
            if tokens.next_if_eq(&keyword).is_some() {
                config.width = width;
                config.height = height;
            }
        }
        if let Some((width, height)) = tokens.peek().and_then(|t| parse_size(t)) {
            config.width = width;
            config.height = height;
        }

        config
    }

    /// Launch description producing JPEG frames from this device
    pub fn launch_description(&self) -> String {
        format!(
            "v4l2src device={} ! video/x-raw,width={},height={} ! jpegenc",
            self.device, self.width, self.height
        )
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE, 640, 480)
    }
}

/// Parsed pipeline description of a stream resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineSpec {
    /// Explicit launch description, used verbatim
    Launch {
        description: String,
        /// Device of a leading `v4l2src device=...` stage, if any
        device: Option<String>,
    },
    /// Device shorthand
    Device(CaptureConfig),
}

impl PipelineSpec {
    pub fn parse(description: &str) -> Result<Self, StartError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(StartError::InvalidPipeline(description.to_string()));
        }

        if !description.contains(STAGE_SEPARATOR) {
            return Ok(PipelineSpec::Device(CaptureConfig::from_shorthand(
                description,
            )));
        }

        if description
            .split(STAGE_SEPARATOR)
            .any(|stage| stage.trim().is_empty())
        {
            return Err(StartError::InvalidPipeline(description.to_string()));
        }

        Ok(PipelineSpec::Launch {
            description: description.to_string(),
            device: source_device(description),
        })
    }

    /// Full launch description, without the trailing sink
    pub fn launch_description(&self) -> String {
        match self {
            PipelineSpec::Launch { description, .. } => description.clone(),
            PipelineSpec::Device(config) => config.launch_description(),
        }
    }

    /// Capture device the pipeline reads from, if known
    pub fn device(&self) -> Option<&str> {
        match self {
            PipelineSpec::Launch { device, .. } => device.as_deref(),
            PipelineSpec::Device(config) => Some(&config.device),
        }
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.launch_description())
    }
}

fn parse_size(token: &str) -> Option<(u32, u32)> {
    let (w, h) = token.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn source_device(description: &str) -> Option<String> {
    let first = description.split(STAGE_SEPARATOR).next()?;
    let mut words = first.split_whitespace();
    if words.next()? != "v4l2src" {
        return None;
    }
    words
        .find_map(|w| w.strip_prefix("device="))
        .map(str::to_string)
}
