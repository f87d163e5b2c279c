//! Mapping configuration file
//!
//! ```text
//! # Front door camera          <- description of the next mapping
//! /door /dev/video0 high       <- path, then the pipeline description
//! capture:/tmp/door-%05d.jpg   <- option of the previous mapping
//!
//! # Snapshot
//! /door.jpg /dev/video0 low
//! type:image/jpeg
//! ```
//!
//! A line that is neither a comment nor an option ends the pending
//! description, even when it is blank.

use std::path::Path;

use crate::error::{Error, Result};
use crate::http::StreamFormat;
use crate::media::CapturePattern;
use crate::server::StreamOptions;

/// One `path pipeline` mapping with its options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub path: String,
    pub pipeline: String,
    pub description: Option<String>,
    /// Raw `capture:` option
    pub capture: Option<String>,
    /// Raw `type:` option
    pub mime_type: Option<String>,
}

impl Mapping {
    pub fn new(path: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pipeline: pipeline.into(),
            description: None,
            capture: None,
            mime_type: None,
        }
    }

    /// Validate the options and turn them into [`StreamOptions`]
    pub fn stream_options(&self) -> Result<StreamOptions> {
        let mut options = StreamOptions::default();
        if let Some(description) = &self.description {
            options = options.description(description.as_str());
        }
        if let Some(pattern) = &self.capture {
            options = options.capture(CapturePattern::parse(pattern)?);
        }
        if let Some(mime_type) = &self.mime_type {
            let format: StreamFormat = mime_type
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", self.path, e)))?;
            options = options.format(format);
        }
        Ok(options)
    }
}

/// Parse the contents of a mapping file
pub fn parse(contents: &str) -> Vec<Mapping> {
    let mut mappings: Vec<Mapping> = Vec::new();
    let mut description: Option<String> = None;

    for line in contents.lines() {
        if let Some(comment) = line.strip_prefix('#') {
            description = Some(comment.trim().to_string());
            continue;
        }

        if let Some((key, value)) = option(line) {
            if let Some(last) = mappings.last_mut() {
                match key {
                    "capture" => last.capture = Some(value.to_string()),
                    "type" => last.mime_type = Some(value.trim().to_string()),
                    _ => tracing::debug!(key, path = %last.path, "Ignoring unknown mapping option"),
                }
                continue;
            }
        }

        let line = line.trim_start();
        let (path, pipeline) = match line.split_once(char::is_whitespace) {
            Some((path, rest)) => (path, rest.trim()),
            None => (line, ""),
        };

        if !path.is_empty() && !pipeline.is_empty() {
            let mut mapping = Mapping::new(path, pipeline);
            mapping.description = description.take();
            mappings.push(mapping);
        }
        description = None;
    }

    mappings
}

/// Read and parse a mapping file
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Mapping>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let mappings = parse(&contents);
    tracing::debug!(file = %path.display(), mappings = mappings.len(), "Parsed mapping file");
    Ok(mappings)
}

/// Split `key:value` when the key is a single word
fn option(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value))
}
