//! Registry entries and path patterns

use std::fmt;
use std::sync::Arc;

use crate::media::MediaResource;

use super::error::RegistryError;

/// Path a resource is registered under
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches exactly this path
    Exact(String),
    /// Matches any path starting with this prefix (registered as `prefix*`)
    Prefix(String),
}

impl PathPattern {
    /// Normalize and validate a registration path
    ///
    /// A leading `/` is added when missing. A single `*` is accepted only as
    /// the last character.
    pub fn parse(path: &str) -> Result<Self, RegistryError> {
        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        match normalized.find('*') {
            None => Ok(PathPattern::Exact(normalized)),
            Some(pos) if pos == normalized.len() - 1 => {
                Ok(PathPattern::Prefix(normalized[..pos].to_string()))
            }
            Some(_) => Err(RegistryError::InvalidPattern(path.to_string())),
        }
    }

    /// Exact or prefix match
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(p) => f.write_str(p),
            PathPattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// One registration
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub pattern: PathPattern,
    pub resource: Arc<MediaResource>,
}
