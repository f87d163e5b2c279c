//! Resource registry implementation
//!
//! Ordered list of path bindings. Lookups walk the list in registration
//! order and return the first entry whose pattern matches, so an earlier
//! `/cam*` shadows a later `/cam1`.

use std::sync::{Arc, PoisonError, RwLock};

use crate::media::MediaResource;

use super::entry::{PathPattern, RegistryEntry};
use super::error::RegistryError;

/// Registry of all resources served by the server
///
/// Thread-safe via `RwLock`. The lock is never held across an await.
pub struct MediaRegistry {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl MediaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a resource under `path`
    ///
    /// Later registrations never replace earlier ones; they only match paths
    /// no earlier entry claims.
    pub fn add(
        &self,
        path: &str,
        mut resource: MediaResource,
    ) -> Result<Arc<MediaResource>, RegistryError> {
        let pattern = PathPattern::parse(path)?;
        resource.path = pattern.to_string();
        let resource = Arc::new(resource);

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(RegistryEntry {
            pattern,
            resource: Arc::clone(&resource),
        });

        tracing::info!(
            path = %resource.path(),
            kind = ?resource.kind(),
            resources = entries.len(),
            "Resource registered"
        );
        Ok(resource)
    }

    /// Resolve a request path to the first matching resource
    pub fn find(&self, path: &str) -> Option<Arc<MediaResource>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|entry| entry.pattern.matches(path))
            .map(|entry| Arc::clone(&entry.resource))
    }

    /// Unregister the first resource registered under `path`
    ///
    /// Stream resources are stopped and their subscribers disconnected.
    pub async fn remove(&self, path: &str) -> Result<Arc<MediaResource>, RegistryError> {
        let pattern = PathPattern::parse(path)?;
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let index = entries
                .iter()
                .position(|entry| entry.pattern == pattern)
                .ok_or_else(|| RegistryError::NotFound(pattern.to_string()))?;
            entries.remove(index).resource
        };

        let dropped = removed.stop_all().await;
        tracing::info!(path = %removed.path(), subscribers = dropped, "Resource removed");
        Ok(removed)
    }

    /// Snapshot of all resources in registration order
    pub fn resources(&self) -> Vec<Arc<MediaResource>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| Arc::clone(&e.resource)).collect()
    }

    /// Stop every stream resource
    pub async fn stop_all(&self) {
        for resource in self.resources() {
            if resource.is_stream() {
                resource.stop_all().await;
            }
        }
    }

    /// Get total number of resources
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MediaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
