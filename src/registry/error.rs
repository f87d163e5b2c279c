//! Registry error types

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Path uses an unsupported wildcard form
    InvalidPattern(String),
    /// No resource registered under this path
    NotFound(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidPattern(path) => {
                write!(f, "Invalid path pattern (only a single trailing '*' is allowed): {}", path)
            }
            RegistryError::NotFound(path) => write!(f, "Resource not found: {}", path),
        }
    }
}

impl std::error::Error for RegistryError {}
