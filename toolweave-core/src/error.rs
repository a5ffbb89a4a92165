//! Error types for Toolweave operations

use crate::orchestration::OrchestrationError;
use crate::tools::RegistryError;

/// Result type for Toolweave operations
pub type Result<T> = std::result::Result<T, ToolweaveError>;

/// Error types for the Toolweave engine
#[derive(Debug, thiserror::Error)]
pub enum ToolweaveError {
    /// Tool registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Orchestration errors
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ToolweaveError {
    fn from(s: String) -> Self {
        ToolweaveError::Other(s)
    }
}

impl From<&str> for ToolweaveError {
    fn from(s: &str) -> Self {
        ToolweaveError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}

    #[test]
    fn test_conversions_keep_source_message() {
        let err: ToolweaveError = RegistryError::NotFound("fetch".to_string()).into();
        boundary_error(&err);
        assert_eq!(err.to_string(), "Registry error: Tool 'fetch' not found");

        let err: ToolweaveError = "queue closed".into();
        assert!(matches!(err, ToolweaveError::Other(ref m) if m == "queue closed"));
    }
}
