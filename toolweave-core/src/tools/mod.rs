//! Tool catalog and single-tool execution
//!
//! This module holds everything about individual tools:
//! - Definitions, capability schemas and partial updates
//! - Per-tool metrics and quality scoring
//! - The collaborator traits that actually run, probe and initialize tools
//! - The [`ToolRegistry`] that ties them together
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolweave_core::tools::{EchoExecutor, SearchQuery, ToolDefinition, ToolRegistry};
//!
//! # async fn demo() -> Result<(), toolweave_core::tools::RegistryError> {
//! let registry = ToolRegistry::new(Arc::new(EchoExecutor));
//! registry
//!     .register(ToolDefinition::new("summarize", "Summarize text", "./tools/summarize"))
//!     .await?;
//!
//! let found = registry.search(&SearchQuery::new().text("summar")).await;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

mod definition;
mod executor;
mod metrics;
mod registry;
mod result;

pub use definition::{
    CapabilityParameter, DEFAULT_CATEGORY, DEFAULT_TOOL_VERSION, ToolCapability, ToolDefinition,
    ToolStatus, ToolUpdate,
};
pub use executor::{
    AlwaysHealthy, EchoExecutor, EntryPointRouter, HealthProbe, NoopLifecycle, SemanticSearch,
    ToolExecutor, ToolLifecycle,
};
pub use metrics::ToolMetrics;
pub use registry::{HealthReport, RegistryError, RegistryStatistics, SearchQuery, ToolRegistry};
pub use result::{
    ExecutionRequest, ExecutionResult, RequestContext, ToolContext, ToolError, ToolErrorKind,
    ValidationError, parameters_fingerprint,
};

#[cfg(test)]
mod tests;
