//! Collaborator traits the registry delegates to
//!
//! The registry owns bookkeeping only. Running a tool, probing its health,
//! initializing or stopping it and semantic matching are all delegated to
//! implementations of the traits below.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use super::definition::ToolDefinition;
use super::result::{ToolContext, ToolError};

/// Runs a tool's business logic
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `tool` with the prepared context
    async fn execute(&self, tool: &ToolDefinition, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Optional semantic matcher consulted by search
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Names of the candidates relevant to `query`
    async fn search(&self, query: &str, candidates: &[ToolDefinition]) -> Vec<String>;
}

/// Health check used by the periodic sweep
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when healthy, `Ok(false)` when unhealthy, `Err` when the
    /// probe itself failed
    async fn check(&self, tool: &ToolDefinition) -> Result<bool, ToolError>;
}

/// Initialization and stop hooks
#[async_trait]
pub trait ToolLifecycle: Send + Sync {
    async fn initialize(&self, tool: &ToolDefinition) -> Result<(), ToolError>;

    async fn stop(&self, tool: &ToolDefinition) -> Result<(), ToolError>;
}

/// Probe that reports every tool healthy
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn check(&self, _tool: &ToolDefinition) -> Result<bool, ToolError> {
        Ok(true)
    }
}

/// Lifecycle whose hooks always succeed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

#[async_trait]
impl ToolLifecycle for NoopLifecycle {
    async fn initialize(&self, _tool: &ToolDefinition) -> Result<(), ToolError> {
        Ok(())
    }

    async fn stop(&self, _tool: &ToolDefinition) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Executor that reports the invocation back instead of doing work.
///
/// Useful as a stand-in while real executors are wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn execute(&self, tool: &ToolDefinition, ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(json!({
            "tool": tool.name,
            "version": tool.version,
            "entry_point": tool.entry_point,
            "capability": ctx.capability,
            "parameters": ctx.parameters,
            "session_id": ctx.session_id,
        }))
    }
}

/// Dispatches to an executor chosen by the tool's `entry_point`
#[derive(Default, Clone)]
pub struct EntryPointRouter {
    routes: HashMap<String, Arc<dyn ToolExecutor>>,
    fallback: Option<Arc<dyn ToolExecutor>>,
}

impl std::fmt::Debug for EntryPointRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self.routes.keys().collect();
        routes.sort();
        f.debug_struct("EntryPointRouter")
            .field("routes", &routes)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl EntryPointRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route tools with this entry point to `executor`
    pub fn route(mut self, entry_point: impl Into<String>, executor: Arc<dyn ToolExecutor>) -> Self {
        self.routes.insert(entry_point.into(), executor);
        self
    }

    /// Executor for entry points without a route
    pub fn with_fallback(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }
}

#[async_trait]
impl ToolExecutor for EntryPointRouter {
    async fn execute(&self, tool: &ToolDefinition, ctx: &ToolContext) -> Result<Value, ToolError> {
        let executor = self
            .routes
            .get(&tool.entry_point)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                ToolError::not_found(format!(
                    "No executor for entry point '{}'",
                    tool.entry_point
                ))
            })?;

        executor.execute(tool, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use std::time::Duration;

    struct Constant(&'static str);

    #[async_trait]
    impl ToolExecutor for Constant {
        async fn execute(&self, _tool: &ToolDefinition, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!(self.0))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            execution_id: "exec_1".to_string(),
            session_id: "s1".to_string(),
            user_id: None,
            capability: None,
            parameters: Map::new(),
            metadata: Map::new(),
            timeout: Duration::from_secs(30),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_by_entry_point() {
        let router = EntryPointRouter::new()
            .route("./tools/a", Arc::new(Constant("a")))
            .with_fallback(Arc::new(Constant("fallback")));

        let a = ToolDefinition::new("a", "A", "./tools/a");
        let b = ToolDefinition::new("b", "B", "./tools/b");

        assert_eq!(router.execute(&a, &context()).await.unwrap(), json!("a"));
        assert_eq!(router.execute(&b, &context()).await.unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn test_router_without_route_or_fallback() {
        let router = EntryPointRouter::new();
        let tool = ToolDefinition::new("a", "A", "./tools/a");

        let err = router.execute(&tool, &context()).await.unwrap_err();
        assert_eq!(err.kind, crate::tools::ToolErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_echo_reports_invocation() {
        let tool = ToolDefinition::new("echo", "Echo", "./tools/echo");
        let value = EchoExecutor.execute(&tool, &context()).await.unwrap();
        assert_eq!(value["tool"], "echo");
        assert_eq!(value["session_id"], "s1");
    }
}
