//! Facade over the registry and the orchestrator
//!
//! [`ToolManager`] wires a [`ToolRegistry`] and a [`ToolOrchestrator`]
//! together, seeds the built-in tools, runs the background health monitor
//! and adds goal-driven tool recommendations on top.
//!
//! ```rust,no_run
//! use toolweave_core::config::ToolweaveConfig;
//! use toolweave_core::manager::ToolManager;
//!
//! # async fn demo() -> toolweave_core::Result<()> {
//! let manager = ToolManager::builder()
//!     .config(ToolweaveConfig::default())
//!     .start()
//!     .await?;
//!
//! let picks = manager.recommend_tools("text", None).await;
//! println!("{} primary recommendations", picks.primary.len());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builtin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ToolweaveConfig;
use crate::error::Result;
use crate::events::{EventBus, EventReceiver};
use crate::orchestration::{
    OrchestrationError, OrchestrationExecutionStatus, OrchestrationRequest, PerformanceStats,
    QueueStatus, ToolOrchestrator,
};
use crate::tools::{
    EchoExecutor, ExecutionRequest, ExecutionResult, HealthProbe, HealthReport,
    RegistryStatistics, SearchQuery, SemanticSearch, ToolDefinition, ToolExecutor, ToolLifecycle,
    ToolRegistry, ToolStatus, ToolUpdate,
};

pub use builtin::{BUILTIN_TOOL_NAMES, builtin_tools};

/// Recommendations per tier
const PRIMARY_TIER: usize = 3;
const SECONDARY_TIER: usize = 5;

/// Narrows the candidates considered by [`ToolManager::recommend_tools`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl RecommendationContext {
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// A recommended tool and the relevance it was ranked by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedTool {
    pub tool: ToolDefinition,
    pub relevance: f64,
}

/// Tiered recommendations, most relevant first within each tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRecommendations {
    pub primary: Vec<RecommendedTool>,
    pub secondary: Vec<RecommendedTool>,
    pub alternative: Vec<RecommendedTool>,
}

impl ToolRecommendations {
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.alternative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A definition that could not be registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRegistration {
    pub name: String,
    pub error: String,
}

/// Outcome of [`ToolManager::register_tools`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRegistration {
    pub successful: Vec<String>,
    pub failed: Vec<FailedRegistration>,
}

/// Combined registry and orchestrator figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatistics {
    pub registry: RegistryStatistics,
    pub orchestrator: PerformanceStats,
    /// Built-in tools seeded at startup
    pub builtin_tools: usize,
    pub total_tools: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

/// Builder for [`ToolManager`]
#[derive(Default)]
pub struct ToolManagerBuilder {
    config: ToolweaveConfig,
    executor: Option<Arc<dyn ToolExecutor>>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    probe: Option<Arc<dyn HealthProbe>>,
    lifecycle: Option<Arc<dyn ToolLifecycle>>,
    events: Option<EventBus>,
}

impl ToolManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ToolweaveConfig) -> Self {
        self.config = config;
        self
    }

    /// Executor used for every tool; defaults to [`EchoExecutor`]
    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn semantic_search(mut self, semantic: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn ToolLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the components, seed built-ins and start the background tasks
    pub async fn start(self) -> Result<ToolManager> {
        self.config.validate()?;

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(EchoExecutor) as Arc<dyn ToolExecutor>);
        let mut registry = ToolRegistry::new(executor).with_config(self.config.registry.clone());
        if let Some(semantic) = self.semantic {
            registry = registry.with_semantic_search(semantic);
        }
        if let Some(probe) = self.probe {
            registry = registry.with_health_probe(probe);
        }
        if let Some(lifecycle) = self.lifecycle {
            registry = registry.with_lifecycle(lifecycle);
        }
        if let Some(events) = self.events {
            registry = registry.with_event_bus(events);
        }
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(ToolOrchestrator::new(
            Arc::clone(&registry),
            self.config.orchestrator.clone(),
        ));

        let mut builtin = Vec::new();
        if self.config.manager.seed_builtin_tools {
            for tool in builtin_tools() {
                let name = tool.name.clone();
                match registry.register(tool).await {
                    Ok(()) => builtin.push(name),
                    Err(e) => tracing::warn!(tool = %name, error = %e, "Built-in tool not registered"),
                }
            }
        }

        orchestrator.start().await;

        if self.config.manager.initial_health_check {
            registry.perform_health_check().await;
        }

        let token = CancellationToken::new();
        let monitor = registry.spawn_health_monitor(token.clone());

        tracing::info!(
            builtin = builtin.len(),
            health_monitor = monitor.is_some(),
            "Tool manager started"
        );

        Ok(ToolManager {
            registry,
            orchestrator,
            builtin,
            started_at: Utc::now(),
            token,
            monitor,
        })
    }
}

/// Single entry point for registering, finding and running tools
pub struct ToolManager {
    registry: Arc<ToolRegistry>,
    orchestrator: Arc<ToolOrchestrator>,
    builtin: Vec<String>,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManager")
            .field("builtin", &self.builtin)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl ToolManager {
    pub fn builder() -> ToolManagerBuilder {
        ToolManagerBuilder::new()
    }

    /// Start a manager with `config` and `executor` and default collaborators
    pub async fn start(config: ToolweaveConfig, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        Self::builder().config(config).executor(executor).start().await
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<ToolOrchestrator> {
        &self.orchestrator
    }

    /// Names of the built-in tools that registered successfully
    pub fn builtin_tools(&self) -> &[String] {
        &self.builtin
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.registry.events().subscribe()
    }

    pub async fn register_tool(&self, tool: ToolDefinition) -> Result<()> {
        Ok(self.registry.register(tool).await?)
    }

    /// Register each definition independently; failures don't stop the batch
    pub async fn register_tools(&self, tools: Vec<ToolDefinition>) -> BatchRegistration {
        let mut outcome = BatchRegistration::default();
        for tool in tools {
            let name = tool.name.clone();
            match self.registry.register(tool).await {
                Ok(()) => outcome.successful.push(name),
                Err(e) => outcome.failed.push(FailedRegistration {
                    name,
                    error: e.to_string(),
                }),
            }
        }
        outcome
    }

    pub async fn unregister_tool(&self, name: &str) -> Result<()> {
        Ok(self.registry.unregister(name).await?)
    }

    /// Merge `update` over the current definition and swap it in
    pub async fn update_tool(&self, name: &str, update: ToolUpdate) -> Result<ToolDefinition> {
        Ok(self.registry.replace_tool(name, &update).await?)
    }

    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) -> Result<ToolStatus> {
        Ok(self.registry.set_tool_enabled(name, enabled).await?)
    }

    pub async fn execute_tool(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        Ok(self.registry.execute_tool(request).await?)
    }

    /// Generate a plan for `request` and queue it. Returns the plan id.
    pub async fn execute_orchestration(
        &self,
        request: &OrchestrationRequest,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<String> {
        let plan = self
            .registry
            .orchestrate_tools(request)
            .await
            .map_err(OrchestrationError::from)?;
        Ok(self
            .orchestrator
            .execute_plan(plan, user_id, session_id)
            .await?)
    }

    pub async fn execution_status(&self, plan_id: &str) -> Option<OrchestrationExecutionStatus> {
        self.orchestrator.status(plan_id).await
    }

    pub async fn cancel_execution(&self, plan_id: &str, reason: Option<&str>) -> bool {
        self.orchestrator.cancel_execution(plan_id, reason).await
    }

    pub async fn retry_execution(&self, plan_id: &str, retry_failed_steps: bool) -> Result<String> {
        Ok(self
            .orchestrator
            .retry_execution(plan_id, retry_failed_steps)
            .await?)
    }

    pub async fn queue_status(&self) -> QueueStatus {
        self.orchestrator.queue_status().await
    }

    pub async fn search_tools(&self, query: &SearchQuery) -> Vec<ToolDefinition> {
        self.registry.search(query).await
    }

    pub async fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.registry.get_tool(name).await
    }

    pub async fn tools(&self) -> Vec<ToolDefinition> {
        self.registry.all_tools().await
    }

    pub async fn perform_health_check(&self) -> HealthReport {
        self.registry.perform_health_check().await
    }

    /// Rank tools for `goal` and split them into tiers.
    ///
    /// Candidates come from a semantic-enabled text search on `goal`,
    /// narrowed by the context's category and tags. Relevance is
    /// `40·text match + 30·capability match + 20·quality +
    /// min(executions/10, 10)`; the top three are primary, the next five
    /// secondary, the rest alternatives.
    pub async fn recommend_tools(
        &self,
        goal: &str,
        context: Option<&RecommendationContext>,
    ) -> ToolRecommendations {
        let mut query = SearchQuery::new().text(goal).semantic(true);
        if let Some(context) = context {
            if let Some(category) = &context.category {
                query = query.category(category.clone());
            }
            if let Some(tags) = &context.tags {
                query = query.tags(tags.clone());
            }
        }

        let candidates = self.registry.search(&query).await;
        let metrics = self.registry.metrics_snapshot().await;
        let goal = goal.to_lowercase();

        let mut ranked: Vec<RecommendedTool> = candidates
            .into_iter()
            .map(|tool| {
                let (quality, executions) = metrics
                    .get(&tool.name)
                    .map(|m| (m.quality_score, m.execution_count))
                    .unwrap_or((0.0, 0));
                RecommendedTool {
                    relevance: relevance(&tool, &goal, quality, executions),
                    tool,
                }
            })
            .collect();
        // stable sort keeps search order among equal scores
        ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let alternative = ranked.split_off(ranked.len().min(PRIMARY_TIER + SECONDARY_TIER));
        let secondary = ranked.split_off(ranked.len().min(PRIMARY_TIER));
        ToolRecommendations {
            primary: ranked,
            secondary,
            alternative,
        }
    }

    pub async fn system_statistics(&self) -> SystemStatistics {
        let registry = self.registry.statistics().await;
        let orchestrator = self.orchestrator.performance_stats().await;
        let uptime_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        SystemStatistics {
            total_tools: registry.total_tools,
            registry,
            orchestrator,
            builtin_tools: self.builtin.len(),
            started_at: self.started_at,
            uptime_ms,
        }
    }

    /// Stop the health monitor and the orchestrator.
    ///
    /// Returns how many running plans had to be cancelled.
    pub async fn shutdown(self) -> usize {
        self.token.cancel();
        if let Some(monitor) = self.monitor
            && let Err(e) = monitor.await
        {
            tracing::warn!(error = %e, "Health monitor ended abnormally");
        }
        let cancelled = self.orchestrator.stop().await;
        tracing::info!(cancelled, "Tool manager shut down");
        cancelled
    }
}

/// Relevance of `tool` to a lowercased goal
fn relevance(tool: &ToolDefinition, goal: &str, quality: f64, executions: u64) -> f64 {
    let mut score = 0.0;

    let text = format!("{} {} {}", tool.name, tool.description, tool.tags.join(" ")).to_lowercase();
    if text.contains(goal) {
        score += 40.0;
    }

    if tool.capabilities.iter().any(|c| {
        c.name.to_lowercase().contains(goal) || c.description.to_lowercase().contains(goal)
    }) {
        score += 30.0;
    }

    score += quality * 20.0;
    if executions > 0 {
        score += (executions as f64 / 10.0).min(10.0);
    }
    score
}
