//! Tool Registry: catalog, discovery, single-tool execution and plan generation
//!
//! The `ToolRegistry` provides:
//! - Registration with duplicate detection and an initialization hook
//! - Capability, category and dependency indices
//! - Search by text, capability, category and tags, optionally unioned with
//!   a semantic matcher
//! - Single-tool execution with per-tool metrics
//! - A health sweep that moves tools between `Ready` and `Error`
//! - Plan generation: goal → dependency-ordered [`OrchestrationPlan`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolweave_core::tools::{EchoExecutor, ExecutionRequest, ToolDefinition, ToolRegistry};
//!
//! let registry = ToolRegistry::new(Arc::new(EchoExecutor));
//! registry
//!     .register(ToolDefinition::new("summarize", "Summarize text", "./tools/summarize"))
//!     .await?;
//!
//! let result = registry.execute_tool(ExecutionRequest::new("summarize")).await?;
//! assert!(result.success);
//! ```

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::definition::{ToolDefinition, ToolStatus, ToolUpdate};
use super::executor::{
    AlwaysHealthy, HealthProbe, NoopLifecycle, SemanticSearch, ToolExecutor, ToolLifecycle,
};
use super::metrics::ToolMetrics;
use super::result::{
    ExecutionRequest, ExecutionResult, ToolContext, ToolError, ValidationError,
    parameters_fingerprint,
};
use crate::config::RegistryConfig;
use crate::events::{EventBus, ToolEvent};
use crate::orchestration::{OrchestrationPlan, OrchestrationRequest, PlanStep};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// Tool with this name already exists
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Tool not found
    #[error("Tool '{0}' not found")]
    NotFound(String),

    /// Definition failed validation
    #[error("Invalid tool definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),

    /// Tool exists but is not `Ready`
    #[error("Tool '{name}' is not available (status: {status})")]
    Unavailable { name: String, status: ToolStatus },

    /// Generated plan references missing or unready tools
    #[error("Execution plan is infeasible: {}", .0.join("; "))]
    InfeasiblePlan(Vec<String>),

    /// Tool dependencies form a cycle
    #[error("Tool dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Nothing selectable for the goal
    #[error("No ready tools match goal '{0}'")]
    NoMatchingTools(String),

    /// Replacement definition failed its initialization hook
    #[error("Tool '{name}' failed to initialize: {message}")]
    InitializationFailed { name: String, message: String },
}

/// Search predicates. Every supplied predicate must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring of `name + " " + description`
    pub text: Option<String>,
    /// Tool must expose at least one of these capabilities
    pub capabilities: Option<Vec<String>>,
    /// Exact category
    pub category: Option<String>,
    /// Tool must carry at least one of these tags
    pub tags: Option<Vec<String>>,
    /// Union text matches with the semantic matcher
    #[serde(default)]
    pub semantic: bool,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn semantic(mut self, semantic: bool) -> Self {
        self.semantic = semantic;
        self
    }

    /// Capability, category and tag predicates
    fn matches_structured(&self, tool: &ToolDefinition) -> bool {
        if let Some(wanted) = self.capabilities.as_ref().filter(|c| !c.is_empty())
            && !tool.capabilities.iter().any(|c| wanted.contains(&c.name))
        {
            return false;
        }
        if let Some(category) = &self.category
            && &tool.category != category
        {
            return false;
        }
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty())
            && !tool.tags.iter().any(|t| tags.contains(t))
        {
            return false;
        }
        true
    }

    fn matches_text(&self, tool: &ToolDefinition) -> bool {
        match &self.text {
            Some(text) => tool.search_text().contains(&text.to_lowercase()),
            None => true,
        }
    }
}

/// Outcome of one health sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked: usize,
    pub healthy: Vec<String>,
    pub unhealthy: Vec<String>,
}

/// Aggregate registry figures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_tools: usize,
    pub ready_tools: usize,
    pub error_tools: usize,
    pub disabled_tools: usize,
    pub total_executions: u64,
    pub total_errors: u64,
    pub average_quality_score: f64,
    /// Tool count per category
    pub categories: BTreeMap<String, usize>,
    pub capability_count: usize,
}

#[derive(Default)]
struct RegistryState {
    tools: BTreeMap<String, ToolDefinition>,
    /// capability name → tools exposing it
    capability_index: HashMap<String, BTreeSet<String>>,
    /// category → tools in it
    category_index: HashMap<String, BTreeSet<String>>,
    /// tool → tools it depends on
    dependency_index: HashMap<String, Vec<String>>,
    metrics: HashMap<String, ToolMetrics>,
}

impl RegistryState {
    fn index(&mut self, tool: &ToolDefinition) {
        for capability in &tool.capabilities {
            self.capability_index
                .entry(capability.name.clone())
                .or_default()
                .insert(tool.name.clone());
        }
        self.category_index
            .entry(tool.category.clone())
            .or_default()
            .insert(tool.name.clone());
        self.dependency_index
            .insert(tool.name.clone(), tool.dependencies.clone());
    }

    fn deindex(&mut self, tool: &ToolDefinition) {
        for capability in &tool.capabilities {
            if let Some(names) = self.capability_index.get_mut(&capability.name) {
                names.remove(&tool.name);
                if names.is_empty() {
                    self.capability_index.remove(&capability.name);
                }
            }
        }
        if let Some(names) = self.category_index.get_mut(&tool.category) {
            names.remove(&tool.name);
            if names.is_empty() {
                self.category_index.remove(&tool.category);
            }
        }
        self.dependency_index.remove(&tool.name);
    }

    /// Change a tool's status, returning the event if it actually changed
    fn transition(&mut self, name: &str, to: ToolStatus) -> Option<ToolEvent> {
        let tool = self.tools.get_mut(name)?;
        if tool.status == to {
            return None;
        }
        let from = tool.status;
        tool.status = to;
        tool.updated_at = Utc::now();
        Some(ToolEvent::ToolStatusChanged {
            tool_name: name.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        })
    }

    fn rank(&self, name: &str) -> f64 {
        self.metrics
            .get(name)
            .map(|m| m.quality_score * m.execution_count as f64)
            .unwrap_or(0.0)
    }
}

/// Registry for managing, discovering and executing tools
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    executor: Arc<dyn ToolExecutor>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    probe: Arc<dyn HealthProbe>,
    lifecycle: Arc<dyn ToolLifecycle>,
    config: RegistryConfig,
    events: EventBus,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("has_semantic_search", &self.semantic.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Create a registry that runs tools through `executor`
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            executor,
            semantic: None,
            probe: Arc::new(AlwaysHealthy),
            lifecycle: Arc::new(NoopLifecycle),
            config: RegistryConfig::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_semantic_search(mut self, semantic: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn ToolLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish to an existing bus instead of a private one
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a tool and run its initialization hook.
    ///
    /// A failing hook leaves the tool catalogued in `Error` status; the health
    /// sweep may recover it later.
    pub async fn register(&self, mut tool: ToolDefinition) -> Result<(), RegistryError> {
        tool.normalize();

        let problems = tool.validate();
        if !problems.is_empty() {
            let err = RegistryError::InvalidDefinition(problems);
            self.emit_registration_error(&tool.name, &err);
            return Err(err);
        }

        let now = Utc::now();
        tool.status = ToolStatus::Registered;
        tool.registered_at = now;
        tool.updated_at = now;

        {
            let mut state = self.state.write().await;
            if state.tools.contains_key(&tool.name) {
                drop(state);
                let err = RegistryError::DuplicateTool(tool.name.clone());
                self.emit_registration_error(&tool.name, &err);
                return Err(err);
            }
            state.index(&tool);
            state.metrics.insert(tool.name.clone(), ToolMetrics::new());
            state.tools.insert(tool.name.clone(), tool.clone());
        }

        let status = match self.lifecycle.initialize(&tool).await {
            Ok(()) => ToolStatus::Ready,
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "Tool initialization failed");
                ToolStatus::Error
            }
        };

        let changed = self.state.write().await.transition(&tool.name, status);
        if let Some(event) = changed {
            self.events.emit(event);
        }

        tracing::info!(
            tool = %tool.name,
            version = %tool.version,
            category = %tool.category,
            status = %status,
            "Registered tool"
        );
        self.events.emit(ToolEvent::ToolRegistered {
            tool_name: tool.name.clone(),
            version: tool.version.clone(),
            status,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    fn emit_registration_error(&self, name: &str, err: &RegistryError) {
        tracing::warn!(tool = %name, error = %err, "Tool registration rejected");
        self.events.emit(ToolEvent::ToolRegistrationError {
            tool_name: name.to_string(),
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Remove a tool. The stop hook is best-effort.
    pub async fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let tool = self
            .get_tool(name)
            .await
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if let Err(e) = self.lifecycle.stop(&tool).await {
            tracing::warn!(tool = %name, error = %e, "Stop hook failed, removing anyway");
        }

        {
            let mut state = self.state.write().await;
            let removed = state
                .tools
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            state.deindex(&removed);
            state.metrics.remove(name);
        }

        tracing::info!(tool = %name, "Unregistered tool");
        self.events.emit(ToolEvent::ToolUnregistered {
            tool_name: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Replace a tool's definition with `update` merged over it.
    ///
    /// The merged definition is validated and initialized before the swap;
    /// on any failure the current definition stays in place. Metrics restart.
    pub async fn replace_tool(
        &self,
        name: &str,
        update: &ToolUpdate,
    ) -> Result<ToolDefinition, RegistryError> {
        let current = self
            .get_tool(name)
            .await
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let mut staged = update.apply(&current);
        staged.normalize();
        let problems = staged.validate();
        if !problems.is_empty() {
            return Err(RegistryError::InvalidDefinition(problems));
        }

        self.lifecycle
            .initialize(&staged)
            .await
            .map_err(|e| RegistryError::InitializationFailed {
                name: name.to_string(),
                message: e.message,
            })?;
        staged.status = ToolStatus::Ready;

        let previous = {
            let mut state = self.state.write().await;
            let previous = state
                .tools
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            state.deindex(&previous);
            state.index(&staged);
            state.metrics.insert(name.to_string(), ToolMetrics::new());
            state.tools.insert(name.to_string(), staged.clone());
            previous
        };

        if let Err(e) = self.lifecycle.stop(&previous).await {
            tracing::warn!(tool = %name, error = %e, "Stop hook failed for replaced definition");
        }

        tracing::info!(tool = %name, version = %staged.version, "Updated tool");
        self.events.emit(ToolEvent::ToolUpdated {
            tool_name: name.to_string(),
            version: staged.version.clone(),
            timestamp: Utc::now(),
        });
        Ok(staged)
    }

    /// Toggle a tool between `Ready` and `Disabled`
    pub async fn set_tool_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<ToolStatus, RegistryError> {
        let (status, event) = {
            let mut state = self.state.write().await;
            let current = state
                .tools
                .get(name)
                .map(|t| t.status)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

            let target = match (enabled, current) {
                (true, ToolStatus::Disabled) => ToolStatus::Ready,
                (false, _) => ToolStatus::Disabled,
                (true, other) => other,
            };
            (target, state.transition(name, target))
        };

        if let Some(event) = event {
            tracing::info!(tool = %name, status = %status, "Tool availability changed");
            self.events.emit(event);
        }
        Ok(status)
    }

    /// Find tools matching every supplied predicate, best first.
    ///
    /// Ranking is `quality_score × execution_count` descending, ties by name.
    pub async fn search(&self, query: &SearchQuery) -> Vec<ToolDefinition> {
        let use_semantic = query.semantic
            && self.config.enable_semantic_search
            && self.semantic.is_some()
            && query.text.is_some();

        let (mut results, pool, ranks) = {
            let state = self.state.read().await;
            let mut results = Vec::new();
            let mut pool = Vec::new();
            for tool in state.tools.values() {
                if !query.matches_structured(tool) {
                    continue;
                }
                if query.matches_text(tool) {
                    results.push(tool.clone());
                } else if use_semantic {
                    pool.push(tool.clone());
                }
            }
            let ranks: HashMap<String, f64> = state
                .tools
                .keys()
                .map(|name| (name.clone(), state.rank(name)))
                .collect();
            (results, pool, ranks)
        };

        if let (Some(semantic), Some(text)) = (self.semantic.as_ref(), query.text.as_deref())
            && use_semantic
            && !pool.is_empty()
        {
            let matched: HashSet<String> = semantic.search(text, &pool).await.into_iter().collect();
            results.extend(pool.into_iter().filter(|t| matched.contains(&t.name)));
        }

        results.sort_by(|a, b| {
            let ra = ranks.get(&a.name).copied().unwrap_or(0.0);
            let rb = ranks.get(&b.name).copied().unwrap_or(0.0);
            rb.total_cmp(&ra).then_with(|| a.name.cmp(&b.name))
        });
        results
    }

    /// Execute one tool.
    ///
    /// Executor failures come back as a failed [`ExecutionResult`]; only
    /// lookup and availability problems are returned as `Err`.
    pub async fn execute_tool(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, RegistryError> {
        let started = Instant::now();

        let tool = {
            let mut state = self.state.write().await;
            let tool = state
                .tools
                .get(&request.tool_name)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(request.tool_name.clone()))?;
            if !tool.status.is_ready() {
                return Err(RegistryError::Unavailable {
                    name: tool.name,
                    status: tool.status,
                });
            }
            if let Some(metrics) = state.metrics.get_mut(&tool.name) {
                metrics.record_dispatch();
            }
            tool
        };

        let ExecutionRequest {
            tool_name: _,
            context: request_ctx,
            capability,
            timeout,
        } = request;

        let mut ctx = ToolContext {
            execution_id: format!("exec_{}", uuid::Uuid::new_v4()),
            session_id: request_ctx
                .session_id
                .unwrap_or_else(|| format!("session_{}", uuid::Uuid::new_v4())),
            user_id: request_ctx.user_id,
            capability,
            parameters: request_ctx.parameters.unwrap_or_default(),
            metadata: request_ctx.metadata.unwrap_or_default(),
            timeout: timeout.or(tool.timeout).unwrap_or(self.config.default_timeout),
            started_at: Utc::now(),
        };

        let outcome = match prepare_parameters(&tool, &mut ctx) {
            Ok(()) => {
                tracing::debug!(
                    tool = %tool.name,
                    execution_id = %ctx.execution_id,
                    "Dispatching tool execution"
                );
                self.events.emit(ToolEvent::ToolExecutionStarted {
                    tool_name: tool.name.clone(),
                    execution_id: ctx.execution_id.clone(),
                    session_id: ctx.session_id.clone(),
                    timestamp: Utc::now(),
                });
                AssertUnwindSafe(self.executor.execute(&tool, &ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(ToolError::internal(format!(
                            "executor panicked: {}",
                            panic_message(panic.as_ref())
                        ))
                        .with_code("EXECUTOR_PANIC"))
                    })
            }
            // rejected input never reaches the executor
            Err(error) => Err(error),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status_event = {
            let mut state = self.state.write().await;
            let fault = outcome.as_ref().err().is_some_and(ToolError::is_tool_fault);
            if let Some(metrics) = state.metrics.get_mut(&tool.name) {
                match &outcome {
                    Ok(_) => metrics.record_success(elapsed_ms),
                    Err(_) => metrics.record_failure(elapsed_ms, fault),
                }
            }
            // only move tools the sweep also moves; a concurrent disable wins
            let current = state.tools.get(&tool.name).map(|t| t.status);
            match current {
                Some(s) if s.is_health_checked() => {
                    let target = if fault { ToolStatus::Error } else { ToolStatus::Ready };
                    state.transition(&tool.name, target)
                }
                _ => None,
            }
        };

        let result = match outcome {
            Ok(data) => {
                tracing::debug!(tool = %tool.name, elapsed_ms, "Tool execution completed");
                self.events.emit(ToolEvent::ToolExecutionCompleted {
                    tool_name: tool.name.clone(),
                    execution_id: ctx.execution_id.clone(),
                    execution_time_ms: elapsed_ms,
                    timestamp: Utc::now(),
                });
                ExecutionResult::success(data, elapsed_ms)
            }
            Err(error) => {
                tracing::warn!(tool = %tool.name, error = %error, "Tool execution failed");
                self.events.emit(ToolEvent::ToolExecutionError {
                    tool_name: tool.name.clone(),
                    execution_id: ctx.execution_id.clone(),
                    error: error.message.clone(),
                    timestamp: Utc::now(),
                });
                ExecutionResult::failure(error, elapsed_ms)
            }
        };

        if let Some(event) = status_event {
            self.events.emit(event);
        }

        Ok(result
            .with_metadata("execution_id", ctx.execution_id)
            .with_metadata("session_id", ctx.session_id)
            .with_metadata("tool_version", tool.version)
            .with_metadata("params_hash", parameters_fingerprint(&ctx.parameters)))
    }

    /// Turn a goal into a dependency-ordered plan over `Ready` tools.
    ///
    /// Selection is capped at `max_plan_steps`; the transitive dependencies of
    /// the selected tools are then added ahead of their dependents.
    pub async fn orchestrate_tools(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<Arc<OrchestrationPlan>, RegistryError> {
        match self.build_plan(request).await {
            Ok(plan) => {
                tracing::info!(
                    plan_id = %plan.id,
                    goal = %plan.goal,
                    steps = plan.steps.len(),
                    "Created orchestration plan"
                );
                self.events.emit(ToolEvent::OrchestrationPlanCreated {
                    plan_id: plan.id.clone(),
                    goal: plan.goal.clone(),
                    step_count: plan.steps.len(),
                    timestamp: Utc::now(),
                });
                Ok(Arc::new(plan))
            }
            Err(err) => {
                tracing::warn!(goal = %request.goal, error = %err, "Plan generation failed");
                self.events.emit(ToolEvent::OrchestrationError {
                    goal: request.goal.clone(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn build_plan(
        &self,
        request: &OrchestrationRequest,
    ) -> Result<OrchestrationPlan, RegistryError> {
        let selected = self.select_tools(request).await;
        if selected.is_empty() {
            return Err(RegistryError::NoMatchingTools(request.goal.clone()));
        }

        let state = self.state.read().await;

        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut problems = Vec::new();
        for name in &selected {
            let mut stack = Vec::new();
            resolve_closure(&state, name, &mut stack, &mut done, &mut order, &mut problems)?;
        }
        if !problems.is_empty() {
            return Err(RegistryError::InfeasiblePlan(problems));
        }

        let mut step_ids: HashMap<&str, String> = HashMap::new();
        let mut steps = Vec::with_capacity(order.len());
        for (i, name) in order.iter().enumerate() {
            let Some(tool) = state.tools.get(name) else {
                continue;
            };
            let step_id = format!("step-{}", i + 1);
            let dependencies = state
                .dependency_index
                .get(name)
                .map(|deps| {
                    deps.iter()
                        .filter_map(|d| step_ids.get(d.as_str()).cloned())
                        .collect()
                })
                .unwrap_or_default();
            let estimated = tool.timeout.unwrap_or(self.config.default_timeout);

            steps.push(
                PlanStep::new(&step_id, &tool.name)
                    .with_description(format!("Run {} for: {}", tool.display_name, request.goal))
                    .with_estimated_duration_ms(estimated.as_millis() as u64)
                    .with_dependencies(dependencies),
            );
            step_ids.insert(name.as_str(), step_id);
        }

        let mut plan = OrchestrationPlan::new(&request.goal, steps);
        if let Some(constraints) = &request.constraints {
            plan.constraints = constraints.clone();
        }
        Ok(plan)
    }

    /// Ready tools relevant to the request, best first, capped
    async fn select_tools(&self, request: &OrchestrationRequest) -> Vec<String> {
        let preferred = request.preferred_tools.as_ref().filter(|p| !p.is_empty());

        let mut query = SearchQuery::new().semantic(true);
        if let Some(caps) = request.required_capabilities.as_ref().filter(|c| !c.is_empty()) {
            query = query.capabilities(caps.clone());
        }

        let names: Vec<String> = match preferred {
            // an explicit preference list replaces goal text matching
            Some(preferred) => {
                let matching: HashSet<String> = self
                    .search(&query)
                    .await
                    .into_iter()
                    .filter(|t| t.status.is_ready())
                    .map(|t| t.name)
                    .collect();
                preferred
                    .iter()
                    .filter(|name| matching.contains(*name))
                    .cloned()
                    .collect()
            }
            None => self
                .search(&query.text(&request.goal))
                .await
                .into_iter()
                .filter(|t| t.status.is_ready())
                .map(|t| t.name)
                .collect(),
        };

        let mut seen = HashSet::new();
        names
            .into_iter()
            .filter(|n| seen.insert(n.clone()))
            .take(self.config.max_plan_steps)
            .collect()
    }

    /// Probe every `Ready` or `Error` tool and move it to match the outcome
    pub async fn perform_health_check(&self) -> HealthReport {
        let candidates: Vec<ToolDefinition> = {
            let state = self.state.read().await;
            state
                .tools
                .values()
                .filter(|t| t.status.is_health_checked())
                .cloned()
                .collect()
        };

        let probes = candidates.iter().map(|tool| self.probe.check(tool));
        let outcomes = futures::future::join_all(probes).await;

        let mut report = HealthReport {
            checked: candidates.len(),
            ..Default::default()
        };
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            for (tool, outcome) in candidates.iter().zip(outcomes) {
                let healthy = match outcome {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        tracing::warn!(tool = %tool.name, error = %e, "Health probe failed");
                        events.push(ToolEvent::ToolHealthCheckError {
                            tool_name: tool.name.clone(),
                            error: e.message,
                            timestamp: Utc::now(),
                        });
                        false
                    }
                };

                let still_checked = state
                    .tools
                    .get(&tool.name)
                    .is_some_and(|t| t.status.is_health_checked());
                if !still_checked {
                    continue;
                }

                let target = if healthy {
                    report.healthy.push(tool.name.clone());
                    ToolStatus::Ready
                } else {
                    report.unhealthy.push(tool.name.clone());
                    ToolStatus::Error
                };
                events.extend(state.transition(&tool.name, target));
            }
        }

        for event in events {
            self.events.emit(event);
        }

        tracing::debug!(
            checked = report.checked,
            unhealthy = report.unhealthy.len(),
            "Health check complete"
        );
        report
    }

    /// Run [`perform_health_check`](Self::perform_health_check) every
    /// `health_check_interval` until `token` is cancelled.
    ///
    /// Returns `None` when the interval is zero.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let period = self.config.health_check_interval;
        if period.is_zero() {
            return None;
        }

        let registry = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.perform_health_check().await;
                    }
                }
            }
            tracing::debug!("Health monitor stopped");
        }))
    }

    pub async fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.state.read().await.tools.get(name).cloned()
    }

    pub async fn tool_status(&self, name: &str) -> Option<ToolStatus> {
        self.state.read().await.tools.get(name).map(|t| t.status)
    }

    /// All tools, sorted by name
    pub async fn all_tools(&self) -> Vec<ToolDefinition> {
        self.state.read().await.tools.values().cloned().collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.tools.contains_key(name)
    }

    pub async fn categories(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut categories: Vec<String> = state.category_index.keys().cloned().collect();
        categories.sort();
        categories
    }

    pub async fn all_capabilities(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut capabilities: Vec<String> = state.capability_index.keys().cloned().collect();
        capabilities.sort();
        capabilities
    }

    pub async fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        self.state.read().await.metrics.get(name).cloned()
    }

    /// Metrics of every tool, keyed by name
    pub async fn metrics_snapshot(&self) -> HashMap<String, ToolMetrics> {
        self.state.read().await.metrics.clone()
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let state = self.state.read().await;
        let count = |s: ToolStatus| state.tools.values().filter(|t| t.status == s).count();

        let total_tools = state.tools.len();
        let quality_sum: f64 = state.metrics.values().map(|m| m.quality_score).sum();

        RegistryStatistics {
            total_tools,
            ready_tools: count(ToolStatus::Ready),
            error_tools: count(ToolStatus::Error),
            disabled_tools: count(ToolStatus::Disabled),
            total_executions: state.metrics.values().map(|m| m.execution_count).sum(),
            total_errors: state.metrics.values().map(|m| m.error_count).sum(),
            average_quality_score: if state.metrics.is_empty() {
                0.0
            } else {
                quality_sum / state.metrics.len() as f64
            },
            categories: state
                .category_index
                .iter()
                .map(|(category, tools)| (category.clone(), tools.len()))
                .collect(),
            capability_count: state.capability_index.len(),
        }
    }
}

/// Validate parameters against the requested capability, filling defaults
fn prepare_parameters(tool: &ToolDefinition, ctx: &mut ToolContext) -> Result<(), ToolError> {
    let Some(name) = ctx.capability.as_deref() else {
        return Ok(());
    };
    let Some(capability) = tool.capability(name) else {
        return Err(ToolError::validation(vec![
            ValidationError::new(
                "capability",
                format!("'{}' has no capability '{}'", tool.name, name),
            )
            .with_code("UNKNOWN_CAPABILITY"),
        ]));
    };
    capability
        .prepare_parameters(&mut ctx.parameters)
        .map_err(ToolError::validation)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Depth-first walk adding `name` after its dependencies.
///
/// A name already on `stack` closes a cycle.
fn resolve_closure(
    state: &RegistryState,
    name: &str,
    stack: &mut Vec<String>,
    done: &mut HashSet<String>,
    order: &mut Vec<String>,
    problems: &mut Vec<String>,
) -> Result<(), RegistryError> {
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut cycle: Vec<String> = stack[pos..].to_vec();
        cycle.push(name.to_string());
        return Err(RegistryError::DependencyCycle(cycle));
    }
    if done.contains(name) {
        return Ok(());
    }

    let Some(tool) = state.tools.get(name) else {
        problems.push(format!("tool '{}' does not exist", name));
        done.insert(name.to_string());
        return Ok(());
    };
    if !tool.status.is_ready() {
        problems.push(format!("tool '{}' is not ready (status: {})", name, tool.status));
    }

    stack.push(name.to_string());
    if let Some(deps) = state.dependency_index.get(name) {
        for dep in deps {
            resolve_closure(state, dep, stack, done, order, problems)?;
        }
    }
    stack.pop();

    done.insert(name.to_string());
    order.push(name.to_string());
    Ok(())
}
