//! Integration tests for the tools module

use super::*;
use crate::config::RegistryConfig;
use crate::events::ToolEvent;
use crate::orchestration::OrchestrationRequest;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Executor that fails for a configured set of tools and counts calls
#[derive(Default)]
struct ScriptedExecutor {
    calls: AtomicUsize,
    failing: HashSet<String>,
}

impl ScriptedExecutor {
    fn failing(names: &[&str]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    async fn execute(&self, tool: &ToolDefinition, ctx: &ToolContext) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&tool.name) {
            return Err(ToolError::internal(format!("{} exploded", tool.name)));
        }
        Ok(json!({ "tool": tool.name, "parameters": ctx.parameters }))
    }
}

/// Executor that panics instead of returning an error
struct PanickingExecutor;

#[async_trait]
impl ToolExecutor for PanickingExecutor {
    async fn execute(&self, tool: &ToolDefinition, _ctx: &ToolContext) -> Result<Value, ToolError> {
        panic!("{} blew up", tool.name);
    }
}

/// Lifecycle whose hooks fail for configured tools
#[derive(Default)]
struct ScriptedLifecycle {
    failing_init: HashSet<String>,
    failing_stop: bool,
}

#[async_trait]
impl ToolLifecycle for ScriptedLifecycle {
    async fn initialize(&self, tool: &ToolDefinition) -> Result<(), ToolError> {
        if self.failing_init.contains(&tool.name) || tool.entry_point == "./broken" {
            return Err(ToolError::internal("cannot start"));
        }
        Ok(())
    }

    async fn stop(&self, _tool: &ToolDefinition) -> Result<(), ToolError> {
        if self.failing_stop {
            return Err(ToolError::internal("cannot stop"));
        }
        Ok(())
    }
}

/// Probe reporting a shared health flag, or failing outright
#[derive(Default)]
struct SwitchProbe {
    unhealthy: AtomicBool,
    broken: AtomicBool,
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    async fn check(&self, _tool: &ToolDefinition) -> Result<bool, ToolError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ToolError::transient("probe unreachable"));
        }
        Ok(!self.unhealthy.load(Ordering::SeqCst))
    }
}

/// Semantic matcher that returns candidates whose tags contain a query word
struct TagMatcher;

#[async_trait]
impl SemanticSearch for TagMatcher {
    async fn search(&self, query: &str, candidates: &[ToolDefinition]) -> Vec<String> {
        let words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        candidates
            .iter()
            .filter(|t| t.tags.iter().any(|tag| words.contains(tag)))
            .map(|t| t.name.clone())
            .collect()
    }
}

fn tool(name: &str) -> ToolDefinition {
    ToolDefinition::new(name, format!("{} tool", name), format!("./tools/{}", name))
}

fn registry() -> ToolRegistry {
    ToolRegistry::new(Arc::new(ScriptedExecutor::default()))
}

fn drain(rx: &mut crate::events::EventReceiver) -> Vec<ToolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_register_makes_tool_ready() {
    let registry = registry();
    registry.register(tool("alpha").with_version("")).await.unwrap();

    let alpha = registry.get_tool("alpha").await.unwrap();
    assert_eq!(alpha.status, ToolStatus::Ready);
    assert_eq!(alpha.version, "1.0.0");
    assert_eq!(registry.tool_metrics("alpha").await.unwrap().quality_score, 1.0);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let registry = registry();
    let mut rx = registry.events().subscribe();

    registry.register(tool("alpha")).await.unwrap();
    let err = registry
        .register(tool("alpha").with_version("2.0.0"))
        .await
        .unwrap_err();

    assert_eq!(err, RegistryError::DuplicateTool("alpha".to_string()));
    // original definition untouched
    assert_eq!(registry.get_tool("alpha").await.unwrap().version, "1.0.0");
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| e.event_type() == "tool_registration_error")
    );
}

#[tokio::test]
async fn test_invalid_definition_rejected() {
    let registry = registry();
    let err = registry
        .register(ToolDefinition::new("nameless", "", ""))
        .await
        .unwrap_err();

    match err {
        RegistryError::InvalidDefinition(problems) => assert_eq!(problems.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!registry.contains("nameless").await);
}

#[tokio::test]
async fn test_failed_initialization_keeps_tool_in_error() {
    let registry = registry().with_lifecycle(Arc::new(ScriptedLifecycle {
        failing_init: HashSet::from(["flaky".to_string()]),
        failing_stop: false,
    }));

    registry.register(tool("flaky")).await.unwrap();
    assert_eq!(registry.tool_status("flaky").await, Some(ToolStatus::Error));

    let err = registry
        .execute_tool(ExecutionRequest::new("flaky"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unavailable { status: ToolStatus::Error, .. }));

    // a healthy sweep recovers it
    registry.perform_health_check().await;
    assert_eq!(registry.tool_status("flaky").await, Some(ToolStatus::Ready));
}

#[tokio::test]
async fn test_unregister_clears_indices() {
    let registry = registry().with_lifecycle(Arc::new(ScriptedLifecycle {
        failing_init: HashSet::new(),
        failing_stop: true,
    }));
    registry
        .register(
            tool("alpha")
                .with_category("text")
                .with_capability(ToolCapability::new("summarize", "Summarize")),
        )
        .await
        .unwrap();

    registry.unregister("alpha").await.unwrap();

    assert!(registry.categories().await.is_empty());
    assert!(registry.all_capabilities().await.is_empty());
    assert!(registry.tool_metrics("alpha").await.is_none());
    assert_eq!(
        registry.unregister("alpha").await,
        Err(RegistryError::NotFound("alpha".to_string()))
    );
    assert!(matches!(
        registry.execute_tool(ExecutionRequest::new("alpha")).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_search_predicates() {
    let registry = registry();
    registry
        .register(
            tool("summarizer")
                .with_category("text")
                .with_tags(["nlp"])
                .with_capability(ToolCapability::new("summarize", "Summarize text")),
        )
        .await
        .unwrap();
    registry
        .register(
            tool("translator")
                .with_category("text")
                .with_tags(["nlp", "i18n"])
                .with_capability(ToolCapability::new("translate", "Translate text")),
        )
        .await
        .unwrap();
    registry
        .register(tool("charts").with_category("analysis").with_tags(["viz"]))
        .await
        .unwrap();

    let names = |tools: Vec<ToolDefinition>| -> Vec<String> {
        tools.into_iter().map(|t| t.name).collect()
    };

    assert_eq!(
        names(registry.search(&SearchQuery::new().text("SUMMARIZER TOOL")).await),
        vec!["summarizer"]
    );
    assert_eq!(
        names(registry.search(&SearchQuery::new().category("text")).await),
        vec!["summarizer", "translator"]
    );
    assert_eq!(
        names(
            registry
                .search(&SearchQuery::new().capabilities(vec!["translate".to_string()]))
                .await
        ),
        vec!["translator"]
    );
    assert_eq!(
        names(
            registry
                .search(&SearchQuery::new().tags(vec!["viz".into(), "i18n".into()]))
                .await
        ),
        vec!["charts", "translator"]
    );
    // all predicates must hold
    assert!(
        registry
            .search(&SearchQuery::new().category("analysis").tags(vec!["nlp".into()]))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_search_ranks_by_quality_and_usage() {
    let registry = registry();
    for name in ["a", "b", "c"] {
        registry.register(tool(name)).await.unwrap();
    }
    for _ in 0..3 {
        registry.execute_tool(ExecutionRequest::new("c")).await.unwrap();
    }
    registry.execute_tool(ExecutionRequest::new("b")).await.unwrap();

    let order: Vec<String> = registry
        .search(&SearchQuery::new())
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(order, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_semantic_results_are_unioned() {
    let registry = registry().with_semantic_search(Arc::new(TagMatcher));
    registry.register(tool("weather")).await.unwrap();
    registry
        .register(tool("forecaster").with_tags(["weather"]))
        .await
        .unwrap();
    registry.register(tool("mailer")).await.unwrap();

    let plain = registry.search(&SearchQuery::new().text("weather")).await;
    assert_eq!(plain.len(), 1);

    let semantic = registry
        .search(&SearchQuery::new().text("weather").semantic(true))
        .await;
    let names: Vec<&str> = semantic.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["forecaster", "weather"]);

    let disabled = ToolRegistry::new(Arc::new(EchoExecutor))
        .with_semantic_search(Arc::new(TagMatcher))
        .with_config(RegistryConfig {
            enable_semantic_search: false,
            ..Default::default()
        });
    disabled
        .register(tool("forecaster").with_tags(["weather"]))
        .await
        .unwrap();
    assert!(
        disabled
            .search(&SearchQuery::new().text("weather").semantic(true))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_execute_success_records_metrics() {
    let registry = registry();
    let mut rx = registry.events().subscribe();
    registry.register(tool("alpha")).await.unwrap();

    let result = registry
        .execute_tool(
            ExecutionRequest::new("alpha")
                .with_session_id("s-1")
                .with_params(json!({"text": "hello"})),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.data.as_ref().unwrap()["parameters"]["text"], "hello");
    assert_eq!(result.metadata["session_id"], "s-1");
    assert_eq!(result.metadata["tool_version"], "1.0.0");
    assert_eq!(result.metadata["params_hash"].as_str().unwrap().len(), 16);

    let metrics = registry.tool_metrics("alpha").await.unwrap();
    assert_eq!(metrics.execution_count, 1);
    assert_eq!(metrics.success_count, 1);
    assert!((0.0..=1.0).contains(&metrics.quality_score));

    let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
    assert!(kinds.contains(&"tool_execution_started"));
    assert!(kinds.contains(&"tool_execution_completed"));
}

#[tokio::test]
async fn test_execute_failure_marks_tool_error() {
    let registry = ToolRegistry::new(Arc::new(ScriptedExecutor::failing(&["bad"])));
    registry.register(tool("bad")).await.unwrap();

    let result = registry.execute_tool(ExecutionRequest::new("bad")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().kind, ToolErrorKind::Internal);
    assert_eq!(registry.tool_status("bad").await, Some(ToolStatus::Error));

    let metrics = registry.tool_metrics("bad").await.unwrap();
    assert_eq!(metrics.error_count, 1);
    assert_eq!(metrics.failure_count, 1);

    assert!(matches!(
        registry.execute_tool(ExecutionRequest::new("bad")).await,
        Err(RegistryError::Unavailable { .. })
    ));
}

#[tokio::test]
async fn test_executor_panic_becomes_failed_result() {
    let registry = ToolRegistry::new(Arc::new(PanickingExecutor));
    let mut events = registry.events().subscribe();
    registry.register(tool("bad")).await.unwrap();

    let result = registry.execute_tool(ExecutionRequest::new("bad")).await.unwrap();
    assert!(!result.success);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, ToolErrorKind::Internal);
    assert_eq!(error.code.as_deref(), Some("EXECUTOR_PANIC"));
    assert!(error.message.contains("bad blew up"));
    assert_eq!(registry.tool_status("bad").await, Some(ToolStatus::Error));

    let metrics = registry.tool_metrics("bad").await.unwrap();
    assert_eq!(metrics.execution_count, 1);
    assert_eq!(metrics.failure_count, 1);

    assert!(
        drain(&mut events)
            .iter()
            .any(|e| e.event_type() == "tool_execution_error")
    );
}

#[tokio::test]
async fn test_capability_validation_skips_executor() {
    let executor = Arc::new(ScriptedExecutor::default());
    let registry = ToolRegistry::new(executor.clone());
    registry
        .register(
            tool("processor").with_capability(
                ToolCapability::new("process_text", "Process text")
                    .with_parameter(CapabilityParameter::required("text", "string"))
                    .with_parameter(
                        CapabilityParameter::required("operation", "string")
                            .with_enum(["summarize", "analyze"]),
                    )
                    .with_parameter(CapabilityParameter::optional("limit", "number").with_default(3)),
            ),
        )
        .await
        .unwrap();

    let rejected = registry
        .execute_tool(
            ExecutionRequest::new("processor")
                .with_capability("process_text")
                .with_params(json!({"operation": "dance"})),
        )
        .await
        .unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.error.as_ref().unwrap().kind, ToolErrorKind::Validation);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(registry.tool_status("processor").await, Some(ToolStatus::Ready));

    let accepted = registry
        .execute_tool(
            ExecutionRequest::new("processor")
                .with_capability("process_text")
                .with_params(json!({"text": "hi", "operation": "analyze"})),
        )
        .await
        .unwrap();
    assert!(accepted.success);
    assert_eq!(accepted.data.unwrap()["parameters"]["limit"], json!(3));

    let metrics = registry.tool_metrics("processor").await.unwrap();
    assert_eq!(metrics.failure_count, 1);
    assert_eq!(metrics.error_count, 0);
}

#[tokio::test]
async fn test_disable_and_enable() {
    let registry = registry();
    registry.register(tool("alpha")).await.unwrap();

    assert_eq!(
        registry.set_tool_enabled("alpha", false).await.unwrap(),
        ToolStatus::Disabled
    );
    assert!(matches!(
        registry.execute_tool(ExecutionRequest::new("alpha")).await,
        Err(RegistryError::Unavailable { status: ToolStatus::Disabled, .. })
    ));

    // disabled tools are left alone by the sweep
    registry.perform_health_check().await;
    assert_eq!(registry.tool_status("alpha").await, Some(ToolStatus::Disabled));

    assert_eq!(
        registry.set_tool_enabled("alpha", true).await.unwrap(),
        ToolStatus::Ready
    );
}

#[tokio::test]
async fn test_orchestrate_includes_dependency_closure() {
    let registry = registry();
    registry.register(tool("A")).await.unwrap();
    registry.register(tool("B").with_dependency("A")).await.unwrap();

    let plan = registry
        .orchestrate_tools(
            &OrchestrationRequest::new("prepare report").with_preferred_tools(vec!["B".into()]),
        )
        .await
        .unwrap();

    assert_eq!(plan.required_tools, vec!["A", "B"]);
    assert_eq!(plan.steps[0].tool_name, "A");
    assert_eq!(plan.steps[1].dependencies, vec![plan.steps[0].id.clone()]);
    assert_eq!(plan.estimated_duration_ms, 60_000);
}

#[tokio::test]
async fn test_orchestrate_matches_goal_text() {
    let registry = registry();
    registry.register(tool("summarizer")).await.unwrap();
    registry.register(tool("mailer")).await.unwrap();

    let plan = registry
        .orchestrate_tools(&OrchestrationRequest::new("summarizer"))
        .await
        .unwrap();
    assert_eq!(plan.required_tools, vec!["summarizer"]);

    let err = registry
        .orchestrate_tools(&OrchestrationRequest::new("teleport"))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::NoMatchingTools("teleport".to_string()));
}

#[tokio::test]
async fn test_orchestrate_caps_selection() {
    let registry = registry();
    for i in 0..7 {
        registry.register(tool(&format!("worker-{i}"))).await.unwrap();
    }

    let plan = registry
        .orchestrate_tools(&OrchestrationRequest::new("worker"))
        .await
        .unwrap();
    assert_eq!(plan.steps.len(), 5);
}

#[tokio::test]
async fn test_orchestrate_rejects_dependency_cycle() {
    let registry = registry();
    let mut rx = registry.events().subscribe();
    registry.register(tool("A").with_dependency("B")).await.unwrap();
    registry.register(tool("B").with_dependency("A")).await.unwrap();

    let err = registry
        .orchestrate_tools(&OrchestrationRequest::new("A tool"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DependencyCycle(_)));
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| e.event_type() == "orchestration_error")
    );
}

#[tokio::test]
async fn test_orchestrate_reports_missing_and_unready_dependencies() {
    let registry = registry();
    registry.register(tool("base")).await.unwrap();
    registry
        .register(tool("top").with_dependency("base").with_dependency("ghost"))
        .await
        .unwrap();
    registry.set_tool_enabled("base", false).await.unwrap();

    let err = registry
        .orchestrate_tools(&OrchestrationRequest::new("top"))
        .await
        .unwrap_err();
    match err {
        RegistryError::InfeasiblePlan(problems) => {
            assert_eq!(problems.len(), 2);
            assert!(problems.iter().any(|p| p.contains("ghost")));
            assert!(problems.iter().any(|p| p.contains("base")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_health_check_transitions() {
    let probe = Arc::new(SwitchProbe::default());
    let registry = registry().with_health_probe(probe.clone());
    registry.register(tool("alpha")).await.unwrap();
    let mut rx = registry.events().subscribe();

    let report = registry.perform_health_check().await;
    assert_eq!(report.healthy, vec!["alpha"]);
    // no transition, no event
    assert!(drain(&mut rx).is_empty());

    probe.unhealthy.store(true, Ordering::SeqCst);
    registry.perform_health_check().await;
    assert_eq!(registry.tool_status("alpha").await, Some(ToolStatus::Error));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        ToolEvent::ToolStatusChanged { from: ToolStatus::Ready, to: ToolStatus::Error, .. }
    ));

    probe.unhealthy.store(false, Ordering::SeqCst);
    probe.broken.store(true, Ordering::SeqCst);
    let report = registry.perform_health_check().await;
    assert_eq!(report.unhealthy, vec!["alpha"]);
    let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
    assert_eq!(kinds, vec!["tool_health_check_error"]);
}

#[tokio::test]
async fn test_replace_tool_is_staged() {
    let registry = registry().with_lifecycle(Arc::new(ScriptedLifecycle::default()));
    registry
        .register(tool("alpha").with_category("text"))
        .await
        .unwrap();
    registry.execute_tool(ExecutionRequest::new("alpha")).await.unwrap();

    let updated = registry
        .replace_tool("alpha", &ToolUpdate::new().version("2.0.0").category("analysis"))
        .await
        .unwrap();
    assert_eq!(updated.version, "2.0.0");
    assert_eq!(updated.status, ToolStatus::Ready);
    assert_eq!(registry.categories().await, vec!["analysis"]);
    assert_eq!(registry.tool_metrics("alpha").await.unwrap().execution_count, 0);

    let err = registry
        .replace_tool("alpha", &ToolUpdate::new().entry_point("./broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InitializationFailed { .. }));
    let current = registry.get_tool("alpha").await.unwrap();
    assert_eq!(current.entry_point, "./tools/alpha");
    assert_eq!(current.version, "2.0.0");

    assert!(matches!(
        registry.replace_tool("missing", &ToolUpdate::new()).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_statistics() {
    let registry = ToolRegistry::new(Arc::new(ScriptedExecutor::failing(&["bad"])));
    registry
        .register(tool("good").with_category("text"))
        .await
        .unwrap();
    registry
        .register(tool("bad").with_category("text"))
        .await
        .unwrap();
    registry
        .register(tool("idle").with_category("analysis"))
        .await
        .unwrap();
    registry.execute_tool(ExecutionRequest::new("good")).await.unwrap();
    registry.execute_tool(ExecutionRequest::new("bad")).await.unwrap();

    let stats = registry.statistics().await;
    assert_eq!(stats.total_tools, 3);
    assert_eq!(stats.ready_tools, 2);
    assert_eq!(stats.error_tools, 1);
    assert_eq!(stats.total_executions, 2);
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.categories.get("text"), Some(&2));
    assert!(stats.average_quality_score > 0.0 && stats.average_quality_score <= 1.0);
}
