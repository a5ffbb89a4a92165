//! Orchestration plans and requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Failure handling for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// `0` abandons the remaining steps when this step fails
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Policy that stops the plan on the first failure of this step
    pub fn abort_on_failure() -> Self {
        Self { max_retries: 0 }
    }

    pub fn aborts_plan(&self) -> bool {
        self.max_retries == 0
    }
}

/// One tool invocation inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_duration_ms: u64,
    /// Ids of steps that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            description: String::new(),
            estimated_duration_ms: 0,
            dependencies: Vec::new(),
            parameters: None,
            retry_policy: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// An immutable, dependency-ordered list of steps toward a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    pub id: String,
    pub goal: String,
    /// Distinct tools used by the steps, in step order
    pub required_tools: Vec<String>,
    pub steps: Vec<PlanStep>,
    /// Sum of the step estimates
    pub estimated_duration_ms: u64,
    pub created_at: DateTime<Utc>,
    /// Caller constraints carried along for executors and auditing
    #[serde(default)]
    pub constraints: Map<String, Value>,
}

impl OrchestrationPlan {
    /// Build a plan with a fresh id, deriving `required_tools` and the
    /// duration estimate from `steps`
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let mut seen = HashSet::new();
        let required_tools = steps
            .iter()
            .filter(|s| seen.insert(s.tool_name.clone()))
            .map(|s| s.tool_name.clone())
            .collect();
        let estimated_duration_ms = steps.iter().map(|s| s.estimated_duration_ms).sum();

        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            goal: goal.into(),
            required_tools,
            steps,
            estimated_duration_ms,
            created_at: Utc::now(),
            constraints: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Goal handed to plan generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Map<String, Value>>,
    /// Only tools exposing one of these capabilities are selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<Vec<String>>,
    /// Restricts selection to these tools, in this order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tools: Option<Vec<String>>,
}

impl OrchestrationRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_constraints(mut self, constraints: Map<String, Value>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_required_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = Some(capabilities);
        self
    }

    pub fn with_preferred_tools(mut self, tools: Vec<String>) -> Self {
        self.preferred_tools = Some(tools);
        self
    }
}

/// Find a cycle in the step dependency graph.
///
/// Depth-first search with a recursion stack; reaching a step that is still
/// on the stack closes a cycle. Dependencies naming unknown steps are not
/// edges. Returns the cycle as step ids, first id repeated at the end.
pub fn find_cycle(steps: &[PlanStep]) -> Option<Vec<String>> {
    let graph: HashMap<&str, Vec<&str>> = steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str).collect()))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, Vec<&'a str>>,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }

        stack.push(node);
        for &next in graph.get(node).into_iter().flatten() {
            if !graph.contains_key(next) {
                continue;
            }
            if let Some(cycle) = visit(next, graph, stack, done) {
                return Some(cycle);
            }
        }
        stack.pop();
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for step in steps {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(step.id.as_str(), &graph, &mut stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}
