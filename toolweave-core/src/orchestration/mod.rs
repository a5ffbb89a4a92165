//! Plan execution: validation, priority queueing and bounded concurrency
//!
//! Plans come from [`ToolRegistry::orchestrate_tools`](crate::tools::ToolRegistry::orchestrate_tools)
//! or are built by hand, and are handed to a [`ToolOrchestrator`] which
//! owns their execution status until cleanup evicts it.
//!
//! Per-plan state machine:
//!
//! ```text
//! Queued ──▶ Running ──▶ Completed
//!   │           │            │
//!   └───────────┴─▶ Cancelled│
//!   ▲                        │
//!   └──────── retry ─────────┘
//! ```

mod orchestrator;
mod plan;
mod status;

pub use orchestrator::ToolOrchestrator;
pub use plan::{OrchestrationPlan, OrchestrationRequest, PlanStep, RetryPolicy, find_cycle};
pub use status::{
    ExecutionState, OrchestrationExecutionStatus, PerformanceStats, QueueEntry, QueueStatus,
    StepError,
};

use crate::tools::{RegistryError, ToolStatus};

/// Error type for orchestration operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Plan has no steps")]
    EmptyPlan,

    #[error("Step id '{0}' is used more than once")]
    DuplicateStepId(String),

    /// A step's tool is missing (`status` is `None`) or not `Ready`
    #[error("Step '{step}' needs tool '{tool}', which is {}", describe_status(.status))]
    ToolUnavailable {
        step: String,
        tool: String,
        status: Option<ToolStatus>,
    },

    #[error("Step dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Plan '{0}' is not tracked")]
    PlanNotFound(String),

    #[error("Plan '{0}' is already tracked")]
    AlreadyTracked(String),

    #[error("Plan '{plan_id}' cannot do that while {state}")]
    InvalidState {
        plan_id: String,
        state: ExecutionState,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

fn describe_status(status: &Option<ToolStatus>) -> String {
    match status {
        Some(status) => format!("not ready ({})", status),
        None => "not registered".to_string(),
    }
}
