//! # Toolweave - Tool Registry and Orchestration Engine
//!
//! Toolweave keeps a catalog of named, versioned tools and runs them, alone
//! or as dependency-ordered plans:
//! - A registry with capability, category and dependency indices
//! - Per-tool metrics and a quality score that drives ranking
//! - Plan generation from a free-text goal, with dependency closure
//! - A priority queue that runs plans with bounded concurrency
//! - Typed lifecycle events delivered in order to every subscriber
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolweave_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ToolManager::builder().start().await?;
//!
//!     let plan_id = manager
//!         .execute_orchestration(&OrchestrationRequest::new("analyze"), "user-1", None)
//!         .await?;
//!     manager.orchestrator().wait_idle().await;
//!
//!     let status = manager.execution_status(&plan_id).await;
//!     println!("{:?}", status.map(|s| s.state));
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **tools**: definitions, metrics and the [`ToolRegistry`](tools::ToolRegistry)
//! - **orchestration**: plans and the [`ToolOrchestrator`](orchestration::ToolOrchestrator)
//! - **manager**: the [`ToolManager`](manager::ToolManager) facade and built-in tools
//! - **events**: the shared [`EventBus`](events::EventBus)

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod orchestration;
pub mod tools;

pub use error::{Result, ToolweaveError};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ConfigBuilder, ManagerConfig, OrchestratorConfig, RegistryConfig, ToolweaveConfig,
    };
    pub use crate::error::{Result, ToolweaveError};
    pub use crate::events::{EventBus, EventReceiver, ToolEvent};
    pub use crate::manager::{
        BatchRegistration, RecommendationContext, RecommendedTool, SystemStatistics, ToolManager,
        ToolManagerBuilder, ToolRecommendations,
    };
    pub use crate::orchestration::{
        ExecutionState, OrchestrationError, OrchestrationExecutionStatus, OrchestrationPlan,
        OrchestrationRequest, PlanStep, RetryPolicy, ToolOrchestrator,
    };
    pub use crate::tools::{
        CapabilityParameter, EchoExecutor, EntryPointRouter, ExecutionRequest, ExecutionResult,
        HealthProbe, RegistryError, SearchQuery, SemanticSearch, ToolCapability, ToolContext,
        ToolDefinition, ToolError, ToolErrorKind, ToolExecutor, ToolLifecycle, ToolRegistry,
        ToolStatus, ToolUpdate,
    };
}
