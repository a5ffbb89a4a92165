//! Typed notification stream for registry and orchestrator activity
//!
//! Every state change in the engine is published as a [`ToolEvent`] on an
//! [`EventBus`]. The registry, orchestrator and manager share one bus, so a
//! single subscription observes the whole system in emission order.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolweave_core::events::{EventBus, ToolEvent};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             ToolEvent::ExecutionCompleted { plan_id, failed_steps, .. } => {
//!                 println!("{} finished with {} failures", plan_id, failed_steps);
//!             }
//!             _ => {}
//!         }
//!     }
//! });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::tools::ToolStatus;

/// Events emitted by the registry and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// A tool was added to the catalog
    ToolRegistered {
        tool_name: String,
        version: String,
        status: ToolStatus,
        timestamp: DateTime<Utc>,
    },

    /// A registration attempt was rejected
    ToolRegistrationError {
        tool_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was removed from the catalog
    ToolUnregistered {
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool definition was replaced in place
    ToolUpdated {
        tool_name: String,
        version: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool changed status
    ToolStatusChanged {
        tool_name: String,
        from: ToolStatus,
        to: ToolStatus,
        timestamp: DateTime<Utc>,
    },

    /// The health probe itself failed for a tool
    ToolHealthCheckError {
        tool_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation was dispatched to its executor
    ToolExecutionStarted {
        tool_name: String,
        execution_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation returned successfully
    ToolExecutionCompleted {
        tool_name: String,
        execution_id: String,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation failed
    ToolExecutionError {
        tool_name: String,
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The registry produced a plan for a goal
    OrchestrationPlanCreated {
        plan_id: String,
        goal: String,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Plan generation failed
    OrchestrationError {
        goal: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan was accepted into the execution queue
    ExecutionQueued {
        plan_id: String,
        user_id: String,
        priority: i64,
        timestamp: DateTime<Utc>,
    },

    /// A queued plan obtained a worker slot
    ExecutionStarted {
        plan_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan ran to the end of its steps
    ExecutionCompleted {
        plan_id: String,
        completed_steps: usize,
        failed_steps: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A plan was cancelled
    ExecutionCancelled {
        plan_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A finished plan was put back in the queue
    ExecutionRetried {
        plan_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A finished plan was evicted from tracking
    ExecutionCleanedUp {
        plan_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan could not be executed
    ExecutionError {
        plan_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan step was dispatched
    StepStarted {
        plan_id: String,
        step_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan step succeeded
    StepCompleted {
        plan_id: String,
        step_id: String,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A plan step failed
    StepFailed {
        plan_id: String,
        step_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A plan step was passed over because its dependencies were unmet
    StepSkipped {
        plan_id: String,
        step_id: String,
        missing_dependencies: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ToolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ToolEvent::ToolRegistered { .. } => "tool_registered",
            ToolEvent::ToolRegistrationError { .. } => "tool_registration_error",
            ToolEvent::ToolUnregistered { .. } => "tool_unregistered",
            ToolEvent::ToolUpdated { .. } => "tool_updated",
            ToolEvent::ToolStatusChanged { .. } => "tool_status_changed",
            ToolEvent::ToolHealthCheckError { .. } => "tool_health_check_error",
            ToolEvent::ToolExecutionStarted { .. } => "tool_execution_started",
            ToolEvent::ToolExecutionCompleted { .. } => "tool_execution_completed",
            ToolEvent::ToolExecutionError { .. } => "tool_execution_error",
            ToolEvent::OrchestrationPlanCreated { .. } => "orchestration_plan_created",
            ToolEvent::OrchestrationError { .. } => "orchestration_error",
            ToolEvent::ExecutionQueued { .. } => "execution_queued",
            ToolEvent::ExecutionStarted { .. } => "execution_started",
            ToolEvent::ExecutionCompleted { .. } => "execution_completed",
            ToolEvent::ExecutionCancelled { .. } => "execution_cancelled",
            ToolEvent::ExecutionRetried { .. } => "execution_retried",
            ToolEvent::ExecutionCleanedUp { .. } => "execution_cleaned_up",
            ToolEvent::ExecutionError { .. } => "execution_error",
            ToolEvent::StepStarted { .. } => "step_started",
            ToolEvent::StepCompleted { .. } => "step_completed",
            ToolEvent::StepFailed { .. } => "step_failed",
            ToolEvent::StepSkipped { .. } => "step_skipped",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ToolEvent::ToolRegistered { timestamp, .. }
            | ToolEvent::ToolRegistrationError { timestamp, .. }
            | ToolEvent::ToolUnregistered { timestamp, .. }
            | ToolEvent::ToolUpdated { timestamp, .. }
            | ToolEvent::ToolStatusChanged { timestamp, .. }
            | ToolEvent::ToolHealthCheckError { timestamp, .. }
            | ToolEvent::ToolExecutionStarted { timestamp, .. }
            | ToolEvent::ToolExecutionCompleted { timestamp, .. }
            | ToolEvent::ToolExecutionError { timestamp, .. }
            | ToolEvent::OrchestrationPlanCreated { timestamp, .. }
            | ToolEvent::OrchestrationError { timestamp, .. }
            | ToolEvent::ExecutionQueued { timestamp, .. }
            | ToolEvent::ExecutionStarted { timestamp, .. }
            | ToolEvent::ExecutionCompleted { timestamp, .. }
            | ToolEvent::ExecutionCancelled { timestamp, .. }
            | ToolEvent::ExecutionRetried { timestamp, .. }
            | ToolEvent::ExecutionCleanedUp { timestamp, .. }
            | ToolEvent::ExecutionError { timestamp, .. }
            | ToolEvent::StepStarted { timestamp, .. }
            | ToolEvent::StepCompleted { timestamp, .. }
            | ToolEvent::StepFailed { timestamp, .. }
            | ToolEvent::StepSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the tool name if the event concerns a single tool
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            ToolEvent::ToolRegistered { tool_name, .. }
            | ToolEvent::ToolRegistrationError { tool_name, .. }
            | ToolEvent::ToolUnregistered { tool_name, .. }
            | ToolEvent::ToolUpdated { tool_name, .. }
            | ToolEvent::ToolStatusChanged { tool_name, .. }
            | ToolEvent::ToolHealthCheckError { tool_name, .. }
            | ToolEvent::ToolExecutionStarted { tool_name, .. }
            | ToolEvent::ToolExecutionCompleted { tool_name, .. }
            | ToolEvent::ToolExecutionError { tool_name, .. }
            | ToolEvent::StepStarted { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    /// Get the plan id if the event concerns a plan
    pub fn plan_id(&self) -> Option<&str> {
        match self {
            ToolEvent::OrchestrationPlanCreated { plan_id, .. }
            | ToolEvent::ExecutionQueued { plan_id, .. }
            | ToolEvent::ExecutionStarted { plan_id, .. }
            | ToolEvent::ExecutionCompleted { plan_id, .. }
            | ToolEvent::ExecutionCancelled { plan_id, .. }
            | ToolEvent::ExecutionRetried { plan_id, .. }
            | ToolEvent::ExecutionCleanedUp { plan_id, .. }
            | ToolEvent::ExecutionError { plan_id, .. }
            | ToolEvent::StepStarted { plan_id, .. }
            | ToolEvent::StepCompleted { plan_id, .. }
            | ToolEvent::StepFailed { plan_id, .. }
            | ToolEvent::StepSkipped { plan_id, .. } => Some(plan_id),
            _ => None,
        }
    }
}

/// Receiver half of a subscription
pub type EventReceiver = mpsc::UnboundedReceiver<ToolEvent>;

/// Fan-out publisher for [`ToolEvent`]s.
///
/// Each subscriber owns an unbounded channel, so a slow subscriber never
/// blocks the engine and sees events in the order they were emitted.
/// Subscribers whose receiver has been dropped are pruned on the next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ToolEvent>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().iter().filter(|s| !s.is_closed()).count()
    }

    /// Publish an event to all subscribers
    pub fn emit(&self, event: ToolEvent) {
        tracing::debug!(event_type = event.event_type(), "Emitting event");

        self.lock_subscribers().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// The sender list stays valid if a holder panicked, so recover the guard
    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ToolEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Event subscriber list was poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unregistered(name: &str) -> ToolEvent {
        ToolEvent::ToolUnregistered {
            tool_name: name.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(unregistered("a"));
        bus.emit(unregistered("b"));
        bus.emit(unregistered("c"));

        let names: Vec<String> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|e| e.unwrap().tool_name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_poisoned_subscriber_list_still_delivers() {
        let bus = EventBus::new();
        let mut before = bus.subscribe();

        let subscribers = Arc::clone(&bus.subscribers);
        let crashed = std::thread::spawn(move || {
            let _guard = subscribers.lock().unwrap();
            panic!("subscriber holder crashed");
        })
        .join();
        assert!(crashed.is_err());
        assert!(bus.subscribers.is_poisoned());

        let mut after = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(unregistered("a"));

        assert_eq!(before.recv().await.unwrap().tool_name(), Some("a"));
        assert_eq!(after.recv().await.unwrap().tool_name(), Some("a"));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(unregistered("shared"));

        assert_eq!(first.recv().await.unwrap().event_type(), "tool_unregistered");
        assert_eq!(second.recv().await.unwrap().event_type(), "tool_unregistered");
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.emit(unregistered("x"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_accessors_and_serialization() {
        let event = ToolEvent::StepFailed {
            plan_id: "plan_1".to_string(),
            step_id: "step-2".to_string(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "step_failed");
        assert_eq!(event.plan_id(), Some("plan_1"));
        assert!(event.tool_name().is_none());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_failed");
        assert_eq!(json["step_id"], "step-2");
    }
}
