//! Execution tracking types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tools::ExecutionResult;

/// Where a plan is in its execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Queued,
    Running,
    Completed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Cancelled)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Queued => "queued",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub step: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Progress and outcome of one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationExecutionStatus {
    pub plan_id: String,
    pub state: ExecutionState,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    /// Acceptance time, reset when the plan starts running
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Completed steps over total steps, 0 to 100
    pub progress: f64,
    /// Results of completed steps by step id
    pub results: BTreeMap<String, ExecutionResult>,
    pub errors: Vec<StepError>,
    pub user_id: String,
    pub session_id: Option<String>,
    /// Times the plan has been started
    pub attempts: u32,
    pub total_steps: usize,
    /// Step whose tool call is in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

impl OrchestrationExecutionStatus {
    pub fn new(
        plan_id: impl Into<String>,
        total_steps: usize,
        user_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            state: ExecutionState::Queued,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            progress: 0.0,
            results: BTreeMap::new(),
            errors: Vec::new(),
            user_id: user_id.into(),
            session_id,
            attempts: 0,
            total_steps,
            current_step: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Whether `step_id` has completed, by list or stored result
    pub fn is_satisfied(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id) || self.results.contains_key(step_id)
    }

    pub fn has_attempted(&self, step_id: &str) -> bool {
        self.is_satisfied(step_id) || self.failed_steps.iter().any(|s| s == step_id)
    }

    pub(crate) fn record_success(&mut self, step_id: &str, result: ExecutionResult) {
        if !self.completed_steps.iter().any(|s| s == step_id) {
            self.completed_steps.push(step_id.to_string());
        }
        self.results.insert(step_id.to_string(), result);
        self.recompute_progress();
    }

    pub(crate) fn record_failure(&mut self, step_id: &str, error: impl Into<String>) {
        self.failed_steps.push(step_id.to_string());
        self.errors.push(StepError {
            step: step_id.to_string(),
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn finish(&mut self, state: ExecutionState) {
        self.state = state;
        self.end_time = Some(Utc::now());
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total_steps == 0 {
            0.0
        } else {
            (self.completed_steps.len() as f64 / self.total_steps as f64 * 100.0).min(100.0)
        };
    }

    /// Wall time of a finished run
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }
}

/// A plan waiting for a worker slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub plan_id: String,
    pub priority: i64,
    pub queued_at: DateTime<Utc>,
}

/// Orchestrator-wide performance figures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Tracked executions in any state
    pub total_executions: usize,
    /// Plans currently holding a worker slot
    pub active_executions: usize,
    pub average_execution_time_ms: f64,
    /// Completed plans without failed steps over completed plans
    pub success_rate: f64,
    pub queue_length: usize,
    /// Mean time the pending entries have been waiting
    pub average_queue_wait_ms: f64,
}

/// Snapshot of the queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub length: usize,
    pub running: usize,
    pub max_concurrent: usize,
    /// Highest priority first
    pub entries: Vec<QueueEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracks_completed_steps() {
        let mut status = OrchestrationExecutionStatus::new("plan_1", 4, "u1", None);
        status.record_success("s1", ExecutionResult::success(serde_json::json!(1), 5));
        assert_eq!(status.progress, 25.0);

        status.record_failure("s2", "boom");
        assert_eq!(status.progress, 25.0);
        assert!(status.is_satisfied("s1"));
        assert!(!status.is_satisfied("s2"));
        assert!(status.has_attempted("s2"));
        assert_eq!(status.errors[0].step, "s2");
    }

    #[test]
    fn test_finish_sets_end_time() {
        let mut status = OrchestrationExecutionStatus::new("plan_1", 1, "u1", None);
        assert!(!status.is_finished());
        status.finish(ExecutionState::Cancelled);
        assert!(status.is_finished());
        assert!(status.duration_ms().is_some());
    }
}
