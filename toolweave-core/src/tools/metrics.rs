//! Per-tool execution metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::ToolStatus;

/// Execution time at which the latency factor of the quality score reaches zero
const QUALITY_LATENCY_BASELINE_MS: f64 = 60_000.0;

const SUCCESS_WEIGHT: f64 = 0.7;
const LATENCY_WEIGHT: f64 = 0.3;

/// Counters and derived quality score for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// Executions dispatched (including those still in flight)
    pub execution_count: u64,
    pub success_count: u64,
    /// Executions that returned a failed result, for any reason
    pub failure_count: u64,
    /// Failures caused by the tool itself rather than the caller's input
    pub error_count: u64,
    /// Running mean over finished executions
    pub average_execution_time_ms: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_status: Option<ToolStatus>,
    /// In `[0, 1]`; `1.0` until the first execution finishes
    pub quality_score: f64,
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolMetrics {
    pub fn new() -> Self {
        Self {
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            error_count: 0,
            average_execution_time_ms: 0.0,
            last_executed_at: None,
            last_status: None,
            quality_score: 1.0,
        }
    }

    /// Count an execution as dispatched
    pub fn record_dispatch(&mut self) {
        self.execution_count += 1;
    }

    pub fn record_success(&mut self, execution_time_ms: u64) {
        self.success_count += 1;
        self.last_status = Some(ToolStatus::Ready);
        self.finish(execution_time_ms);
    }

    /// Record a failed execution. `fault` marks failures attributable to the tool.
    pub fn record_failure(&mut self, execution_time_ms: u64, fault: bool) {
        self.failure_count += 1;
        if fault {
            self.error_count += 1;
            self.last_status = Some(ToolStatus::Error);
        } else {
            self.last_status = Some(ToolStatus::Ready);
        }
        self.finish(execution_time_ms);
    }

    /// Successes over finished executions
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            1.0
        } else {
            self.success_count as f64 / finished as f64
        }
    }

    fn finished(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn finish(&mut self, execution_time_ms: u64) {
        let n = self.finished() as f64;
        self.average_execution_time_ms =
            (self.average_execution_time_ms * (n - 1.0) + execution_time_ms as f64) / n;
        self.last_executed_at = Some(Utc::now());
        self.quality_score = self.compute_quality();
    }

    fn compute_quality(&self) -> f64 {
        if self.finished() == 0 {
            return 1.0;
        }
        let latency = (1.0 - self.average_execution_time_ms / QUALITY_LATENCY_BASELINE_MS).max(0.0);
        (SUCCESS_WEIGHT * self.success_rate() + LATENCY_WEIGHT * latency).clamp(0.0, 1.0)
    }
}
