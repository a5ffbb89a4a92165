//! Priority queue and bounded-concurrency plan runner

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::plan::{OrchestrationPlan, find_cycle};
use super::status::{
    ExecutionState, OrchestrationExecutionStatus, PerformanceStats, QueueEntry, QueueStatus,
};
use super::OrchestrationError;
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, ToolEvent};
use crate::tools::{ExecutionRequest, ToolRegistry, ToolStatus};

#[derive(Default)]
struct OrchestratorState {
    plans: HashMap<String, Arc<OrchestrationPlan>>,
    executions: HashMap<String, OrchestrationExecutionStatus>,
    /// Highest priority first, FIFO among equals
    queue: Vec<QueueEntry>,
    /// Plans whose run task is alive
    active: HashSet<String>,
}

impl OrchestratorState {
    fn enqueue(&mut self, entry: QueueEntry) {
        let pos = self
            .queue
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, entry);
    }
}

struct BackgroundLoops {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// What to do with the next step of a running plan
enum StepDecision {
    Run { user_id: String, session_id: String },
    Skip(Vec<String>),
    AlreadyAttempted,
    Stop,
}

/// Validates plans, queues them by priority and runs them with at most
/// `max_concurrent_executions` in flight.
///
/// Steps of one plan run sequentially through
/// [`ToolRegistry::execute_tool`]; separate plans run in separate tasks.
pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
    events: EventBus,
    state: Mutex<OrchestratorState>,
    started: AtomicBool,
    background: Mutex<Option<BackgroundLoops>>,
    /// Signalled when a run task ends
    finished: Notify,
    /// Asks the queue loop to run before the next tick
    wake: Notify,
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ToolOrchestrator {
    /// Create an orchestrator publishing on the registry's event bus
    pub fn new(registry: Arc<ToolRegistry>, config: OrchestratorConfig) -> Self {
        let events = registry.events().clone();
        Self {
            registry,
            config,
            events,
            state: Mutex::new(OrchestratorState::default()),
            started: AtomicBool::new(false),
            background: Mutex::new(None),
            finished: Notify::new(),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Check a plan before it is queued.
    ///
    /// Rejects empty plans, repeated step ids, steps whose tool is not
    /// `Ready`, and cyclic step dependencies.
    pub async fn validate_plan(&self, plan: &OrchestrationPlan) -> Result<(), OrchestrationError> {
        if plan.steps.is_empty() {
            return Err(OrchestrationError::EmptyPlan);
        }

        let mut ids = HashSet::new();
        for step in &plan.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(OrchestrationError::DuplicateStepId(step.id.clone()));
            }
        }

        for step in &plan.steps {
            let status = self.registry.tool_status(&step.tool_name).await;
            if status != Some(ToolStatus::Ready) {
                return Err(OrchestrationError::ToolUnavailable {
                    step: step.id.clone(),
                    tool: step.tool_name.clone(),
                    status,
                });
            }
        }

        if let Some(cycle) = find_cycle(&plan.steps) {
            return Err(OrchestrationError::DependencyCycle(cycle));
        }
        Ok(())
    }

    /// Scheduling priority; larger runs first.
    ///
    /// `50 + min(5·steps, 50) + max(100 − duration_ms/10000, −50)
    /// + 30·ready/required`, rounded. The readiness term is zero for plans
    /// without required tools.
    async fn priority(&self, plan: &OrchestrationPlan) -> i64 {
        let steps = plan.steps.len() as f64;
        let mut priority = 50.0
            + (steps * 5.0).min(50.0)
            + (100.0 - plan.estimated_duration_ms as f64 / 10_000.0).max(-50.0);

        if !plan.required_tools.is_empty() {
            let mut ready = 0usize;
            for tool in &plan.required_tools {
                if self.registry.tool_status(tool).await == Some(ToolStatus::Ready) {
                    ready += 1;
                }
            }
            priority += ready as f64 / plan.required_tools.len() as f64 * 30.0;
        }
        priority.round() as i64
    }

    /// Validate and queue a plan. Returns the plan id without waiting.
    pub async fn execute_plan(
        self: &Arc<Self>,
        plan: Arc<OrchestrationPlan>,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<String, OrchestrationError> {
        if let Err(err) = self.validate_plan(&plan).await {
            tracing::warn!(plan_id = %plan.id, error = %err, "Rejected orchestration plan");
            self.events.emit(ToolEvent::ExecutionError {
                plan_id: plan.id.clone(),
                error: err.to_string(),
                timestamp: Utc::now(),
            });
            return Err(err);
        }

        let priority = self.priority(&plan).await;

        {
            let mut state = self.state.lock().await;
            if state.executions.contains_key(&plan.id) {
                return Err(OrchestrationError::AlreadyTracked(plan.id.clone()));
            }
            state.executions.insert(
                plan.id.clone(),
                OrchestrationExecutionStatus::new(&plan.id, plan.steps.len(), user_id, session_id),
            );
            state.plans.insert(plan.id.clone(), Arc::clone(&plan));
            state.enqueue(QueueEntry {
                plan_id: plan.id.clone(),
                priority,
                queued_at: Utc::now(),
            });

            tracing::info!(
                plan_id = %plan.id,
                priority,
                queue_length = state.queue.len(),
                "Queued orchestration plan"
            );
            self.events.emit(ToolEvent::ExecutionQueued {
                plan_id: plan.id.clone(),
                user_id: user_id.to_string(),
                priority,
                timestamp: Utc::now(),
            });
        }

        if self.is_started() {
            self.process_queue().await;
        }
        Ok(plan.id.clone())
    }

    /// Start queued plans while worker slots are free. Returns how many started.
    pub async fn process_queue(self: &Arc<Self>) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut started = 0;

        while state.active.len() < self.config.max_concurrent_executions
            && !state.queue.is_empty()
        {
            let entry = state.queue.remove(0);
            let Some(plan) = state.plans.get(&entry.plan_id).cloned() else {
                continue;
            };
            let Some(status) = state.executions.get_mut(&entry.plan_id) else {
                continue;
            };
            if status.state != ExecutionState::Queued {
                continue;
            }

            status.state = ExecutionState::Running;
            status.start_time = Utc::now();
            status.attempts += 1;
            state.active.insert(plan.id.clone());

            tracing::info!(plan_id = %plan.id, attempt = status.attempts, "Starting plan");
            self.events.emit(ToolEvent::ExecutionStarted {
                plan_id: plan.id.clone(),
                timestamp: Utc::now(),
            });

            tokio::spawn(Arc::clone(self).run_plan(plan));
            started += 1;
        }
        started
    }

    /// Drive one plan and release its slot, even if its steps crash
    async fn run_plan(self: Arc<Self>, plan: Arc<OrchestrationPlan>) {
        let steps = tokio::spawn(Arc::clone(&self).run_steps(Arc::clone(&plan)));
        if let Err(err) = steps.await {
            self.record_crash(&plan, &err.to_string()).await;
        }
        self.finish_plan(&plan).await;

        self.finished.notify_waiters();
        self.wake.notify_one();
    }

    async fn run_steps(self: Arc<Self>, plan: Arc<OrchestrationPlan>) {
        for step in &plan.steps {
            let decision = {
                let mut state = self.state.lock().await;
                match state.executions.get_mut(&plan.id) {
                    None => StepDecision::Stop,
                    Some(status) if status.state != ExecutionState::Running => StepDecision::Stop,
                    Some(status) if status.has_attempted(&step.id) => {
                        StepDecision::AlreadyAttempted
                    }
                    Some(status) => {
                        let missing: Vec<String> = step
                            .dependencies
                            .iter()
                            .filter(|d| !status.is_satisfied(d))
                            .cloned()
                            .collect();
                        if missing.is_empty() {
                            status.current_step = Some(step.id.clone());
                            StepDecision::Run {
                                user_id: status.user_id.clone(),
                                session_id: status
                                    .session_id
                                    .clone()
                                    .unwrap_or_else(|| format!("session_{}", plan.id)),
                            }
                        } else {
                            StepDecision::Skip(missing)
                        }
                    }
                }
            };

            let (user_id, session_id) = match decision {
                StepDecision::Stop => break,
                StepDecision::AlreadyAttempted => continue,
                StepDecision::Skip(missing) => {
                    tracing::debug!(
                        plan_id = %plan.id,
                        step_id = %step.id,
                        ?missing,
                        "Skipping step with unmet dependencies"
                    );
                    self.events.emit(ToolEvent::StepSkipped {
                        plan_id: plan.id.clone(),
                        step_id: step.id.clone(),
                        missing_dependencies: missing,
                        timestamp: Utc::now(),
                    });
                    continue;
                }
                StepDecision::Run {
                    user_id,
                    session_id,
                } => (user_id, session_id),
            };

            tracing::debug!(plan_id = %plan.id, step_id = %step.id, tool = %step.tool_name, "Running step");
            self.events.emit(ToolEvent::StepStarted {
                plan_id: plan.id.clone(),
                step_id: step.id.clone(),
                tool_name: step.tool_name.clone(),
                timestamp: Utc::now(),
            });

            let mut metadata = serde_json::Map::new();
            metadata.insert("plan_id".to_string(), plan.id.clone().into());
            metadata.insert("step_id".to_string(), step.id.clone().into());
            let mut request = ExecutionRequest::new(&step.tool_name)
                .with_session_id(session_id)
                .with_user_id(user_id)
                .with_metadata(metadata);
            if let Some(parameters) = &step.parameters {
                request = request.with_parameters(parameters.clone());
            }

            let outcome = self.registry.execute_tool(request).await;

            let failure = match &outcome {
                Ok(result) if result.success => None,
                Ok(result) => Some(result.error_message().unwrap_or("step failed").to_string()),
                Err(err) => Some(err.to_string()),
            };

            {
                let mut state = self.state.lock().await;
                if let Some(status) = state.executions.get_mut(&plan.id) {
                    status.current_step = None;
                    match outcome {
                        Ok(result) if failure.is_none() => {
                            let elapsed = result.execution_time_ms;
                            status.record_success(&step.id, result);
                            self.events.emit(ToolEvent::StepCompleted {
                                plan_id: plan.id.clone(),
                                step_id: step.id.clone(),
                                execution_time_ms: elapsed,
                                timestamp: Utc::now(),
                            });
                        }
                        _ => {
                            let error = failure.clone().unwrap_or_default();
                            status.record_failure(&step.id, error.clone());
                            self.events.emit(ToolEvent::StepFailed {
                                plan_id: plan.id.clone(),
                                step_id: step.id.clone(),
                                error,
                                timestamp: Utc::now(),
                            });
                        }
                    }
                }
            }

            if let Some(error) = &failure {
                tracing::warn!(plan_id = %plan.id, step_id = %step.id, %error, "Step failed");
                if step.retry_policy.is_some_and(|p| p.aborts_plan()) {
                    tracing::warn!(plan_id = %plan.id, step_id = %step.id, "Abandoning remaining steps");
                    break;
                }
            }
        }
    }

    /// Record a crashed run task as a failure of the step it was running
    async fn record_crash(&self, plan: &OrchestrationPlan, error: &str) {
        tracing::error!(plan_id = %plan.id, %error, "Plan task crashed");
        let mut state = self.state.lock().await;
        if let Some(status) = state.executions.get_mut(&plan.id)
            && let Some(step_id) = status.current_step.take()
        {
            status.record_failure(&step_id, error);
            self.events.emit(ToolEvent::StepFailed {
                plan_id: plan.id.clone(),
                step_id,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.events.emit(ToolEvent::ExecutionError {
            plan_id: plan.id.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn finish_plan(&self, plan: &OrchestrationPlan) {
        let mut state = self.state.lock().await;
        state.active.remove(&plan.id);
        if let Some(status) = state.executions.get_mut(&plan.id)
            && status.state == ExecutionState::Running
        {
            status.finish(ExecutionState::Completed);
            let duration_ms = status.duration_ms().unwrap_or(0);
            tracing::info!(
                plan_id = %plan.id,
                completed = status.completed_steps.len(),
                failed = status.failed_steps.len(),
                duration_ms,
                "Plan finished"
            );
            self.events.emit(ToolEvent::ExecutionCompleted {
                plan_id: plan.id.clone(),
                completed_steps: status.completed_steps.len(),
                failed_steps: status.failed_steps.len(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }
    }

    /// Cancel a queued or running plan.
    ///
    /// A running plan dispatches no further steps; the step in flight is not
    /// interrupted. Returns `false` for unknown or already completed plans.
    pub async fn cancel_execution(&self, plan_id: &str, reason: Option<&str>) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(status) = state.executions.get_mut(plan_id) else {
            return false;
        };

        match status.state {
            ExecutionState::Completed => return false,
            ExecutionState::Cancelled => return true,
            ExecutionState::Queued | ExecutionState::Running => {}
        }

        status.finish(ExecutionState::Cancelled);
        state.queue.retain(|e| e.plan_id != plan_id);

        let reason = reason.unwrap_or("cancelled by caller").to_string();
        tracing::info!(plan_id, %reason, "Cancelled plan");
        self.events.emit(ToolEvent::ExecutionCancelled {
            plan_id: plan_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    /// Put a finished plan back in the queue under the same id.
    ///
    /// Completed steps are not re-run. With `retry_failed_steps` the failed
    /// steps and their errors are cleared so they run again; otherwise they
    /// stay recorded and are passed over.
    pub async fn retry_execution(
        self: &Arc<Self>,
        plan_id: &str,
        retry_failed_steps: bool,
    ) -> Result<String, OrchestrationError> {
        let plan = {
            let state = self.state.lock().await;
            let status = state
                .executions
                .get(plan_id)
                .ok_or_else(|| OrchestrationError::PlanNotFound(plan_id.to_string()))?;
            if !status.is_finished() || state.active.contains(plan_id) {
                return Err(OrchestrationError::InvalidState {
                    plan_id: plan_id.to_string(),
                    state: status.state,
                });
            }
            state
                .plans
                .get(plan_id)
                .cloned()
                .ok_or_else(|| OrchestrationError::PlanNotFound(plan_id.to_string()))?
        };

        let priority = self.priority(&plan).await;

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let status = state
                .executions
                .get_mut(plan_id)
                .ok_or_else(|| OrchestrationError::PlanNotFound(plan_id.to_string()))?;
            if !status.is_finished() || state.active.contains(plan_id) {
                return Err(OrchestrationError::InvalidState {
                    plan_id: plan_id.to_string(),
                    state: status.state,
                });
            }

            if retry_failed_steps {
                status.failed_steps.clear();
                status.errors.clear();
            }
            status.state = ExecutionState::Queued;
            status.end_time = None;

            state.enqueue(QueueEntry {
                plan_id: plan_id.to_string(),
                priority,
                queued_at: Utc::now(),
            });

            tracing::info!(plan_id, priority, retry_failed_steps, "Retrying plan");
            self.events.emit(ToolEvent::ExecutionRetried {
                plan_id: plan_id.to_string(),
                timestamp: Utc::now(),
            });
        }

        if self.is_started() {
            self.process_queue().await;
        }
        Ok(plan_id.to_string())
    }

    /// Evict finished executions, and their plans, that ended before
    /// `now - older_than`. Returns how many were evicted.
    pub async fn cleanup_completed_executions(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return 0;
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let expired: Vec<String> = state
            .executions
            .values()
            .filter(|s| s.is_finished() && !state.active.contains(&s.plan_id))
            .filter(|s| s.end_time.is_some_and(|end| end <= cutoff))
            .map(|s| s.plan_id.clone())
            .collect();

        for plan_id in &expired {
            state.executions.remove(plan_id);
            state.plans.remove(plan_id);
            self.events.emit(ToolEvent::ExecutionCleanedUp {
                plan_id: plan_id.clone(),
                timestamp: Utc::now(),
            });
        }

        if !expired.is_empty() {
            tracing::debug!(evicted = expired.len(), "Cleaned up finished executions");
        }
        expired.len()
    }

    pub async fn status(&self, plan_id: &str) -> Option<OrchestrationExecutionStatus> {
        self.state.lock().await.executions.get(plan_id).cloned()
    }

    pub async fn plan(&self, plan_id: &str) -> Option<Arc<OrchestrationPlan>> {
        self.state.lock().await.plans.get(plan_id).cloned()
    }

    pub async fn performance_stats(&self) -> PerformanceStats {
        let state = self.state.lock().await;
        let now = Utc::now();

        let durations: Vec<u64> = state
            .executions
            .values()
            .filter(|s| s.state == ExecutionState::Completed)
            .filter_map(|s| s.duration_ms())
            .collect();
        let completed = state
            .executions
            .values()
            .filter(|s| s.state == ExecutionState::Completed)
            .count();
        let clean = state
            .executions
            .values()
            .filter(|s| s.state == ExecutionState::Completed && s.failed_steps.is_empty())
            .count();

        let waits: Vec<i64> = state
            .queue
            .iter()
            .map(|e| (now - e.queued_at).num_milliseconds().max(0))
            .collect();

        PerformanceStats {
            total_executions: state.executions.len(),
            active_executions: state.active.len(),
            average_execution_time_ms: mean(durations.iter().map(|d| *d as f64)),
            success_rate: if completed == 0 {
                0.0
            } else {
                clean as f64 / completed as f64
            },
            queue_length: state.queue.len(),
            average_queue_wait_ms: mean(waits.iter().map(|w| *w as f64)),
        }
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            length: state.queue.len(),
            running: state.active.len(),
            max_concurrent: self.config.max_concurrent_executions,
            entries: state.queue.clone(),
        }
    }

    /// Start the queue and cleanup loops. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut background = self.background.lock().await;
            if background.is_some() {
                return;
            }
            self.started.store(true, Ordering::SeqCst);

            let token = CancellationToken::new();
            let handles = vec![
                self.spawn_queue_loop(token.clone()),
                self.spawn_cleanup_loop(token.clone()),
            ];
            *background = Some(BackgroundLoops { token, handles });
        }

        tracing::info!(
            max_concurrent = self.config.max_concurrent_executions,
            "Orchestrator started"
        );
        self.process_queue().await;
    }

    fn spawn_queue_loop(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.queue_tick);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = this.wake.notified() => {}
                }
                this.process_queue().await;
            }
        })
    }

    fn spawn_cleanup_loop(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let period = this.config.cleanup_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.cleanup_completed_executions(this.config.retention).await;
                    }
                }
            }
        })
    }

    /// Stop the background loops and wait up to `shutdown_timeout` for
    /// running plans; plans still running afterwards are cancelled.
    ///
    /// Queued plans stay queued. Returns how many plans were cancelled.
    pub async fn stop(&self) -> usize {
        self.started.store(false, Ordering::SeqCst);

        let background = self.background.lock().await.take();
        if let Some(background) = background {
            background.token.cancel();
            for handle in background.handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background loop ended abnormally");
                }
            }
        }

        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_idle())
            .await
            .is_ok()
        {
            tracing::info!("Orchestrator stopped");
            return 0;
        }

        let running: Vec<String> = self.state.lock().await.active.iter().cloned().collect();
        let mut cancelled = 0;
        for plan_id in running {
            if self
                .cancel_execution(&plan_id, Some("orchestrator shutdown"))
                .await
            {
                cancelled += 1;
            }
        }
        tracing::warn!(cancelled, "Orchestrator stopped with plans still running");
        cancelled
    }

    /// Resolve once no run task is alive
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.finished.notified();
            if self.state.lock().await.active.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}
