use crate::dispatcher::Dispatcher;
use crate::run::{FlowRun, RunStatus};
use chrono::Utc;
use flowcore::{
    EventBus, EventName, ExecutionError, ExecutionEvent, FlowError, RunId, RunState, StepContext,
    StepId,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Drives flow runs: schedules eligible steps, applies their outcomes and
/// stops once nothing else can fire.
pub struct FlowExecutor {
    max_parallel: usize,
}

impl FlowExecutor {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute a pending run to completion or failure
    pub async fn execute(
        &self,
        run: &mut FlowRun,
        event_bus: &EventBus,
    ) -> Result<ExecutionResult, FlowError> {
        run.transition(RunStatus::Running)?;
        let start_time = Instant::now();

        event_bus.emit(ExecutionEvent::RunStarted {
            run_id: run.id(),
            flow_name: run.flow().name().to_string(),
            timestamp: Utc::now(),
        });

        tracing::info!("Starting run {} of flow '{}'", run.id(), run.flow().name());

        let result = self.drive(run, event_bus, start_time).await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let success = result.is_ok();
        match &result {
            Ok(report) => {
                run.transition(RunStatus::Completed)?;
                tracing::info!(
                    "Run {} completed in {}ms ({} steps, {} rounds)",
                    report.run_id,
                    duration_ms,
                    report.completed.len(),
                    report.rounds
                );
            }
            Err(e) => {
                run.transition(RunStatus::Failed)?;
                tracing::error!("Run {} failed after {}ms: {}", run.id(), duration_ms, e);
            }
        }

        event_bus.emit(ExecutionEvent::RunCompleted {
            run_id: run.id(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    async fn drive(
        &self,
        run: &FlowRun,
        event_bus: &EventBus,
        start_time: Instant,
    ) -> Result<ExecutionResult, FlowError> {
        let flow = run.flow().clone();
        let run_id = run.id();
        let state = run.state().clone();
        let cancellation = run.cancellation_token();
        // Handed to every step; cancelled with the run or when the run fails.
        let steps_token = cancellation.child_token();
        let deadline = run
            .deadline()
            .map(|limit| (tokio::time::Instant::now() + limit, limit));

        let mut dispatcher = Dispatcher::new(&flow);
        let mut running = FuturesUnordered::new();
        let mut rounds = 0usize;

        loop {
            if cancellation.is_cancelled() {
                tracing::warn!("Run {} cancelled, no further steps scheduled", run_id);
                return Err(FlowError::Cancelled);
            }

            for step_id in dispatcher.eligible() {
                if running.len() >= self.max_parallel {
                    break;
                }

                let definition = flow.resolve(&step_id).ok_or_else(|| {
                    FlowError::InvalidRunState(format!("step '{}' is not part of the flow", step_id))
                })?;
                dispatcher.mark_started(&step_id);

                let ctx = StepContext {
                    run_id,
                    step_id: step_id.clone(),
                    state: state.clone(),
                    events: event_bus.create_emitter(run_id, step_id.clone()),
                    cancellation: steps_token.child_token(),
                };

                event_bus.emit(ExecutionEvent::StepStarted {
                    run_id,
                    step_id: step_id.clone(),
                    timestamp: Utc::now(),
                });
                tracing::debug!("Run {}: starting step '{}' ({})", run_id, step_id, definition.kind());

                let work = definition.work.clone();
                let handle = tokio::spawn(async move {
                    let start = Instant::now();
                    let result = work.execute(ctx).await;
                    (result, start.elapsed().as_millis() as u64)
                });
                running.push(async move { (step_id, handle.await) });
            }

            // Nothing running and nothing eligible: the run is done
            if running.is_empty() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    tracing::warn!("Run {} cancelled while steps were in flight", run_id);
                    return Err(FlowError::Cancelled);
                }
                _ = sleep_until(deadline.map(|(at, _)| at)) => {
                    steps_token.cancel();
                    let millis = deadline.map(|(_, limit)| limit.as_millis() as u64).unwrap_or(0);
                    tracing::warn!("Run {} exceeded its deadline of {}ms", run_id, millis);
                    return Err(FlowError::DeadlineExceeded { millis });
                }
                next = running.next() => next,
            };

            let Some((step_id, joined)) = next else {
                continue;
            };
            rounds += 1;

            let (result, duration_ms) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    steps_token.cancel();
                    emit_failure(event_bus, run_id, &step_id, &e.to_string());
                    return Err(FlowError::TaskJoin {
                        step_id,
                        message: e.to_string(),
                    });
                }
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(cause) => {
                    steps_token.cancel();
                    tracing::error!("Step '{}' failed: {}", step_id, cause);
                    emit_failure(event_bus, run_id, &step_id, &cause.to_string());
                    return Err(ExecutionError::new(step_id, cause).into());
                }
            };

            let unlocked = match dispatcher.apply(&step_id, &outcome) {
                Ok(unlocked) => unlocked,
                Err(e) => {
                    steps_token.cancel();
                    tracing::error!("Step '{}' broke its routing contract: {}", step_id, e);
                    emit_failure(event_bus, run_id, &step_id, &e.to_string());
                    return Err(e.into());
                }
            };

            if let Some(event) = outcome.event() {
                tracing::info!("Step '{}' routed to '{}'", step_id, event);
                event_bus.emit(ExecutionEvent::EventFired {
                    run_id,
                    event: event.clone(),
                    emitted_by: step_id.clone(),
                    timestamp: Utc::now(),
                });
            }

            tracing::info!("Step '{}' completed in {}ms", step_id, duration_ms);
            if !unlocked.is_empty() {
                tracing::debug!("Step '{}' unlocked {:?}", step_id, unlocked);
            }

            event_bus.emit(ExecutionEvent::StepCompleted {
                run_id,
                step_id,
                route: outcome.event().cloned(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        let unexecuted = dispatcher.unexecuted();
        let warning = if unexecuted.is_empty() {
            None
        } else {
            tracing::info!(
                "Run {} finished with {} steps never eligible: {:?}",
                run_id,
                unexecuted.len(),
                unexecuted
            );
            event_bus.emit(ExecutionEvent::StepsNotExecuted {
                run_id,
                steps: unexecuted.clone(),
                timestamp: Utc::now(),
            });
            Some(StuckRunWarning { steps: unexecuted })
        };

        let record = dispatcher.into_record();
        Ok(ExecutionResult {
            run_id,
            flow_name: flow.name().to_string(),
            state: state.snapshot().await,
            completed: record.completed().to_vec(),
            fired: record.fired().to_vec(),
            routes: record.routes().clone(),
            rounds,
            warning,
            duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

impl Default for FlowExecutor {
    fn default() -> Self {
        Self::new(10)
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn emit_failure(event_bus: &EventBus, run_id: RunId, step_id: &StepId, error: &str) {
    event_bus.emit(ExecutionEvent::StepFailed {
        run_id,
        step_id: step_id.clone(),
        error: error.to_string(),
        timestamp: Utc::now(),
    });
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub flow_name: String,
    /// Final state of the run
    pub state: RunState,
    /// Completed steps in completion order
    pub completed: Vec<StepId>,
    pub fired: Vec<EventName>,
    /// Outcome chosen by each router that ran
    pub routes: HashMap<StepId, EventName>,
    /// Scheduling rounds, one per finished step
    pub rounds: usize,
    pub warning: Option<StuckRunWarning>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn has_completed(&self, step: &str) -> bool {
        self.completed.iter().any(|id| id.as_str() == step)
    }

    pub fn route_of(&self, step: &str) -> Option<&EventName> {
        self.routes.get(&StepId::from(step))
    }
}

/// Declared steps that never became eligible in a completed run.
/// Expected for untaken router branches; not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckRunWarning {
    pub steps: Vec<StepId>,
}

impl fmt::Display for StuckRunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(StepId::as_str).collect();
        write!(f, "steps never executed: {}", names.join(", "))
    }
}
