use crate::registry::Flow;
use flowcore::{FlowError, RunId, RunState, SharedState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One execution of a flow against its own state.
///
/// A run goes Pending → Running → Completed | Failed exactly once; executing
/// it a second time is rejected.
pub struct FlowRun {
    id: RunId,
    flow: Flow,
    state: SharedState,
    status: RunStatus,
    cancellation: CancellationToken,
    deadline: Option<Duration>,
}

impl FlowRun {
    pub fn new(flow: Flow, state: RunState) -> Self {
        Self {
            id: RunId::new_v4(),
            flow,
            state: SharedState::new(state),
            status: RunStatus::Pending,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Fail the run if it has not finished within `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Request best-effort cancellation. Checked between scheduling rounds;
    /// steps already running see it through their context.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub(crate) fn transition(&mut self, next: RunStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidRunState(format!(
                "run {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        tracing::debug!("Run {} {} -> {}", self.id, self.status, next);
        self.status = next;
        Ok(())
    }
}

impl fmt::Debug for FlowRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRun")
            .field("id", &self.id)
            .field("flow", &self.flow.name())
            .field("status", &self.status)
            .field("deadline", &self.deadline)
            .finish()
    }
}
