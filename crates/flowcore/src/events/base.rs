use crate::{EventName, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted during a flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        flow_name: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        step_id: StepId,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        run_id: RunId,
        step_id: StepId,
        route: Option<EventName>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        run_id: RunId,
        step_id: StepId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    EventFired {
        run_id: RunId,
        event: EventName,
        emitted_by: StepId,
        timestamp: DateTime<Utc>,
    },
    /// The run completed while some declared steps never became eligible,
    /// e.g. the branch a router did not take. Observational only.
    StepsNotExecuted {
        run_id: RunId,
        steps: Vec<StepId>,
        timestamp: DateTime<Utc>,
    },
    StepEvent {
        run_id: RunId,
        step_id: StepId,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::RunCompleted { run_id, .. }
            | ExecutionEvent::StepStarted { run_id, .. }
            | ExecutionEvent::StepCompleted { run_id, .. }
            | ExecutionEvent::StepFailed { run_id, .. }
            | ExecutionEvent::EventFired { run_id, .. }
            | ExecutionEvent::StepsNotExecuted { run_id, .. }
            | ExecutionEvent::StepEvent { run_id, .. } => *run_id,
        }
    }
}

/// Events a unit of work reports about itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter for steps to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    step_id: StepId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, step_id: StepId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            step_id,
            sender,
        }
    }

    /// Emit a step-specific event
    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ExecutionEvent::StepEvent {
            run_id: self.run_id,
            step_id: self.step_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    /// Emit info message
    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    /// Emit warning message
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }

    /// Emit progress update
    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(StepEvent::Progress { percent, message });
    }
}

/// In-process event bus, shared by every run of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: RunId, step_id: StepId) -> EventEmitter {
        EventEmitter::new(run_id, step_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
