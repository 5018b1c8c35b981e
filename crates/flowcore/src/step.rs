use crate::{events::EventEmitter, EventName, RunId, SharedState, StepError, StepId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Unit of work invoked by the engine
#[async_trait]
pub trait Step: Send + Sync {
    /// Human readable name of the implementation (e.g. "log.state", "fn")
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Run the step against the run's state. Routers return
    /// [`StepOutcome::Route`], everything else [`StepOutcome::Done`].
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError>;
}

/// What a unit of work reports back on success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event")]
pub enum StepOutcome {
    Done,
    Route(EventName),
}

impl StepOutcome {
    pub fn route(event: impl Into<EventName>) -> Self {
        StepOutcome::Route(event.into())
    }

    pub fn event(&self) -> Option<&EventName> {
        match self {
            StepOutcome::Done => None,
            StepOutcome::Route(event) => Some(event),
        }
    }
}

/// Execution context passed to each step
#[derive(Clone)]
pub struct StepContext {
    pub run_id: RunId,

    pub step_id: StepId,

    /// State of the current run, shared with every other step in it
    pub state: SharedState,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled or fails elsewhere
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl StepContext {
    pub fn new(run_id: RunId, step_id: StepId, state: SharedState, events: EventEmitter) -> Self {
        Self {
            run_id,
            step_id,
            state,
            events,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a required field or return error
    pub async fn require(&self, field: &str) -> Result<Value, StepError> {
        self.state
            .get(field)
            .await
            .ok_or_else(|| StepError::MissingField(field.to_string()))
    }

    /// Get a required numeric field
    pub async fn require_f64(&self, field: &str) -> Result<f64, StepError> {
        let value = self.require(field).await?;
        value.as_f64().ok_or_else(|| StepError::InvalidFieldType {
            field: field.to_string(),
            expected: "number".to_string(),
            actual: value.kind().to_string(),
        })
    }

    /// Get a field with default
    pub async fn get_or(&self, field: &str, default: Value) -> Value {
        self.state.get(field).await.unwrap_or(default)
    }

    pub async fn set(&self, field: impl Into<String>, value: impl Into<Value>) -> Result<(), StepError> {
        self.state.set(field, value).await?;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
