use crate::{EventName, StepId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run deadline of {millis}ms exceeded")]
    DeadlineExceeded { millis: u64 },

    #[error("Invalid run state: {0}")]
    InvalidRunState(String),

    #[error("Step '{step_id}' task failed to join: {message}")]
    TaskJoin { step_id: StepId, message: String },
}

impl FlowError {
    /// The step a failure is attributed to, if any.
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            FlowError::Execution(e) => Some(&e.step_id),
            FlowError::TaskJoin { step_id, .. } => Some(step_id),
            FlowError::Configuration(e) => e.step_id(),
            _ => None,
        }
    }
}

/// Problems with a flow definition. Detected while registering or sealing,
/// except for route mismatches which only surface once a router runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(StepId),

    #[error("Flow has no start step")]
    MissingStart,

    #[error("Flow declares more than one start step: '{first}' and '{second}'")]
    MultipleStarts { first: StepId, second: StepId },

    #[error("Step '{step}' listens to unknown step '{source_step}'")]
    UnknownStep { step: StepId, source_step: StepId },

    #[error("Step '{step}' listens to event '{event}' which no router declares")]
    UnknownEvent { step: StepId, event: EventName },

    #[error("Step '{0}' has a listen trigger without sources")]
    EmptyTrigger(StepId),

    #[error("Router '{0}' declares no outcomes")]
    NoOutcomes(StepId),

    #[error("Router '{step}' emitted undeclared outcome '{outcome}'")]
    UndeclaredOutcome { step: StepId, outcome: EventName },

    #[error("Router '{0}' finished without choosing an outcome")]
    MissingRoute(StepId),

    #[error("Plain step '{step}' returned outcome '{outcome}'")]
    UnexpectedRoute { step: StepId, outcome: EventName },
}

impl ConfigurationError {
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            ConfigurationError::DuplicateStep(step)
            | ConfigurationError::EmptyTrigger(step)
            | ConfigurationError::NoOutcomes(step)
            | ConfigurationError::MissingRoute(step) => Some(step),
            ConfigurationError::UnknownStep { step, .. }
            | ConfigurationError::UnknownEvent { step, .. }
            | ConfigurationError::UndeclaredOutcome { step, .. }
            | ConfigurationError::UnexpectedRoute { step, .. } => Some(step),
            ConfigurationError::MultipleStarts { second, .. } => Some(second),
            ConfigurationError::MissingStart => None,
        }
    }
}

/// A unit of work failed. Fatal to the run it happened in, and only that run.
#[derive(Error, Debug, Clone)]
#[error("Step '{step_id}' failed: {cause}")]
pub struct ExecutionError {
    pub step_id: StepId,
    #[source]
    pub cause: StepError,
}

impl ExecutionError {
    pub fn new(step_id: StepId, cause: StepError) -> Self {
        Self { step_id, cause }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Field '{field}' holds {expected}, refusing to store {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Missing state field: {0}")]
    MissingField(String),

    #[error("Conversion of '{field}' failed: {message}")]
    Conversion { field: String, message: String },
}

/// Cause reported by a failing unit of work. The engine never interprets it.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid type for '{field}': expected {expected}, got {actual}")]
    InvalidFieldType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::ExecutionFailed(message.into())
    }
}
