//! Core abstractions for the flow engine
//!
//! Identifiers, the trigger model, the per-run state container, the unit of
//! work trait and the error taxonomy. Scheduling lives in `flowruntime`.

mod error;
pub mod events;
mod flow;
mod state;
mod step;
mod value;

pub use error::{ConfigurationError, ExecutionError, FlowError, StateError, StepError};
pub use events::*;
pub use flow::{
    Combinator, EventName, FlowId, Routing, StepDefinition, StepId, StepKind, Trigger,
    TriggerSource,
};
pub use state::{RunState, SharedState};
pub use step::{Step, StepContext, StepOutcome};
pub use value::{Value, ValueKind};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
