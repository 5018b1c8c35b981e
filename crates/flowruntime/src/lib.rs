//! Flow execution runtime
//!
//! This crate provides the step registry that seals a flow topology, the
//! dispatcher that tracks a run's completions and events, and the engine
//! that executes runs with bounded parallelism.

mod dispatcher;
mod executor;
mod registry;
mod run;
mod runtime;

pub use dispatcher::{Dispatcher, RunRecord};
pub use executor::{ExecutionResult, FlowExecutor, StuckRunWarning};
pub use registry::{EdgeLabel, Flow, StepRegistry};
pub use run::{FlowRun, RunStatus};
pub use runtime::{FlowRuntime, RuntimeConfig};
