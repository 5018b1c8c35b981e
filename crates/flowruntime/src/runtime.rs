use crate::{ExecutionResult, Flow, FlowExecutor, FlowRun};
use flowcore::{EventBus, ExecutionEvent, FlowError, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Main runtime for executing flows
pub struct FlowRuntime {
    config: RuntimeConfig,
    executor: Arc<FlowExecutor>,
    event_bus: Arc<EventBus>,
    flows: Arc<RwLock<HashMap<String, Flow>>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let executor = Arc::new(FlowExecutor::new(config.max_parallel_steps));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            config,
            executor,
            event_bus,
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a sealed flow under its name, replacing any previous one
    pub async fn register_flow(&self, flow: Flow) {
        tracing::info!("Registering flow '{}'", flow.name());
        let mut flows = self.flows.write().await;
        flows.insert(flow.name().to_string(), flow);
    }

    pub async fn flow(&self, name: &str) -> Option<Flow> {
        self.flows.read().await.get(name).cloned()
    }

    pub async fn flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flows.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Prepare a run of a registered flow. The state is the flow's template
    /// overlaid with `inputs`; the configured deadline applies.
    pub async fn create_run(
        &self,
        flow_name: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<FlowRun, FlowError> {
        let flow = self.flow(flow_name).await.ok_or_else(|| {
            FlowError::InvalidRunState(format!("flow '{}' is not registered", flow_name))
        })?;
        let state = flow.instantiate_state(inputs)?;

        let run = FlowRun::new(flow, state);
        Ok(match self.config.run_deadline_ms {
            Some(ms) => run.with_deadline(Duration::from_millis(ms)),
            None => run,
        })
    }

    /// Execute a prepared run
    pub async fn execute(&self, run: &mut FlowRun) -> Result<ExecutionResult, FlowError> {
        self.executor.execute(run, &self.event_bus).await
    }

    /// Create and execute a run in one go
    pub async fn kickoff(
        &self,
        flow_name: &str,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let mut run = self.create_run(flow_name, inputs).await?;
        self.execute(&mut run).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Steps of one run allowed to execute at the same time
    pub max_parallel_steps: usize,
    pub event_buffer_size: usize,
    /// Deadline applied to runs created through the runtime
    pub run_deadline_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 10,
            event_buffer_size: 1000,
            run_deadline_ms: None,
        }
    }
}
