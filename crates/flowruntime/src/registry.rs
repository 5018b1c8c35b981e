use flowcore::{
    ConfigurationError, EventName, FlowId, RunState, StateError, StepDefinition, StepId,
    TriggerSource, Value,
};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Collects step definitions until [`StepRegistry::seal`] validates them
/// into an immutable [`Flow`].
pub struct StepRegistry {
    name: String,
    description: Option<String>,
    steps: Vec<StepDefinition>,
    index: HashMap<StepId, usize>,
    start: Option<StepId>,
    template: RunState,
}

impl StepRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            index: HashMap::new(),
            start: None,
            template: RunState::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Default state every run starts from before inputs are applied
    pub fn with_state_template(mut self, template: RunState) -> Self {
        self.template = template;
        self
    }

    /// Register a step. Duplicate ids and a second start step are rejected
    /// here; references between steps are checked by [`StepRegistry::seal`].
    pub fn register(&mut self, step: StepDefinition) -> Result<(), ConfigurationError> {
        if self.index.contains_key(&step.id) {
            return Err(ConfigurationError::DuplicateStep(step.id));
        }
        if step.trigger.is_start() {
            if let Some(first) = &self.start {
                return Err(ConfigurationError::MultipleStarts {
                    first: first.clone(),
                    second: step.id,
                });
            }
            self.start = Some(step.id.clone());
        }

        tracing::debug!("Registering step '{}' ({}) on flow '{}'", step.id, step.kind(), self.name);
        self.index.insert(step.id.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    /// Builder-style [`StepRegistry::register`]
    pub fn step(mut self, step: StepDefinition) -> Result<Self, ConfigurationError> {
        self.register(step)?;
        Ok(self)
    }

    pub fn resolve(&self, id: &StepId) -> Option<&StepDefinition> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }

    /// Validate the whole topology and freeze it.
    pub fn seal(self) -> Result<Flow, ConfigurationError> {
        let start = self.start.clone().ok_or(ConfigurationError::MissingStart)?;

        let mut emitters: HashMap<EventName, Vec<StepId>> = HashMap::new();
        for step in &self.steps {
            if step.is_router() {
                if step.routing.outcomes().next().is_none() {
                    return Err(ConfigurationError::NoOutcomes(step.id.clone()));
                }
                for outcome in step.routing.outcomes() {
                    emitters.entry(outcome.clone()).or_default().push(step.id.clone());
                }
            }
        }

        let mut listeners: HashMap<TriggerSource, Vec<StepId>> = HashMap::new();
        for step in &self.steps {
            if step.trigger.is_start() {
                continue;
            }
            if step.trigger.sources().is_empty() {
                return Err(ConfigurationError::EmptyTrigger(step.id.clone()));
            }
            for source in step.trigger.sources() {
                match source {
                    TriggerSource::Step(id) if !self.index.contains_key(id) => {
                        return Err(ConfigurationError::UnknownStep {
                            step: step.id.clone(),
                            source_step: id.clone(),
                        });
                    }
                    TriggerSource::Event(name) if !emitters.contains_key(name) => {
                        return Err(ConfigurationError::UnknownEvent {
                            step: step.id.clone(),
                            event: name.clone(),
                        });
                    }
                    _ => {}
                }
                let entry = listeners.entry(source.clone()).or_default();
                if !entry.contains(&step.id) {
                    entry.push(step.id.clone());
                }
            }
        }

        let graph = build_graph(&self.steps, &self.index, &emitters);
        let flow = Flow {
            inner: Arc::new(FlowInner {
                id: Uuid::new_v4(),
                name: self.name,
                description: self.description,
                start,
                steps: self.steps,
                index: self.index,
                listeners,
                template: self.template,
                graph,
            }),
        };

        if flow.has_cycles() {
            tracing::warn!(
                "Flow '{}' contains a trigger cycle; steps on it fire at most once per run",
                flow.name()
            );
        }
        tracing::info!("Sealed flow '{}' with {} steps", flow.name(), flow.len());
        Ok(flow)
    }
}

fn build_graph(
    steps: &[StepDefinition],
    index: &HashMap<StepId, usize>,
    emitters: &HashMap<EventName, Vec<StepId>>,
) -> DiGraph<StepId, EdgeLabel> {
    let mut graph = DiGraph::new();
    let nodes: Vec<NodeIndex> = steps.iter().map(|s| graph.add_node(s.id.clone())).collect();

    for (to, step) in steps.iter().enumerate() {
        for source in step.trigger.sources() {
            match source {
                TriggerSource::Step(id) => {
                    if let Some(&from) = index.get(id) {
                        graph.add_edge(nodes[from], nodes[to], EdgeLabel::Completion);
                    }
                }
                TriggerSource::Event(name) => {
                    for router in emitters.get(name).into_iter().flatten() {
                        if let Some(&from) = index.get(router) {
                            graph.add_edge(nodes[from], nodes[to], EdgeLabel::Event(name.clone()));
                        }
                    }
                }
            }
        }
    }
    graph
}

/// Edge weight in the topology graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeLabel {
    Completion,
    Event(EventName),
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeLabel::Completion => Ok(()),
            EdgeLabel::Event(name) => write!(f, "{}", name),
        }
    }
}

struct FlowInner {
    id: FlowId,
    name: String,
    description: Option<String>,
    start: StepId,
    steps: Vec<StepDefinition>,
    index: HashMap<StepId, usize>,
    listeners: HashMap<TriggerSource, Vec<StepId>>,
    template: RunState,
    graph: DiGraph<StepId, EdgeLabel>,
}

/// A validated, immutable flow topology. Cheap to clone and safe to share
/// between concurrent runs.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl Flow {
    pub fn id(&self) -> FlowId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn start_step(&self) -> &StepId {
        &self.inner.start
    }

    pub fn resolve(&self, id: &StepId) -> Option<&StepDefinition> {
        self.inner.index.get(id).map(|&i| &self.inner.steps[i])
    }

    /// Steps in registration order
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.inner.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.steps.is_empty()
    }

    /// Steps whose trigger references `source`
    pub fn listeners_of(&self, source: &TriggerSource) -> &[StepId] {
        self.inner
            .listeners
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn state_template(&self) -> &RunState {
        &self.inner.template
    }

    /// Fresh state for a run: the template overlaid with `inputs`.
    pub fn instantiate_state(
        &self,
        inputs: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<RunState, StateError> {
        let mut state = self.inner.template.clone();
        state.merge(inputs.into_iter().collect())?;
        Ok(state)
    }

    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.inner.graph)
    }

    /// Graphviz rendering of the topology
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.inner.graph))
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("start", &self.inner.start)
            .field("steps", &self.inner.steps)
            .finish()
    }
}
