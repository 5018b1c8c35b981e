use crate::Step;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type FlowId = Uuid;

/// Identifier of a step, unique within one flow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Named outcome emitted by a router step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventName(String);

impl EventName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the sources of a listen trigger combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    Any,
    All,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::Any => f.write_str("any"),
            Combinator::All => f.write_str("all"),
        }
    }
}

/// Something a listener can wait for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "name")]
pub enum TriggerSource {
    /// Another step completed
    Step(StepId),
    /// A router emitted this outcome
    Event(EventName),
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Step(id) => write!(f, "step:{}", id),
            TriggerSource::Event(name) => write!(f, "event:{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Trigger {
    /// Entry step, runs as soon as the run starts
    Start,
    Listen {
        sources: Vec<TriggerSource>,
        combinator: Combinator,
    },
}

impl Trigger {
    /// Fire once `step` completes.
    pub fn after(step: impl Into<StepId>) -> Self {
        Trigger::Listen {
            sources: vec![TriggerSource::Step(step.into())],
            combinator: Combinator::Any,
        }
    }

    /// Fire once a router emits `event`.
    pub fn on_event(event: impl Into<EventName>) -> Self {
        Trigger::Listen {
            sources: vec![TriggerSource::Event(event.into())],
            combinator: Combinator::Any,
        }
    }

    /// Fire the first time any of `sources` fires.
    pub fn any(sources: impl IntoIterator<Item = TriggerSource>) -> Self {
        Trigger::Listen {
            sources: sources.into_iter().collect(),
            combinator: Combinator::Any,
        }
    }

    /// Fire once every one of `sources` has fired.
    pub fn all(sources: impl IntoIterator<Item = TriggerSource>) -> Self {
        Trigger::Listen {
            sources: sources.into_iter().collect(),
            combinator: Combinator::All,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Trigger::Start)
    }

    pub fn sources(&self) -> &[TriggerSource] {
        match self {
            Trigger::Start => &[],
            Trigger::Listen { sources, .. } => sources,
        }
    }

    /// Evaluate against what has happened so far in a run.
    pub fn is_satisfied(
        &self,
        completed: impl Fn(&StepId) -> bool,
        fired: impl Fn(&EventName) -> bool,
    ) -> bool {
        let seen = |source: &TriggerSource| match source {
            TriggerSource::Step(id) => completed(id),
            TriggerSource::Event(name) => fired(name),
        };
        match self {
            Trigger::Start => true,
            Trigger::Listen { sources, combinator } => match combinator {
                Combinator::Any => sources.iter().any(seen),
                Combinator::All => !sources.is_empty() && sources.iter().all(seen),
            },
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Start => f.write_str("start"),
            Trigger::Listen { sources, combinator } => {
                let names: Vec<String> = sources.iter().map(ToString::to_string).collect();
                write!(f, "{}({})", combinator, names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Routing {
    /// Completes without choosing an outcome
    #[default]
    Plain,
    /// Must pick exactly one of the declared outcomes
    Router { outcomes: BTreeSet<EventName> },
}

impl Routing {
    pub fn declares(&self, outcome: &EventName) -> bool {
        match self {
            Routing::Plain => false,
            Routing::Router { outcomes } => outcomes.contains(outcome),
        }
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &EventName> {
        let outcomes = match self {
            Routing::Plain => None,
            Routing::Router { outcomes } => Some(outcomes.iter()),
        };
        outcomes.into_iter().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Start,
    Listen,
    Router,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Start => f.write_str("start"),
            StepKind::Listen => f.write_str("listen"),
            StepKind::Router => f.write_str("router"),
        }
    }
}

/// A step as registered in a flow: its unit of work plus when it fires
#[derive(Clone)]
pub struct StepDefinition {
    pub id: StepId,
    pub description: Option<String>,
    pub trigger: Trigger,
    pub routing: Routing,
    pub work: Arc<dyn Step>,
}

impl StepDefinition {
    pub fn start(id: impl Into<StepId>, work: impl Step + 'static) -> Self {
        Self::new(id, Trigger::Start, work)
    }

    pub fn listen(id: impl Into<StepId>, trigger: Trigger, work: impl Step + 'static) -> Self {
        Self::new(id, trigger, work)
    }

    pub fn new(id: impl Into<StepId>, trigger: Trigger, work: impl Step + 'static) -> Self {
        Self {
            id: id.into(),
            description: None,
            trigger,
            routing: Routing::Plain,
            work: Arc::new(work),
        }
    }

    /// Turn this step into a router choosing among `outcomes`.
    pub fn router<I, E>(mut self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventName>,
    {
        self.routing = Routing::Router {
            outcomes: outcomes.into_iter().map(Into::into).collect(),
        };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Start wins over router: a router can also be the entry step.
    pub fn kind(&self) -> StepKind {
        match (&self.trigger, &self.routing) {
            (Trigger::Start, _) => StepKind::Start,
            (_, Routing::Router { .. }) => StepKind::Router,
            (Trigger::Listen { .. }, Routing::Plain) => StepKind::Listen,
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self.routing, Routing::Router { .. })
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("routing", &self.routing)
            .field("work", &self.work.name())
            .finish()
    }
}
