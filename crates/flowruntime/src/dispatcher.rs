use crate::registry::Flow;
use flowcore::{ConfigurationError, EventName, Routing, StepId, StepOutcome, TriggerSource};
use std::collections::{HashMap, HashSet};

/// Per-run bookkeeping: what started, what completed, which events fired
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    started: HashSet<StepId>,
    completed: Vec<StepId>,
    completed_set: HashSet<StepId>,
    fired: Vec<EventName>,
    fired_set: HashSet<EventName>,
    routes: HashMap<StepId, EventName>,
}

impl RunRecord {
    pub fn has_started(&self, id: &StepId) -> bool {
        self.started.contains(id)
    }

    pub fn is_completed(&self, id: &StepId) -> bool {
        self.completed_set.contains(id)
    }

    pub fn has_fired(&self, event: &EventName) -> bool {
        self.fired_set.contains(event)
    }

    /// Completed steps in completion order
    pub fn completed(&self) -> &[StepId] {
        &self.completed
    }

    /// Fired events in firing order
    pub fn fired(&self) -> &[EventName] {
        &self.fired
    }

    /// Outcome chosen by each router that ran
    pub fn routes(&self) -> &HashMap<StepId, EventName> {
        &self.routes
    }
}

/// Decides which steps of a run may execute next.
///
/// A step is handed out by [`Dispatcher::eligible`] until it is marked
/// started, and never again afterwards, so every step runs at most once
/// per run no matter how many of its sources fire.
pub struct Dispatcher<'f> {
    flow: &'f Flow,
    record: RunRecord,
}

impl<'f> Dispatcher<'f> {
    pub fn new(flow: &'f Flow) -> Self {
        Self {
            flow,
            record: RunRecord::default(),
        }
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn into_record(self) -> RunRecord {
        self.record
    }

    pub fn mark_started(&mut self, id: &StepId) {
        self.record.started.insert(id.clone());
    }

    /// Record a completion and return the listeners it made eligible.
    pub fn mark_complete(&mut self, id: &StepId) -> Vec<StepId> {
        if self.record.completed_set.insert(id.clone()) {
            self.record.completed.push(id.clone());
        }
        self.newly_eligible(&TriggerSource::Step(id.clone()))
    }

    /// Record an event emitted by router `step`. Only outcomes the router
    /// declared are accepted.
    pub fn mark_event(
        &mut self,
        step: &StepId,
        event: &EventName,
    ) -> Result<Vec<StepId>, ConfigurationError> {
        let declared = self
            .flow
            .resolve(step)
            .map(|def| def.routing.declares(event))
            .unwrap_or(false);
        if !declared {
            return Err(ConfigurationError::UndeclaredOutcome {
                step: step.clone(),
                outcome: event.clone(),
            });
        }

        if self.record.fired_set.insert(event.clone()) {
            self.record.fired.push(event.clone());
        }
        self.record.routes.insert(step.clone(), event.clone());
        Ok(self.newly_eligible(&TriggerSource::Event(event.clone())))
    }

    /// Apply what a unit of work returned. Routers fire their event first and
    /// then complete, so listeners of either become eligible.
    pub fn apply(
        &mut self,
        step: &StepId,
        outcome: &StepOutcome,
    ) -> Result<Vec<StepId>, ConfigurationError> {
        let routing = self
            .flow
            .resolve(step)
            .map(|def| def.routing.clone())
            .unwrap_or_default();

        let mut unlocked = match (&routing, outcome) {
            (Routing::Router { .. }, StepOutcome::Route(event)) => self.mark_event(step, event)?,
            (Routing::Router { .. }, StepOutcome::Done) => {
                return Err(ConfigurationError::MissingRoute(step.clone()));
            }
            (Routing::Plain, StepOutcome::Route(event)) => {
                return Err(ConfigurationError::UnexpectedRoute {
                    step: step.clone(),
                    outcome: event.clone(),
                });
            }
            (Routing::Plain, StepOutcome::Done) => Vec::new(),
        };

        for id in self.mark_complete(step) {
            if !unlocked.contains(&id) {
                unlocked.push(id);
            }
        }
        Ok(unlocked)
    }

    pub fn is_eligible(&self, id: &StepId) -> bool {
        if self.record.has_started(id) {
            return false;
        }
        self.flow
            .resolve(id)
            .map(|def| {
                def.trigger.is_satisfied(
                    |s| self.record.is_completed(s),
                    |e| self.record.has_fired(e),
                )
            })
            .unwrap_or(false)
    }

    /// Steps not yet started whose trigger is satisfied, in registration order
    pub fn eligible(&self) -> Vec<StepId> {
        self.flow
            .steps()
            .filter(|def| self.is_eligible(&def.id))
            .map(|def| def.id.clone())
            .collect()
    }

    /// Declared steps that never started in this run
    pub fn unexecuted(&self) -> Vec<StepId> {
        self.flow
            .steps()
            .filter(|def| !self.record.has_started(&def.id))
            .map(|def| def.id.clone())
            .collect()
    }

    fn newly_eligible(&self, source: &TriggerSource) -> Vec<StepId> {
        self.flow
            .listeners_of(source)
            .iter()
            .filter(|id| self.is_eligible(id))
            .cloned()
            .collect()
    }
}
