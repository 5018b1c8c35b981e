use async_trait::async_trait;
use flowcore::{EventName, Step, StepContext, StepError, StepOutcome};

/// Routes on a numeric state field: `above` when the value is at least
/// `threshold`, `below` otherwise.
pub struct ThresholdRouter {
    field: String,
    threshold: f64,
    above: EventName,
    below: EventName,
}

impl ThresholdRouter {
    pub fn new(
        field: impl Into<String>,
        threshold: f64,
        above: impl Into<EventName>,
        below: impl Into<EventName>,
    ) -> Self {
        Self {
            field: field.into(),
            threshold,
            above: above.into(),
            below: below.into(),
        }
    }

    /// Outcomes to declare on the router step
    pub fn outcomes(&self) -> [EventName; 2] {
        [self.above.clone(), self.below.clone()]
    }
}

#[async_trait]
impl Step for ThresholdRouter {
    fn name(&self) -> &str {
        "route.threshold"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let value = ctx.require_f64(&self.field).await?;
        let event = if value >= self.threshold {
            self.above.clone()
        } else {
            self.below.clone()
        };

        ctx.events.info(format!(
            "{} = {} against threshold {} -> {}",
            self.field, value, self.threshold, event
        ));
        Ok(StepOutcome::Route(event))
    }
}
