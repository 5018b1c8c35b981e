use async_trait::async_trait;
use flowcore::{Step, StepContext, StepError, StepOutcome, Value};
use tokio::time::{sleep, Duration};

/// Waits before completing, optionally writing a field afterwards.
/// Stands in for a slow external collaborator.
pub struct DelayStep {
    delay: Duration,
    output: Option<(String, Value)>,
}

impl DelayStep {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            output: None,
        }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(delay_ms))
    }

    /// Store `value` in `field` once the delay elapsed
    pub fn then_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output = Some((field.into(), value.into()));
        self
    }
}

#[async_trait]
impl Step for DelayStep {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        ctx.events.info(format!("Delaying for {}ms", self.delay.as_millis()));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                ctx.events.warn("Delay cancelled");
                return Err(StepError::Cancelled);
            }
            _ = sleep(self.delay) => {}
        }
        ctx.events.progress(100.0, Some(format!("Waited {}ms", self.delay.as_millis())));

        if let Some((field, value)) = &self.output {
            ctx.set(field.clone(), value.clone()).await?;
        }
        Ok(StepOutcome::Done)
    }
}
