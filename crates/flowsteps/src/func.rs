use async_trait::async_trait;
use flowcore::{EventName, Step, StepContext, StepError, StepOutcome};
use std::future::Future;

/// Plain step backed by an async closure
pub struct FnStep<F> {
    name: String,
    func: F,
}

/// Wrap `func` as a plain step
pub fn step_fn<F, Fut>(name: impl Into<String>, func: F) -> FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    FnStep {
        name: name.into(),
        func,
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        (self.func)(ctx).await?;
        Ok(StepOutcome::Done)
    }
}

/// Router backed by an async closure returning the chosen outcome
pub struct FnRouter<F> {
    name: String,
    func: F,
}

/// Wrap `func` as a router
pub fn router_fn<F, Fut>(name: impl Into<String>, func: F) -> FnRouter<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EventName, StepError>> + Send + 'static,
{
    FnRouter {
        name: name.into(),
        func,
    }
}

#[async_trait]
impl<F, Fut> Step for FnRouter<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EventName, StepError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let event = (self.func)(ctx).await?;
        Ok(StepOutcome::Route(event))
    }
}
