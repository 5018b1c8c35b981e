//! Bundled demo flows

use flowcore::{
    ConfigurationError, RunState, StepContext, StepDefinition, StepError, Trigger, TriggerSource,
    Value,
};
use flowruntime::{Flow, StepRegistry};
use flowsteps::{step_fn, DelayStep, LogStateStep, ThresholdRouter};

pub const LEAD_QUALIFICATION: &str = "lead-qualification";

pub fn names() -> Vec<&'static str> {
    vec![LEAD_QUALIFICATION]
}

pub fn build(name: &str) -> Option<Result<Flow, ConfigurationError>> {
    match name {
        LEAD_QUALIFICATION => Some(lead_qualification()),
        _ => None,
    }
}

/// Score a lead, then either draft an outreach email or archive it, and
/// summarize whichever branch ran. The score comes from the inputs.
fn lead_qualification() -> Result<Flow, ConfigurationError> {
    let router = ThresholdRouter::new("lead_score", 70.0, "qualified", "unqualified");
    let outcomes = router.outcomes();

    StepRegistry::new(LEAD_QUALIFICATION)
        .with_description("Routes leads on their score and follows up on qualified ones")
        .with_state_template(
            RunState::new()
                .with_field("lead_score", 0)
                .with_field("email_draft", Value::Null)
                .with_field("archived", false)
                .with_field("summary", Value::Null),
        )
        .step(
            StepDefinition::start("score_lead", router)
                .router(outcomes)
                .with_description("Route on lead_score >= 70"),
        )?
        .step(
            StepDefinition::listen(
                "draft_email",
                Trigger::on_event("qualified"),
                DelayStep::from_millis(250)
                    .then_set("email_draft", "Hi! Thanks for your interest, let's talk."),
            )
            .with_description("Draft an outreach email"),
        )?
        .step(
            StepDefinition::listen(
                "archive_lead",
                Trigger::on_event("unqualified"),
                step_fn("archive", |ctx: StepContext| async move {
                    ctx.events.info("Lead archived");
                    ctx.set("archived", true).await
                }),
            )
            .with_description("Archive the lead"),
        )?
        .step(
            StepDefinition::listen(
                "summarize",
                Trigger::any([
                    TriggerSource::Step("draft_email".into()),
                    TriggerSource::Step("archive_lead".into()),
                ]),
                step_fn("summarize", |ctx: StepContext| async move {
                    let score = ctx.require_f64("lead_score").await?;
                    let archived = ctx
                        .get_or("archived", Value::Bool(false))
                        .await
                        .as_bool()
                        .unwrap_or(false);
                    let summary = if archived {
                        format!("Lead scored {} and was archived", score)
                    } else {
                        format!("Lead scored {} and an email was drafted", score)
                    };
                    ctx.set("summary", summary).await?;
                    Ok::<(), StepError>(())
                }),
            )
            .with_description("Summarize the outcome"),
        )?
        .step(
            StepDefinition::listen(
                "log_state",
                Trigger::after("summarize"),
                LogStateStep::fields(["lead_score", "email_draft", "archived", "summary"]),
            )
            .with_description("Log the final state"),
        )?
        .seal()
}
