use async_trait::async_trait;
use flowcore::{Step, StepContext, StepError, StepOutcome};

/// Logs state fields for debugging
pub struct LogStateStep {
    fields: Vec<String>,
}

impl LogStateStep {
    /// Log every field of the state
    pub fn all() -> Self {
        Self { fields: Vec::new() }
    }

    /// Log only the named fields
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Step for LogStateStep {
    fn name(&self) -> &str {
        "log.state"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let state = ctx.state.read().await;

        let mut lines: Vec<String> = if self.fields.is_empty() {
            state
                .fields()
                .map(|(name, value)| format!("{}: {}", name, value.to_json()))
                .collect()
        } else {
            self.fields
                .iter()
                .map(|name| match state.get(name) {
                    Some(value) => format!("{}: {}", name, value.to_json()),
                    None => format!("{}: (unset)", name),
                })
                .collect()
        };
        lines.sort();

        for line in lines {
            tracing::info!(step = %ctx.step_id, "STATE {}", line);
            ctx.events.info(line);
        }

        Ok(StepOutcome::Done)
    }
}
