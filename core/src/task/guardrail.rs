use std::sync::Arc;

use async_trait::async_trait;

use super::output::TaskOutput;
use crate::agent::Agent;

/// Replacement produced by a passing guardrail.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailPayload {
    Text(String),
    Output(TaskOutput),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    Accept,
    AcceptWith(GuardrailPayload),
    Reject(String),
}

impl GuardrailVerdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Reject(_))
    }
}

/// Post-execution validator of a task output.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn validate(&self, output: &TaskOutput) -> GuardrailVerdict;

    async fn avalidate(&self, output: &TaskOutput) -> GuardrailVerdict {
        self.validate(output)
    }
}

/// Closure-backed guardrail.
pub struct FnGuardrail<F>(pub F);

#[async_trait]
impl<F> Guardrail for FnGuardrail<F>
where
    F: Fn(&TaskOutput) -> GuardrailVerdict + Send + Sync,
{
    fn validate(&self, output: &TaskOutput) -> GuardrailVerdict {
        (self.0)(output)
    }
}

/// Guardrail attached to a task.
#[derive(Clone)]
pub enum TaskGuardrail {
    Validator(Arc<dyn Guardrail>),
    /// Natural-language criteria, turned into a validator by a [`GuardrailResolver`].
    Description(String),
}

impl TaskGuardrail {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskOutput) -> GuardrailVerdict + Send + Sync + 'static,
    {
        Self::Validator(Arc::new(FnGuardrail(f)))
    }
}

impl std::fmt::Debug for TaskGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validator(_) => f.write_str("TaskGuardrail::Validator"),
            Self::Description(d) => write!(f, "TaskGuardrail::Description({d:?})"),
        }
    }
}

/// Translates natural-language guardrail descriptions into validators.
pub trait GuardrailResolver: Send + Sync {
    fn resolve(&self, description: &str, agent: Option<Arc<dyn Agent>>) -> Arc<dyn Guardrail>;
}

/// Outcome of applying a verdict to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailStep {
    Accepted(TaskOutput),
    Rejected { reason: String, retry_count: u32 },
}

/// Apply a passing verdict's replacement to `output`.
pub fn apply_payload(mut output: TaskOutput, payload: GuardrailPayload) -> TaskOutput {
    match payload {
        GuardrailPayload::Text(text) => {
            output.raw = text;
            output
        }
        GuardrailPayload::Output(replacement) => replacement,
    }
}
