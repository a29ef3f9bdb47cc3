use thiserror::Error;

use super::decision::DecisionParseError;
use crate::task::TaskId;

/// Executor-specific errors for task table construction and execution
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Duplicate task name: {0}")]
    DuplicateTaskName(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task '{task}' failed guardrail validation after {attempts} retries. Last error: {reason}")]
    GuardrailExhausted {
        task: String,
        attempts: u32,
        reason: String,
    },

    #[error("Manager decision failed: {0}")]
    ManagerDecision(#[from] DecisionParseError),

    #[error("Manager selected unknown task id {0}")]
    InvalidManagerChoice(TaskId),

    #[error("Manager asked to execute without naming a task")]
    ManagerChoiceMissing,

    #[error("Hierarchical process requires a manager agent")]
    ManagerAgentMissing,

    #[error("Loop source '{path}' could not be read: {reason}")]
    LoopSource { path: String, reason: String },

    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Worker join failed: {0}")]
    Join(String),
}

impl ExecutorError {
    /// Whether the error ends the whole run rather than a single task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GuardrailExhausted { .. }
                | Self::ManagerDecision(_)
                | Self::InvalidManagerChoice(_)
                | Self::ManagerChoiceMissing
                | Self::ManagerAgentMissing
                | Self::Join(_)
        )
    }
}
