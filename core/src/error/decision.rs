use thiserror::Error;

/// Failure of a single manager-decision parsing strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("{strategy}: agent call failed: {reason}")]
    AgentCall { strategy: String, reason: String },

    #[error("{strategy}: response is not valid JSON: {reason}")]
    InvalidJson { strategy: String, reason: String },

    #[error("{strategy}: response has no JSON object")]
    NoJsonObject { strategy: String },

    #[error("all decision strategies failed: {0}")]
    Exhausted(String),
}
