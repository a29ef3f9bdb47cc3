pub mod llm;

pub use llm::{LlmGuardrail, LlmGuardrailResolver};
