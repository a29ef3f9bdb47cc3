//! Pluggable collaborators for `agentflow-core`: retry strategies, event
//! renderers, LLM-judged guardrails, a keyword knowledge base, a JSON-lines
//! memory store and a transcript-replaying agent.

pub mod agents;
pub mod executor;
pub mod factory;
pub mod guardrails;
pub mod knowledge;
pub mod memory;
