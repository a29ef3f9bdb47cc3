//! Task scheduling engine for multi-agent workflows.
//!
//! Tasks live in a shared [`task::TaskTable`]; a [`process::Scheduler`]
//! decides the order (sequential, branching/looping workflow, or a manager
//! agent delegating work) and the [`executor::ExecutionEngine`] runs each task
//! through its agent, completion check and guardrail.

pub mod agent;
pub mod api;
pub mod config;
pub mod definition;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod logging;
pub mod memory;
pub mod process;
pub mod registry;
pub mod task;
