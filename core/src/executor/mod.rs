//! Execution engine for sequential, workflow and hierarchical runs
//!
//! The engine owns the task table and the agents. A [`crate::process::Scheduler`]
//! decides what runs next; the engine does the I/O.
//!
//! # Architecture
//!
//! ```text
//! ExecutionEngineBuilder::build()
//!   ↓
//! ExecutionEngine { TaskTable, agents, hooks, events }
//!   ↓
//! start() / astart()
//!   ↓
//! Scheduler::next_step() → Execute | LoadRows | Consult | Finished
//!   ↓
//! run_task() / arun_task() → prompt → agent → completion check → guardrail
//!   ↓
//! ExecutionResult
//! ```
//!
//! `astart` runs async tasks concurrently as long as nothing scheduled after
//! them needs their output; a sync task is a barrier.

mod driver;
mod engine;
mod prompt;
mod task_run;
pub mod traits;
pub mod types;

pub use engine::{ExecutionEngine, ExecutionEngineBuilder};
pub use prompt::{aimage_inputs, build_content, build_prompt, image_inputs, response_format};
pub use traits::{FixedDelay, RetryStrategy};
pub use types::{ExecutionResult, TaskDetails};
