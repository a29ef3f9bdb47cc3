//! Schedulers decide which task runs next.
//!
//! A scheduler never executes anything itself. It is a resumable state
//! machine pulled one [`Step`] at a time by the engine's blocking or async
//! driver; both drivers share the same routing code.

mod decision;
mod hierarchical;
mod sequential;
mod workflow;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use decision::{
    DecisionParser, DecisionStrategy, ManagerAction, ManagerInstructions, ManagerQuery,
    SchemaPromptedJsonParse, TaskSummary, TypedParse,
};
pub use hierarchical::HierarchicalScheduler;
pub use sequential::SequentialScheduler;
pub use workflow::WorkflowScheduler;

use crate::error::ExecutorError;
use crate::task::{LoopRow, TaskId, TaskTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    #[default]
    Sequential,
    Workflow,
    Hierarchical,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Workflow => "workflow",
            Self::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "workflow" => Ok(Self::Workflow),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(ExecutorError::Config(format!("unknown process kind: {other}"))),
        }
    }
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Run the task, then pull again.
    Execute(TaskId),
    /// Read a loop task's input file and hand the rows back via [`Scheduler::accept_rows`].
    LoadRows { task: TaskId, path: PathBuf },
    /// Ask the manager agent and hand the answer back via [`Scheduler::accept_decision`].
    Consult(ManagerQuery),
    Finished,
}

/// A routing decision taken by a scheduler, reported to event handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub from: TaskId,
    /// `None` when the route ended the sequence.
    pub to: Option<TaskId>,
    pub reason: String,
}

pub trait Scheduler: Send {
    fn kind(&self) -> ProcessKind;

    fn next_step(&mut self) -> Result<Step, ExecutorError>;

    fn accept_rows(
        &mut self,
        _task: TaskId,
        _rows: Result<Vec<LoopRow>, ExecutorError>,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn accept_decision(&mut self, _decision: ManagerInstructions) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Called by the driver right before `id` runs, once everything it waits on has finished.
    fn prepare(&mut self, _id: TaskId) {}

    fn drain_routes(&mut self) -> Vec<RouteRecord> {
        Vec::new()
    }

    /// Whether the step after `id` depends on how `id` turned out.
    ///
    /// The async driver only defers a task into a concurrent batch when this
    /// is false.
    fn routing_depends_on_outcome(&self, _id: TaskId) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    pub max_iter: usize,
    pub max_manager_rounds: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_iter: 10,
            max_manager_rounds: 50,
        }
    }
}

pub fn build_scheduler(
    kind: ProcessKind,
    table: TaskTable,
    limits: SchedulerLimits,
    agents: Vec<String>,
    manager_agent: Option<String>,
) -> Result<Box<dyn Scheduler>, ExecutorError> {
    Ok(match kind {
        ProcessKind::Sequential => Box::new(SequentialScheduler::new(table)),
        ProcessKind::Workflow => Box::new(WorkflowScheduler::new(table, limits.max_iter)),
        ProcessKind::Hierarchical => {
            let manager = manager_agent.ok_or(ExecutorError::ManagerAgentMissing)?;
            Box::new(HierarchicalScheduler::new(
                table,
                agents,
                manager,
                limits.max_manager_rounds,
            )?)
        }
    })
}
