use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, TaskOutput, TaskStatus, TaskType};

/// Aggregate outcome of one `start`/`astart` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,

    /// Final status of every task in the table, including ones that never ran.
    pub task_status: BTreeMap<TaskId, TaskStatus>,

    /// Results of the tasks that produced one.
    pub task_results: BTreeMap<TaskId, TaskOutput>,
}

impl ExecutionResult {
    pub fn completed(&self) -> usize {
        self.task_status
            .values()
            .filter(|s| **s == TaskStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.task_status
            .values()
            .filter(|s| **s == TaskStatus::Failed)
            .count()
    }

    /// Raw text of the highest-id task that produced a result.
    pub fn final_raw(&self) -> Option<&str> {
        self.task_results.values().next_back().map(|o| o.raw.as_str())
    }
}

/// Queryable view of a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub expected_output: String,
    pub agent: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub next_tasks: Vec<String>,
    pub condition: BTreeMap<String, Vec<String>>,
    pub loop_parent: Option<TaskId>,
    pub result: Option<TaskOutput>,
}

impl From<&Task> for TaskDetails {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
            description: t.description.clone(),
            expected_output: t.expected_output.clone(),
            agent: t.agent.clone(),
            task_type: t.task_type,
            status: t.status,
            retry_count: t.retry_count,
            next_tasks: t.next_tasks.clone(),
            condition: t.condition.clone(),
            loop_parent: t.loop_parent,
            result: t.result.clone(),
        }
    }
}
