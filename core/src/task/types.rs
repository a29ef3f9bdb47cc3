use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric task identifier, assigned in insertion order by the task table.
pub type TaskId = usize;

/// Routing target that terminates a workflow.
pub const EXIT_TARGET: &str = "exit";

/// Placeholder in a loop subtask's condition map that resolves to the subtask itself.
pub const CURRENT_TARGET: &str = "current";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Plain,
    Decision,
    Loop,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "task",
            Self::Decision => "decision",
            Self::Loop => "loop",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" | "plain" | "" => Ok(Self::Plain),
            "decision" => Ok(Self::Decision),
            "loop" => Ok(Self::Loop),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Reference to another task, by name or by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Id(TaskId),
    Name(String),
}

impl From<&str> for TaskRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<TaskId> for TaskRef {
    fn from(id: TaskId) -> Self {
        Self::Id(id)
    }
}

/// A knowledge-base lookup resolved at prompt-assembly time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One input fragment attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextItem {
    Text(String),
    List(Vec<String>),
    Task(TaskRef),
    Knowledge(KnowledgeQuery),
}

impl ContextItem {
    pub fn task(reference: impl Into<TaskRef>) -> Self {
        Self::Task(reference.into())
    }

    pub fn knowledge(query: impl Into<String>) -> Self {
        Self::Knowledge(KnowledgeQuery {
            query: query.into(),
            user_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_parses_aliases() {
        assert_eq!("task".parse::<TaskType>().unwrap(), TaskType::Plain);
        assert_eq!("Decision".parse::<TaskType>().unwrap(), TaskType::Decision);
        assert!("branch".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_ref_deserializes_untagged() {
        let by_id: TaskRef = serde_json::from_str("3").unwrap();
        let by_name: TaskRef = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(by_id, TaskRef::Id(3));
        assert_eq!(by_name, TaskRef::Name("review".into()));
    }
}
