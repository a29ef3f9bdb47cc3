//! Declarative workflow files (TOML or JSON) that build engine tasks.
//!
//! ```toml
//! process = "workflow"
//! max_iter = 20
//!
//! [[tasks]]
//! name = "triage"
//! description = "Decide whether the ticket is a bug"
//! task_type = "decision"
//! is_start = true
//! condition = { bug = ["fix"], other = ["exit"] }
//!
//! [[tasks]]
//! name = "fix"
//! description = "Propose a fix"
//! context = ["triage"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::executor::ExecutionEngineBuilder;
use crate::process::{ProcessKind, SchedulerLimits};
use crate::task::{
    ContextItem, OutputFormat, Task, TaskGuardrail, TaskRef, TaskType, CURRENT_TARGET, EXIT_TARGET,
};

/// A context entry: a bare string names an upstream task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextSpec {
    Task(String),
    Item(ContextItem),
}

impl From<ContextSpec> for ContextItem {
    fn from(spec: ContextSpec) -> Self {
        match spec {
            ContextSpec::Task(name) => ContextItem::Task(TaskRef::Name(name)),
            ContextSpec::Item(item) => item,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub agent: Option<String>,
    /// `task`/`plain`, `decision` or `loop`.
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub condition: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub next_tasks: Vec<String>,
    #[serde(default)]
    pub context: Vec<ContextSpec>,
    #[serde(default)]
    pub retain_full_context: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub rerun: bool,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub async_execution: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub create_directory: bool,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub store_in_memory: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Natural-language acceptance criteria, resolved by the engine's guardrail resolver.
    #[serde(default)]
    pub guardrail: Option<String>,
}

impl TaskDefinition {
    fn task_type(&self) -> Result<TaskType, ExecutorError> {
        match &self.task_type {
            None => Ok(TaskType::Plain),
            Some(raw) => raw.parse().map_err(|e: String| {
                ExecutorError::Definition(format!("task '{}': {e}", self.name))
            }),
        }
    }

    /// Relative loop sources resolve against `base`.
    pub fn to_task(&self, base: Option<&Path>) -> Result<Task, ExecutorError> {
        let mut builder = Task::builder(self.description.clone())
            .name(self.name.clone())
            .expected_output(self.expected_output.clone())
            .task_type(self.task_type()?)
            .next_tasks(self.next_tasks.iter().cloned())
            .retain_full_context(self.retain_full_context)
            .is_start(self.is_start)
            .rerun(self.rerun)
            .async_execution(self.async_execution)
            .output_format(self.output_format.clone())
            .create_directory(self.create_directory)
            .store_in_memory(self.store_in_memory);
        if let Some(agent) = &self.agent {
            builder = builder.agent(agent.clone());
        }
        for (decision, targets) in &self.condition {
            builder = builder.condition(decision.clone(), targets.iter().cloned());
        }
        for spec in &self.context {
            builder = builder.context(spec.clone().into());
        }
        if let Some(max) = self.max_retries {
            builder = builder.max_retries(max);
        }
        if let Some(path) = &self.input_file {
            builder = builder.input_file(resolve(base, path));
        }
        if let Some(path) = &self.output_file {
            builder = builder.output_file(resolve(base, path));
        }
        for image in &self.images {
            builder = builder.image(image.clone());
        }
        for tool in &self.tools {
            builder = builder.tool(tool.clone());
        }
        if let Some(user) = &self.user_id {
            builder = builder.user_id(user.clone());
        }
        if let Some(criteria) = self.guardrail.as_ref().filter(|g| !g.trim().is_empty()) {
            builder = builder.guardrail(TaskGuardrail::Description(criteria.clone()));
        }
        Ok(builder.build())
    }
}

fn resolve(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub process: ProcessKind,
    #[serde(default)]
    pub max_iter: Option<usize>,
    #[serde(default)]
    pub max_manager_rounds: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl WorkflowDefinition {
    pub fn from_toml_str(s: &str) -> Result<Self, ExecutorError> {
        let def: Self = toml::from_str(s).map_err(|e| ExecutorError::Definition(e.to_string()))?;
        def.validate()?;
        Ok(def)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ExecutorError> {
        let def: Self =
            serde_json::from_str(s).map_err(|e| ExecutorError::Definition(e.to_string()))?;
        def.validate()?;
        Ok(def)
    }

    /// Load a `.json` file as JSON and anything else as TOML.
    ///
    /// Relative file paths inside the definition resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, ExecutorError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExecutorError::Definition(format!("{}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut def = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_toml_str(&text)?
        };
        def.base_dir = path.parent().map(Path::to_path_buf);
        Ok(def)
    }

    /// Reject duplicate names and empty descriptions. Unknown routing
    /// targets are only warned about, since loop children appear at run time.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        let mut names = HashSet::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if task.description.trim().is_empty() {
                return Err(ExecutorError::Definition(format!(
                    "task #{i} has an empty description"
                )));
            }
            if !task.name.is_empty() && !names.insert(task.name.as_str()) {
                return Err(ExecutorError::DuplicateTaskName(task.name.clone()));
            }
            task.task_type()?;
        }

        for task in &self.tasks {
            let targets = task
                .next_tasks
                .iter()
                .chain(task.condition.values().flatten());
            for target in targets {
                let t = target.trim();
                if t.is_empty() || t == EXIT_TARGET || t == CURRENT_TARGET {
                    continue;
                }
                if !names.contains(t) {
                    tracing::warn!(
                        target: "agentflow.workflow",
                        task = %task.name,
                        next = %t,
                        "routing target not defined in workflow"
                    );
                }
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> SchedulerLimits {
        let defaults = SchedulerLimits::default();
        SchedulerLimits {
            max_iter: self.max_iter.unwrap_or(defaults.max_iter),
            max_manager_rounds: self
                .max_manager_rounds
                .unwrap_or(defaults.max_manager_rounds),
        }
    }

    pub fn to_tasks(&self) -> Result<Vec<Task>, ExecutorError> {
        self.tasks
            .iter()
            .map(|t| t.to_task(self.base_dir.as_deref()))
            .collect()
    }

    /// Apply process, limits and tasks to `builder`; agents stay the caller's job.
    pub fn configure(&self, builder: ExecutionEngineBuilder) -> Result<ExecutionEngineBuilder, ExecutorError> {
        let limits = self.limits();
        let mut builder = builder
            .process(self.process)
            .max_iter(limits.max_iter)
            .max_manager_rounds(limits.max_manager_rounds)
            .tasks(self.to_tasks()?);
        if let Some(max) = self.max_retries {
            builder = builder.max_retries(max);
        }
        if let Some(user) = &self.user_id {
            builder = builder.user_id(user.clone());
        }
        Ok(builder)
    }
}
