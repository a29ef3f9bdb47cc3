use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::callback::TaskCallback;
use super::completion::CompletionChecker;
use super::guardrail::{apply_payload, GuardrailStep, GuardrailVerdict, TaskGuardrail};
use super::output::{parse_decision, parse_structured, OutputFormat, StructuredOutput, TaskOutput};
use super::types::{ContextItem, TaskId, TaskStatus, TaskType};
use crate::error::ExecutorError;

/// Lowest retry ceiling a task may carry.
pub const MIN_MAX_RETRIES: u32 = 3;

/// Snapshot of a task handed to callbacks and agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_id: TaskId,
    pub name: String,
    pub agent_name: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub description: String,
    pub expected_output: String,
    pub retry_count: u32,
    pub async_execution: bool,
}

/// A unit of work bound to an agent.
///
/// `id` and an empty `name` are filled in when the task enters a
/// [`TaskTable`](super::TaskTable).
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub expected_output: String,
    pub agent: Option<String>,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Decision value to successor names.
    pub condition: BTreeMap<String, Vec<String>>,
    pub next_tasks: Vec<String>,
    pub context: Vec<ContextItem>,
    pub retain_full_context: bool,
    pub result: Option<TaskOutput>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub is_start: bool,
    pub rerun: bool,
    pub input_file: Option<PathBuf>,
    pub async_execution: bool,
    pub output_format: OutputFormat,
    pub output_file: Option<PathBuf>,
    pub create_directory: bool,
    pub images: Vec<String>,
    pub tools: Vec<String>,
    pub store_in_memory: bool,
    pub user_id: Option<String>,
    pub guardrail: Option<TaskGuardrail>,
    pub callback: Option<TaskCallback>,
    pub completion_checker: Option<Arc<dyn CompletionChecker>>,
    /// Loop task that generated this subtask.
    pub loop_parent: Option<TaskId>,
    pub(crate) workflow_context: Option<String>,
    pub(crate) completed_seq: Option<u64>,
}

impl Task {
    pub fn builder(description: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(description)
    }

    pub fn metadata(&self) -> TaskMetadata {
        TaskMetadata {
            task_id: self.id,
            name: self.name.clone(),
            agent_name: self.agent.clone(),
            task_type: self.task_type,
            status: self.status,
            description: self.description.clone(),
            expected_output: self.expected_output.clone(),
            retry_count: self.retry_count,
            async_execution: self.async_execution,
        }
    }

    pub fn is_subtask(&self) -> bool {
        self.loop_parent.is_some()
    }

    pub fn has_routing(&self) -> bool {
        !self.next_tasks.is_empty() || !self.condition.is_empty()
    }

    /// Whether the workflow scheduler resets this task to `NotStarted` once it completes.
    ///
    /// Loop and decision tasks and loop subtasks keep their completed state;
    /// they are only reopened by an explicit route.
    pub fn resets_after_completion(&self) -> bool {
        self.rerun && self.task_type == TaskType::Plain && !self.is_subtask()
    }

    /// Description plus any context the workflow attached for this run.
    pub fn effective_description(&self) -> String {
        match self.workflow_context.as_deref() {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{}\n\n{}", self.description, extra)
            }
            _ => self.description.clone(),
        }
    }

    pub fn workflow_context(&self) -> Option<&str> {
        self.workflow_context.as_deref()
    }

    pub fn set_workflow_context(&mut self, context: Option<String>) {
        self.workflow_context = context;
    }

    /// Monotonic stamp of the latest completion, used to find the freshest predecessor.
    pub fn completed_seq(&self) -> Option<u64> {
        self.completed_seq
    }

    pub(crate) fn mark_completed(&mut self, seq: u64) {
        self.status = TaskStatus::Completed;
        self.completed_seq = Some(seq);
    }

    /// Interpret raw agent output according to the task's output format.
    pub fn parse_output(&self, raw: &str) -> StructuredOutput {
        if self.task_type == TaskType::Decision && self.output_format == OutputFormat::Raw {
            return parse_decision(raw, self.condition.keys());
        }
        parse_structured(raw, &self.output_format)
    }

    /// Build the output record for `raw`, filling in structured fields.
    pub fn build_output(&self, raw: &str, agent: &str) -> (TaskOutput, Option<String>) {
        let parsed = self.parse_output(raw);
        let mut output = TaskOutput::new(&self.description, raw, agent);
        output.json_dict = parsed.json_dict;
        output.model = parsed.model;
        if self.task_type == TaskType::Decision && self.output_format == OutputFormat::Raw {
            output.output_format = OutputFormat::Json.as_str().to_string();
        } else {
            output.output_format = self.output_format.as_str().to_string();
        }
        (output, parsed.warning)
    }

    /// Routing decision carried by the current result.
    ///
    /// Prefers a structured `decision` field, else the lowercased raw text.
    pub fn decision(&self) -> Option<String> {
        let result = self.result.as_ref()?;
        Some(match result.decision_field() {
            Some(d) => d.trim().to_string(),
            None => result.raw.trim().to_lowercase(),
        })
    }

    /// Record a guardrail verdict against this task.
    ///
    /// A rejection bumps `retry_count` and parks the task as `Failed`; once
    /// the count reaches `max_retries` the rejection becomes a terminal error.
    pub fn apply_guardrail_verdict(
        &mut self,
        output: TaskOutput,
        verdict: GuardrailVerdict,
    ) -> Result<GuardrailStep, ExecutorError> {
        match verdict {
            GuardrailVerdict::Accept => Ok(GuardrailStep::Accepted(output)),
            GuardrailVerdict::AcceptWith(payload) => {
                Ok(GuardrailStep::Accepted(apply_payload(output, payload)))
            }
            GuardrailVerdict::Reject(reason) => {
                self.retry_count += 1;
                self.status = TaskStatus::Failed;
                if self.retry_count >= self.max_retries {
                    return Err(ExecutorError::GuardrailExhausted {
                        task: self.name.clone(),
                        attempts: self.retry_count,
                        reason,
                    });
                }
                Ok(GuardrailStep::Rejected {
                    reason,
                    retry_count: self.retry_count,
                })
            }
        }
    }

    /// Clear run state so the task can execute again.
    pub fn reset(&mut self) {
        self.status = TaskStatus::NotStarted;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("status", &self.status)
            .field("task_type", &self.task_type)
            .field("next_tasks", &self.next_tasks)
            .field("condition", &self.condition)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("async_execution", &self.async_execution)
            .field("guardrail", &self.guardrail)
            .field("has_callback", &self.callback.is_some())
            .field("loop_parent", &self.loop_parent)
            .finish()
    }
}

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            task: Task {
                id: 0,
                name: String::new(),
                description: description.into(),
                expected_output: String::new(),
                agent: None,
                status: TaskStatus::NotStarted,
                task_type: TaskType::Plain,
                condition: BTreeMap::new(),
                next_tasks: Vec::new(),
                context: Vec::new(),
                retain_full_context: false,
                result: None,
                retry_count: 0,
                max_retries: MIN_MAX_RETRIES,
                is_start: false,
                rerun: false,
                input_file: None,
                async_execution: false,
                output_format: OutputFormat::Raw,
                output_file: None,
                create_directory: false,
                images: Vec::new(),
                tools: Vec::new(),
                store_in_memory: false,
                user_id: None,
                guardrail: None,
                callback: None,
                completion_checker: None,
                loop_parent: None,
                workflow_context: None,
                completed_seq: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.task.name = name.into();
        self
    }

    pub fn expected_output(mut self, expected: impl Into<String>) -> Self {
        self.task.expected_output = expected.into();
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.task.agent = Some(agent.into());
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn condition<I, S>(mut self, decision: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.condition.insert(
            decision.into(),
            targets.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn next_task(mut self, name: impl Into<String>) -> Self {
        self.task.next_tasks.push(name.into());
        self
    }

    pub fn next_tasks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.next_tasks = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn context(mut self, item: ContextItem) -> Self {
        self.task.context.push(item);
        self
    }

    pub fn retain_full_context(mut self, retain: bool) -> Self {
        self.task.retain_full_context = retain;
        self
    }

    /// Retry ceiling, floored at [`MIN_MAX_RETRIES`].
    pub fn max_retries(mut self, max: u32) -> Self {
        self.task.max_retries = max.max(MIN_MAX_RETRIES);
        self
    }

    pub fn is_start(mut self, start: bool) -> Self {
        self.task.is_start = start;
        self
    }

    pub fn rerun(mut self, rerun: bool) -> Self {
        self.task.rerun = rerun;
        self
    }

    pub fn input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.task.input_file = Some(path.into());
        self
    }

    pub fn async_execution(mut self, flag: bool) -> Self {
        self.task.async_execution = flag;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.task.output_format = format;
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.task.output_file = Some(path.into());
        self
    }

    pub fn create_directory(mut self, create: bool) -> Self {
        self.task.create_directory = create;
        self
    }

    pub fn image(mut self, url_or_path: impl Into<String>) -> Self {
        self.task.images.push(url_or_path.into());
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.task.tools.push(tool.into());
        self
    }

    pub fn store_in_memory(mut self, store: bool) -> Self {
        self.task.store_in_memory = store;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.task.user_id = Some(user_id.into());
        self
    }

    pub fn guardrail(mut self, guardrail: TaskGuardrail) -> Self {
        self.task.guardrail = Some(guardrail);
        self
    }

    pub fn callback(mut self, callback: TaskCallback) -> Self {
        self.task.callback = Some(callback);
        self
    }

    pub fn completion_checker(mut self, checker: Arc<dyn CompletionChecker>) -> Self {
        self.task.completion_checker = Some(checker);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::guardrail::GuardrailPayload;

    fn draft() -> Task {
        let mut t = Task::builder("Draft a post").name("draft").build();
        t.id = 1;
        t
    }

    #[test]
    fn builder_floors_max_retries() {
        let t = Task::builder("x").max_retries(1).build();
        assert_eq!(t.max_retries, MIN_MAX_RETRIES);
        let t = Task::builder("x").max_retries(7).build();
        assert_eq!(t.max_retries, 7);
    }

    #[test]
    fn rejection_parks_task_until_ceiling() {
        let mut t = draft();
        let out = TaskOutput::new("d", "short", "writer");

        let step = t
            .apply_guardrail_verdict(out.clone(), GuardrailVerdict::reject("too short"))
            .unwrap();
        assert_eq!(
            step,
            GuardrailStep::Rejected {
                reason: "too short".into(),
                retry_count: 1
            }
        );
        assert_eq!(t.status, TaskStatus::Failed);

        t.apply_guardrail_verdict(out.clone(), GuardrailVerdict::reject("too short"))
            .unwrap();
        let err = t
            .apply_guardrail_verdict(out, GuardrailVerdict::reject("too short"))
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::GuardrailExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn accept_with_text_replaces_output() {
        let mut t = draft();
        let step = t
            .apply_guardrail_verdict(
                TaskOutput::new("d", "raw", "writer"),
                GuardrailVerdict::AcceptWith(GuardrailPayload::Text("polished".into())),
            )
            .unwrap();
        match step {
            GuardrailStep::Accepted(out) => assert_eq!(out.raw, "polished"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn decision_prefers_structured_field() {
        let mut t = Task::builder("route")
            .task_type(TaskType::Decision)
            .condition("approve", ["publish"])
            .condition("reject", ["draft"])
            .build();
        let (out, warning) = t.build_output(r#"{"response": "ok", "decision": "approve"}"#, "judge");
        assert!(warning.is_none());
        t.result = Some(out);
        assert_eq!(t.decision().as_deref(), Some("approve"));

        t.result = Some(TaskOutput::new("route", "  REJECT \n", "judge"));
        assert_eq!(t.decision().as_deref(), Some("reject"));
    }

    #[test]
    fn workflow_context_is_appended_not_merged() {
        let mut t = draft();
        t.set_workflow_context(Some("Input data from previous tasks:\nx".into()));
        assert_eq!(t.description, "Draft a post");
        assert!(t.effective_description().ends_with("previous tasks:\nx"));
    }

    #[test]
    fn only_flagged_plain_tasks_reset() {
        let t = draft();
        assert!(!t.resets_after_completion());
        let t = Task::builder("x").rerun(true).build();
        assert!(t.resets_after_completion());
        let t = Task::builder("x")
            .rerun(true)
            .task_type(TaskType::Decision)
            .build();
        assert!(!t.resets_after_completion());
        let mut t = Task::builder("x").rerun(true).build();
        t.loop_parent = Some(0);
        assert!(!t.resets_after_completion());
    }
}
