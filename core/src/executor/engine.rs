use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::agent::Agent;
use crate::config::{AppConfig, EngineConfig, RetryConfig};
use crate::error::ExecutorError;
use crate::hooks::{EngineEvent, EventKind, EventRegistry, TaskHooks};
use crate::memory::{Knowledge, Memory};
use crate::process::{
    build_scheduler, DecisionParser, ProcessKind, RouteRecord, Scheduler, SchedulerLimits,
};
use crate::task::{
    CompletionChecker, ContextItem, GuardrailResolver, Task, TaskId, TaskOutput, TaskRef,
    TaskStatus, TaskTable,
};

use super::traits::RetryStrategy;
use super::types::{ExecutionResult, TaskDetails};

/// Owns the task table and agents, and drives schedulers over them.
///
/// Cloning is cheap; clones share the same table and collaborators.
#[derive(Clone)]
pub struct ExecutionEngine {
    pub(super) inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) run_id: String,
    pub(super) config: EngineConfig,
    pub(super) retry: RetryConfig,
    pub(super) table: TaskTable,
    pub(super) agents: Vec<Arc<dyn Agent>>,
    pub(super) manager_agent: Option<Arc<dyn Agent>>,
    pub(super) completion_checker: Option<Arc<dyn CompletionChecker>>,
    pub(super) retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub(super) memory: Option<Arc<dyn Memory>>,
    pub(super) knowledge: Option<Arc<dyn Knowledge>>,
    pub(super) guardrail_resolver: Option<Arc<dyn GuardrailResolver>>,
    pub(super) hooks: Option<Arc<dyn TaskHooks>>,
    pub(super) events: EventRegistry,
    pub(super) decision_parser: DecisionParser,
}

pub struct ExecutionEngineBuilder {
    config: EngineConfig,
    retry: RetryConfig,
    tasks: Vec<Task>,
    agents: Vec<Arc<dyn Agent>>,
    manager_agent: Option<Arc<dyn Agent>>,
    completion_checker: Option<Arc<dyn CompletionChecker>>,
    retry_strategy: Option<Arc<dyn RetryStrategy>>,
    memory: Option<Arc<dyn Memory>>,
    knowledge: Option<Arc<dyn Knowledge>>,
    guardrail_resolver: Option<Arc<dyn GuardrailResolver>>,
    hooks: Option<Arc<dyn TaskHooks>>,
    events: EventRegistry,
    decision_parser: DecisionParser,
}

impl ExecutionEngine {
    pub fn builder() -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new()
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn process(&self) -> ProcessKind {
        self.inner.config.process
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn table(&self) -> &TaskTable {
        &self.inner.table
    }

    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.inner.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.inner.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Agent bound to `task`, falling back to the first registered agent.
    pub(super) fn agent_for(&self, task: &Task) -> Result<Arc<dyn Agent>, ExecutorError> {
        match &task.agent {
            Some(name) => self
                .agent(name)
                .or_else(|| {
                    self.inner
                        .manager_agent
                        .clone()
                        .filter(|m| m.name() == name)
                })
                .ok_or_else(|| ExecutorError::AgentNotFound(name.clone())),
            None => self
                .inner
                .agents
                .first()
                .cloned()
                .ok_or_else(|| ExecutorError::AgentNotFound(format!("<none for task {}>", task.name))),
        }
    }

    pub fn add_task(&self, task: Task) -> Result<TaskId, ExecutorError> {
        if let Some(name) = &task.agent {
            if self.agent(name).is_none() {
                return Err(ExecutorError::AgentNotFound(name.clone()));
            }
        }
        self.inner.table.insert(task)
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.table.status(id)
    }

    pub fn task_result(&self, id: TaskId) -> Option<TaskOutput> {
        self.inner.table.with_task(id, |t| t.result.clone()).flatten()
    }

    pub fn all_task_status(&self) -> BTreeMap<TaskId, TaskStatus> {
        self.inner
            .table
            .ids()
            .into_iter()
            .filter_map(|id| self.task_status(id).map(|s| (id, s)))
            .collect()
    }

    pub fn task_details(&self, id: TaskId) -> Option<TaskDetails> {
        self.inner.table.with_task(id, |t| TaskDetails::from(t))
    }

    pub fn tasks(&self) -> Vec<TaskDetails> {
        self.inner
            .table
            .snapshot_all()
            .iter()
            .map(TaskDetails::from)
            .collect()
    }

    pub fn result(&self) -> ExecutionResult {
        let mut task_results = BTreeMap::new();
        for id in self.inner.table.ids() {
            if let Some(out) = self.task_result(id) {
                task_results.insert(id, out);
            }
        }
        ExecutionResult {
            run_id: self.inner.run_id.clone(),
            task_status: self.all_task_status(),
            task_results,
        }
    }

    pub(super) fn scheduler(&self) -> Result<Box<dyn Scheduler>, ExecutorError> {
        let cfg = &self.inner.config;
        build_scheduler(
            cfg.process,
            self.inner.table.clone(),
            SchedulerLimits {
                max_iter: cfg.max_iter,
                max_manager_rounds: cfg.max_manager_rounds,
            },
            self.agent_names(),
            self.inner
                .manager_agent
                .as_ref()
                .map(|a| a.name().to_string()),
        )
    }

    pub(super) fn event(&self, kind: EventKind, message: impl Into<String>) -> EngineEvent {
        EngineEvent::new(kind, &self.inner.run_id, message)
    }

    pub(super) fn route_events(&self, routes: Vec<RouteRecord>) -> Vec<EngineEvent> {
        routes
            .into_iter()
            .map(|r| {
                let target = r.to.and_then(|id| self.inner.table.name_of(id));
                let name = self.inner.table.name_of(r.from).unwrap_or_default();
                self.event(EventKind::Routing, r.reason)
                    .with_task(r.from, name)
                    .with_payload(serde_json::json!({ "to": r.to, "to_name": target }))
            })
            .collect()
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("run_id", &self.inner.run_id)
            .field("process", &self.inner.config.process)
            .field("tasks", &self.inner.table.len())
            .field("agents", &self.agent_names())
            .finish()
    }
}

impl Default for ExecutionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            retry: RetryConfig::default(),
            tasks: Vec::new(),
            agents: Vec::new(),
            manager_agent: None,
            completion_checker: None,
            retry_strategy: None,
            memory: None,
            knowledge: None,
            guardrail_resolver: None,
            hooks: None,
            events: EventRegistry::new(),
            decision_parser: DecisionParser::default(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new()
            .engine_config(cfg.engine.clone())
            .retry_config(cfg.retry.clone())
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn process(mut self, process: ProcessKind) -> Self {
        self.config.process = process;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn max_manager_rounds(mut self, rounds: usize) -> Self {
        self.config.max_manager_rounds = rounds;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.config.user_id = Some(user_id.into());
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn manager_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.manager_agent = Some(agent);
        self
    }

    pub fn completion_checker(mut self, checker: Arc<dyn CompletionChecker>) -> Self {
        self.completion_checker = Some(checker);
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn Knowledge>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn guardrail_resolver(mut self, resolver: Arc<dyn GuardrailResolver>) -> Self {
        self.guardrail_resolver = Some(resolver);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn events(mut self, events: EventRegistry) -> Self {
        self.events = events;
        self
    }

    pub fn decision_parser(mut self, parser: DecisionParser) -> Self {
        self.decision_parser = parser;
        self
    }

    pub fn build(self) -> Result<ExecutionEngine, ExecutorError> {
        let known = |name: &str| {
            self.agents.iter().any(|a| a.name() == name)
                || self.manager_agent.as_ref().is_some_and(|m| m.name() == name)
        };
        for task in &self.tasks {
            if let Some(name) = &task.agent {
                if !known(name) {
                    return Err(ExecutorError::AgentNotFound(name.clone()));
                }
            }
        }

        let tasks = if self.tasks.is_empty() {
            derive_tasks(&self.agents)
        } else {
            self.tasks
        };

        let table = TaskTable::new();
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(table.insert(task)?);
        }
        if self.config.process == ProcessKind::Sequential {
            chain_sequential(&table, &ids);
        }

        let run_id = Uuid::new_v4().to_string();
        tracing::info!(
            target: "agentflow.engine",
            run_id = %run_id,
            process = %self.config.process,
            tasks = ids.len(),
            agents = self.agents.len(),
            "engine built"
        );

        Ok(ExecutionEngine {
            inner: Arc::new(EngineInner {
                run_id,
                config: self.config,
                retry: self.retry,
                table,
                agents: self.agents,
                manager_agent: self.manager_agent,
                completion_checker: self.completion_checker,
                retry_strategy: self.retry_strategy,
                memory: self.memory,
                knowledge: self.knowledge,
                guardrail_resolver: self.guardrail_resolver,
                hooks: self.hooks,
                events: self.events,
                decision_parser: self.decision_parser,
            }),
        })
    }
}

/// One task per agent, built from the agent's standing instructions.
fn derive_tasks(agents: &[Arc<dyn Agent>]) -> Vec<Task> {
    agents
        .iter()
        .map(|agent| {
            let description = match agent.instructions() {
                Some(i) if !i.trim().is_empty() => i.to_string(),
                _ if !agent.role().is_empty() => format!("Act as {}", agent.role()),
                _ => format!("Complete the work assigned to {}", agent.name()),
            };
            Task::builder(description)
                .agent(agent.name())
                .expected_output("Complete the task successfully")
                .build()
        })
        .collect()
}

/// Link each task to the next in table order.
///
/// Tasks with explicit successors keep them; a task that declares no context
/// of its own receives its predecessor as context.
fn chain_sequential(table: &TaskTable, ids: &[TaskId]) {
    for pair in ids.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let Some(next_name) = table.name_of(next) else {
            continue;
        };
        let Some(prev_name) = table.name_of(prev) else {
            continue;
        };
        table.with_task_mut(prev, |t| {
            if t.next_tasks.is_empty() {
                t.next_tasks.push(next_name);
            }
        });
        table.with_task_mut(next, |t| {
            if t.context.is_empty() {
                t.context.push(ContextItem::Task(TaskRef::Name(prev_name)));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ChatRequest;
    use pretty_assertions::assert_eq;

    struct Named(&'static str, Option<&'static str>);

    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn instructions(&self) -> Option<&str> {
            self.1
        }

        fn chat(&self, _request: &ChatRequest) -> anyhow::Result<String> {
            Ok("ok".into())
        }
    }

    #[test]
    fn sequential_build_chains_tasks() {
        let engine = ExecutionEngine::builder()
            .agent(Arc::new(Named("w", None)))
            .task(Task::builder("a").name("a").build())
            .task(Task::builder("b").name("b").build())
            .task(Task::builder("c").name("c").build())
            .build()
            .unwrap();
        let tasks = engine.tasks();
        assert_eq!(tasks[0].next_tasks, vec!["b".to_string()]);
        assert_eq!(tasks[1].next_tasks, vec!["c".to_string()]);
        assert!(tasks[2].next_tasks.is_empty());
        let c = engine.table().snapshot(2).unwrap();
        assert_eq!(c.context, vec![ContextItem::task("b")]);
    }

    #[test]
    fn workflow_build_leaves_routing_alone() {
        let engine = ExecutionEngine::builder()
            .process(ProcessKind::Workflow)
            .task(Task::builder("a").name("a").build())
            .task(Task::builder("b").name("b").build())
            .build()
            .unwrap();
        assert!(engine.tasks()[0].next_tasks.is_empty());
    }

    #[test]
    fn derives_one_task_per_agent() {
        let engine = ExecutionEngine::builder()
            .agent(Arc::new(Named("researcher", Some("Research Rust schedulers"))))
            .agent(Arc::new(Named("writer", None)))
            .build()
            .unwrap();
        let tasks = engine.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].description, "Research Rust schedulers");
        assert_eq!(tasks[1].agent.as_deref(), Some("writer"));
        assert_eq!(tasks[0].next_tasks, vec![tasks[1].name.clone()]);
    }

    #[test]
    fn unknown_agent_binding_fails_build() {
        let err = ExecutionEngine::builder()
            .task(Task::builder("a").agent("ghost").build())
            .build()
            .unwrap_err();
        assert!(matches!(err, ExecutorError::AgentNotFound(n) if n == "ghost"));
    }

    #[test]
    fn aggregate_queries_cover_every_task() {
        let engine = ExecutionEngine::builder()
            .agent(Arc::new(Named("w", None)))
            .task(Task::builder("a").build())
            .build()
            .unwrap();
        let id = engine.add_task(Task::builder("late").name("late").build()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(engine.all_task_status().len(), 2);
        assert_eq!(engine.task_details(1).unwrap().name, "late");
        assert!(engine.task_result(0).is_none());
        assert_eq!(engine.result().task_status[&0], TaskStatus::NotStarted);
    }
}
