//! Per-task execution loop: prompt, agent call, completion check, guardrail,
//! then the post-completion hooks.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, ChatRequest};
use crate::error::ExecutorError;
use crate::hooks::{EngineEvent, EventKind};
use crate::memory::MemoryRecord;
use crate::task::{
    write_output_file, write_output_file_async, CompletionChecker, ContextResolver,
    DefaultCompletionChecker, Guardrail, GuardrailStep, GuardrailVerdict, Task, TaskGuardrail,
    TaskId, TaskMetadata, TaskOutput, TaskStatus,
};

use super::engine::ExecutionEngine;
use super::prompt::{aimage_inputs, build_content, build_prompt, image_inputs, response_format};

enum Attempt {
    Completed,
    Rejected,
    Incomplete(String),
}

impl ExecutionEngine {
    /// Run one task to completion or until its attempts are used up.
    ///
    /// A missing id and exhausted attempts are reported through events, not
    /// errors. Only guardrail exhaustion is returned as `Err`.
    pub fn run_task(&self, id: TaskId) -> Result<(), ExecutorError> {
        let table = &self.inner.table;
        let Some(status) = table.status(id) else {
            self.inner.events.emit(&self.missing_task(id));
            return Ok(());
        };
        if status == TaskStatus::Completed {
            return Ok(());
        }

        let max = self.inner.config.max_retries;
        let mut retries = 0u32;
        let mut last_reason = String::new();
        while let Some(status) = table.status(id) {
            if status == TaskStatus::Completed || retries >= max {
                break;
            }
            match status {
                TaskStatus::NotStarted | TaskStatus::InProgress => match self.execute_once(id)? {
                    Attempt::Completed | Attempt::Rejected => {}
                    Attempt::Incomplete(reason) => {
                        table.set_status(id, TaskStatus::InProgress);
                        retries += 1;
                        last_reason = reason;
                        if retries >= max {
                            break;
                        }
                        match self.backoff(retries, &last_reason) {
                            Some(delay) => std::thread::sleep(delay),
                            None => break,
                        }
                    }
                },
                TaskStatus::Failed => {
                    table.set_status(id, TaskStatus::InProgress);
                }
                TaskStatus::Completed => break,
            }
        }

        if table.status(id) != Some(TaskStatus::Completed) {
            self.inner
                .events
                .emit(&self.exhausted(id, retries, &last_reason));
        }
        Ok(())
    }

    pub async fn arun_task(&self, id: TaskId) -> Result<(), ExecutorError> {
        let table = &self.inner.table;
        let Some(status) = table.status(id) else {
            self.inner.events.aemit(&self.missing_task(id)).await;
            return Ok(());
        };
        if status == TaskStatus::Completed {
            return Ok(());
        }

        let max = self.inner.config.max_retries;
        let mut retries = 0u32;
        let mut last_reason = String::new();
        while let Some(status) = table.status(id) {
            if status == TaskStatus::Completed || retries >= max {
                break;
            }
            match status {
                TaskStatus::NotStarted | TaskStatus::InProgress => {
                    match self.aexecute_once(id).await? {
                        Attempt::Completed | Attempt::Rejected => {}
                        Attempt::Incomplete(reason) => {
                            table.set_status(id, TaskStatus::InProgress);
                            retries += 1;
                            last_reason = reason;
                            if retries >= max {
                                break;
                            }
                            match self.backoff(retries, &last_reason) {
                                Some(delay) => tokio::time::sleep(delay).await,
                                None => break,
                            }
                        }
                    }
                }
                TaskStatus::Failed => {
                    table.set_status(id, TaskStatus::InProgress);
                }
                TaskStatus::Completed => break,
            }
        }

        if table.status(id) != Some(TaskStatus::Completed) {
            self.inner
                .events
                .aemit(&self.exhausted(id, retries, &last_reason))
                .await;
        }
        Ok(())
    }

    fn execute_once(&self, id: TaskId) -> Result<Attempt, ExecutorError> {
        let Some(task) = self.inner.table.snapshot(id) else {
            return Ok(Attempt::Incomplete(format!("task {id} disappeared")));
        };
        let meta = task.metadata();
        if let Some(hooks) = &self.inner.hooks {
            if let Err(e) = hooks.on_task_start(&meta) {
                tracing::warn!(target: "agentflow.engine", task = %task.name, error = %e, "on_task_start hook failed");
            }
        }
        self.inner.events.emit(&self.start_event(&task));
        self.inner.table.set_status(id, TaskStatus::InProgress);

        let agent = match self.agent_for(&task) {
            Ok(agent) => agent,
            Err(e) => {
                self.inner.events.emit(&self.failure(&task, "agent lookup", &e));
                return Ok(Attempt::Incomplete(e.to_string()));
            }
        };

        let user = self.user_for(&task);
        let context = ContextResolver::new(&self.inner.table)
            .with_knowledge(self.inner.knowledge.as_ref())
            .with_user(user.as_deref())
            .resolve(&task.context, task.retain_full_context);
        let memory = match &self.inner.memory {
            Some(m) => m
                .build_context_for_task(&task.description, user.as_deref())
                .unwrap_or_else(|e| {
                    tracing::warn!(target: "agentflow.context", task = %task.name, error = %e, "memory lookup failed");
                    String::new()
                }),
            None => String::new(),
        };
        let request = self.request(
            &task,
            meta,
            build_content(build_prompt(&task, &context, &memory), image_inputs(&task.images)),
        );

        tracing::debug!(target: "agentflow.task", task = %task.name, agent = agent.name(), "calling agent");
        let raw = match agent.chat(&request) {
            Ok(raw) => raw,
            Err(e) => {
                self.inner.events.emit(&self.failure(&task, "agent chat", &e));
                return Ok(Attempt::Incomplete(e.to_string()));
            }
        };
        self.inner
            .events
            .emit(&self.interaction(&task, agent.as_ref(), &request, &raw));

        let Some(output) = self.checked_output(&task, &raw, agent.name()) else {
            return Ok(Attempt::Incomplete("output did not pass the completion check".into()));
        };
        self.inner.table.mark_completed(id);

        let verdict = match self.guardrail_for(&task, &agent) {
            Some(g) => g.validate(&output),
            None => GuardrailVerdict::Accept,
        };
        let Some(output) = self.record_verdict(&task, output, verdict, |ev| self.inner.events.emit(&ev))? else {
            return Ok(Attempt::Rejected);
        };

        let user = user.as_deref();
        if task.store_in_memory {
            if let Some(memory) = &self.inner.memory {
                if let Err(e) = memory.store_long_term(&MemoryRecord::from_output(id, &task.name, &output, user)) {
                    self.inner.events.emit(&self.failure(&task, "memory store", &e));
                }
            }
        }
        let meta = self.metadata(&task);
        if let Some(callback) = &task.callback {
            if let Err(e) = callback.invoke(&output, &meta) {
                self.inner.events.emit(&self.failure(&task, "callback", &e));
            }
        }
        if let Some(path) = &task.output_file {
            if let Err(e) = write_output_file(path, task.create_directory, &output) {
                self.inner.events.emit(&self.failure(&task, "output file", &e));
            }
        }
        if let Some(hooks) = &self.inner.hooks {
            if let Err(e) = hooks.on_task_complete(&meta, &output) {
                tracing::warn!(target: "agentflow.engine", task = %task.name, error = %e, "on_task_complete hook failed");
            }
        }
        self.inner.events.emit(&self.complete_event(&task, &output));
        Ok(Attempt::Completed)
    }

    async fn aexecute_once(&self, id: TaskId) -> Result<Attempt, ExecutorError> {
        let Some(task) = self.inner.table.snapshot(id) else {
            return Ok(Attempt::Incomplete(format!("task {id} disappeared")));
        };
        let meta = task.metadata();
        if let Some(hooks) = &self.inner.hooks {
            if let Err(e) = hooks.aon_task_start(&meta).await {
                tracing::warn!(target: "agentflow.engine", task = %task.name, error = %e, "on_task_start hook failed");
            }
        }
        self.inner.events.aemit(&self.start_event(&task)).await;
        self.inner.table.set_status(id, TaskStatus::InProgress);

        let agent = match self.agent_for(&task) {
            Ok(agent) => agent,
            Err(e) => {
                self.inner
                    .events
                    .aemit(&self.failure(&task, "agent lookup", &e))
                    .await;
                return Ok(Attempt::Incomplete(e.to_string()));
            }
        };

        let user = self.user_for(&task);
        let context = ContextResolver::new(&self.inner.table)
            .with_knowledge(self.inner.knowledge.as_ref())
            .with_user(user.as_deref())
            .aresolve(&task.context, task.retain_full_context)
            .await;
        let memory = match &self.inner.memory {
            Some(m) => m
                .abuild_context_for_task(&task.description, user.as_deref())
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(target: "agentflow.context", task = %task.name, error = %e, "memory lookup failed");
                    String::new()
                }),
            None => String::new(),
        };
        let images = aimage_inputs(&task.images).await;
        let request = self.request(
            &task,
            meta,
            build_content(build_prompt(&task, &context, &memory), images),
        );

        tracing::debug!(target: "agentflow.task", task = %task.name, agent = agent.name(), "calling agent");
        let raw = match agent.achat(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                self.inner
                    .events
                    .aemit(&self.failure(&task, "agent chat", &e))
                    .await;
                return Ok(Attempt::Incomplete(e.to_string()));
            }
        };
        self.inner
            .events
            .aemit(&self.interaction(&task, agent.as_ref(), &request, &raw))
            .await;

        let Some(output) = self.checked_output(&task, &raw, agent.name()) else {
            return Ok(Attempt::Incomplete("output did not pass the completion check".into()));
        };
        self.inner.table.mark_completed(id);

        let verdict = match self.guardrail_for(&task, &agent) {
            Some(g) => g.avalidate(&output).await,
            None => GuardrailVerdict::Accept,
        };
        let mut pending_events = Vec::new();
        let recorded = self.record_verdict(&task, output, verdict, |ev| pending_events.push(ev));
        for ev in pending_events {
            self.inner.events.aemit(&ev).await;
        }
        let Some(output) = recorded? else {
            return Ok(Attempt::Rejected);
        };

        let user = user.as_deref();
        if task.store_in_memory {
            if let Some(memory) = &self.inner.memory {
                let record = MemoryRecord::from_output(id, &task.name, &output, user);
                if let Err(e) = memory.astore_long_term(&record).await {
                    self.inner
                        .events
                        .aemit(&self.failure(&task, "memory store", &e))
                        .await;
                }
            }
        }
        let meta = self.metadata(&task);
        if let Some(callback) = &task.callback {
            if let Err(e) = callback.ainvoke(&output, &meta).await {
                self.inner
                    .events
                    .aemit(&self.failure(&task, "callback", &e))
                    .await;
            }
        }
        if let Some(path) = &task.output_file {
            if let Err(e) = write_output_file_async(path, task.create_directory, &output).await {
                self.inner
                    .events
                    .aemit(&self.failure(&task, "output file", &e))
                    .await;
            }
        }
        if let Some(hooks) = &self.inner.hooks {
            if let Err(e) = hooks.aon_task_complete(&meta, &output).await {
                tracing::warn!(target: "agentflow.engine", task = %task.name, error = %e, "on_task_complete hook failed");
            }
        }
        self.inner
            .events
            .aemit(&self.complete_event(&task, &output))
            .await;
        Ok(Attempt::Completed)
    }

    fn user_for(&self, task: &Task) -> Option<String> {
        task.user_id
            .clone()
            .or_else(|| self.inner.config.user_id.clone())
    }

    fn metadata(&self, task: &Task) -> TaskMetadata {
        self.inner
            .table
            .with_task(task.id, Task::metadata)
            .unwrap_or_else(|| task.metadata())
    }

    fn request(
        &self,
        task: &Task,
        meta: TaskMetadata,
        content: crate::agent::ChatContent,
    ) -> ChatRequest {
        ChatRequest {
            content,
            tools: task.tools.clone(),
            response_format: response_format(task),
            task: Some(meta),
        }
    }

    fn checked_output(&self, task: &Task, raw: &str, agent: &str) -> Option<TaskOutput> {
        let complete = match (&task.completion_checker, &self.inner.completion_checker) {
            (Some(checker), _) | (None, Some(checker)) => checker.is_complete(task, raw),
            (None, None) => DefaultCompletionChecker.is_complete(task, raw),
        };
        if !complete {
            tracing::debug!(target: "agentflow.task", task = %task.name, "output rejected by completion check");
            return None;
        }
        let (output, warning) = task.build_output(raw, agent);
        if let Some(warning) = warning {
            tracing::warn!(target: "agentflow.task", task = %task.name, warning = %warning, "structured output dropped");
        }
        Some(output)
    }

    fn guardrail_for(&self, task: &Task, agent: &Arc<dyn Agent>) -> Option<Arc<dyn Guardrail>> {
        match task.guardrail.as_ref()? {
            TaskGuardrail::Validator(g) => Some(g.clone()),
            TaskGuardrail::Description(description) => match &self.inner.guardrail_resolver {
                Some(resolver) => Some(resolver.resolve(description, Some(agent.clone()))),
                None => {
                    tracing::warn!(
                        target: "agentflow.task",
                        task = %task.name,
                        "guardrail description given without a resolver; accepting output"
                    );
                    None
                }
            },
        }
    }

    /// Apply the guardrail verdict and store the accepted output on the task.
    fn record_verdict(
        &self,
        task: &Task,
        output: TaskOutput,
        verdict: GuardrailVerdict,
        mut emit: impl FnMut(EngineEvent),
    ) -> Result<Option<TaskOutput>, ExecutorError> {
        let table = &self.inner.table;
        let step = table
            .with_task_mut(task.id, |t| t.apply_guardrail_verdict(output, verdict))
            .ok_or_else(|| ExecutorError::TaskNotFound(task.id.to_string()))?;
        match step {
            Ok(GuardrailStep::Accepted(output)) => {
                table.with_task_mut(task.id, |t| t.result = Some(output.clone()));
                tracing::info!(target: "agentflow.task", task = %task.name, "task completed");
                Ok(Some(output))
            }
            Ok(GuardrailStep::Rejected {
                reason,
                retry_count,
            }) => {
                tracing::warn!(
                    target: "agentflow.task",
                    task = %task.name,
                    retry_count,
                    max_retries = task.max_retries,
                    reason = %reason,
                    "guardrail rejected output"
                );
                emit(self.failure(task, "guardrail", &reason));
                Ok(None)
            }
            Err(e) => {
                tracing::error!(target: "agentflow.task", task = %task.name, error = %e, "guardrail retries exhausted");
                emit(self.failure(task, "guardrail", &e));
                Err(e)
            }
        }
    }

    fn backoff(&self, attempt: u32, reason: &str) -> Option<Duration> {
        match &self.inner.retry_strategy {
            Some(strategy) if strategy.should_retry(attempt, reason) => {
                strategy.next_delay(attempt, reason)
            }
            Some(_) => None,
            None => Some(Duration::from_millis(self.inner.retry.base_delay_ms)),
        }
    }

    fn start_event(&self, task: &Task) -> EngineEvent {
        self.event(EventKind::TaskStart, format!("starting {}", task.name))
            .with_task(task.id, &task.name)
            .with_agent(task.agent.as_deref())
    }

    fn complete_event(&self, task: &Task, output: &TaskOutput) -> EngineEvent {
        let mut ev = self
            .event(EventKind::TaskComplete, format!("completed {}", task.name))
            .with_task(task.id, &task.name)
            .with_agent(Some(output.agent.as_str()));
        if let Ok(payload) = serde_json::to_value(output) {
            ev = ev.with_payload(payload);
        }
        ev
    }

    fn interaction(
        &self,
        task: &Task,
        agent: &dyn Agent,
        request: &ChatRequest,
        raw: &str,
    ) -> EngineEvent {
        self.event(EventKind::Interaction, raw)
            .with_task(task.id, &task.name)
            .with_agent(Some(agent.name()))
            .with_payload(serde_json::json!({
                "prompt": request.prompt(),
                "response": raw,
                "images": matches!(request.content, crate::agent::ChatContent::Multimodal { .. }),
            }))
    }

    fn failure(&self, task: &Task, stage: &str, error: &dyn std::fmt::Display) -> EngineEvent {
        tracing::warn!(target: "agentflow.engine", task = %task.name, stage, error = %error, "task step failed");
        self.event(EventKind::Error, format!("{stage}: {error}"))
            .with_task(task.id, &task.name)
            .with_agent(task.agent.as_deref())
    }

    fn missing_task(&self, id: TaskId) -> EngineEvent {
        tracing::error!(target: "agentflow.engine", task_id = id, "task not found");
        let mut ev = self.event(EventKind::Error, format!("task {id} not found"));
        ev.task_id = Some(id);
        ev
    }

    fn exhausted(&self, id: TaskId, attempts: u32, reason: &str) -> EngineEvent {
        let name = self.inner.table.name_of(id).unwrap_or_default();
        tracing::warn!(
            target: "agentflow.engine",
            task = %name,
            attempts,
            reason,
            "task did not complete"
        );
        self.event(
            EventKind::Error,
            format!("task '{name}' did not complete after {attempts} attempts: {reason}"),
        )
        .with_task(id, name)
    }
}
