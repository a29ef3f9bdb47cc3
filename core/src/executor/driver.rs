use tokio::task::JoinHandle;

use crate::error::ExecutorError;
use crate::hooks::{EngineEvent, EventKind};
use crate::process::{ProcessKind, Scheduler, Step};
use crate::task::{aread_rows, read_rows, ContextItem, TaskId};

use super::engine::ExecutionEngine;
use super::types::ExecutionResult;

type Pending = Vec<(TaskId, JoinHandle<Result<(), ExecutorError>>)>;

impl ExecutionEngine {
    /// Run the configured process to the end and return the aggregate result.
    pub fn start(&self) -> Result<ExecutionResult, ExecutorError> {
        self.run_all_tasks()?;
        Ok(self.result())
    }

    pub async fn astart(&self) -> Result<ExecutionResult, ExecutorError> {
        self.arun_all_tasks().await?;
        Ok(self.result())
    }

    /// Blocking driver: every task runs inline, in scheduler order.
    pub fn run_all_tasks(&self) -> Result<(), ExecutorError> {
        let mut scheduler = self.scheduler()?;
        tracing::info!(
            target: "agentflow.engine",
            run_id = %self.inner.run_id,
            process = %scheduler.kind(),
            tasks = self.inner.table.len(),
            "run started"
        );

        let outcome = self.drive(scheduler.as_mut());
        for ev in self.route_events(scheduler.drain_routes()) {
            self.inner.events.emit(&ev);
        }
        match outcome {
            Ok(()) => {
                self.log_finished();
                Ok(())
            }
            Err(e) => {
                self.inner.events.emit(&self.run_failed(&e));
                Err(e)
            }
        }
    }

    fn drive(&self, scheduler: &mut dyn Scheduler) -> Result<(), ExecutorError> {
        loop {
            match scheduler.next_step()? {
                Step::Execute(id) => {
                    scheduler.prepare(id);
                    self.run_task(id)?;
                }
                Step::LoadRows { task, path } => {
                    scheduler.accept_rows(task, read_rows(&path))?;
                }
                Step::Consult(query) => {
                    let manager = self
                        .inner
                        .manager_agent
                        .clone()
                        .ok_or(ExecutorError::ManagerAgentMissing)?;
                    let decision = self
                        .inner
                        .decision_parser
                        .decide_blocking(manager.as_ref(), &query)?;
                    tracing::debug!(target: "agentflow.hierarchical", round = query.round, ?decision, "manager decided");
                    scheduler.accept_decision(decision)?;
                }
                Step::Finished => return Ok(()),
            }
            for ev in self.route_events(scheduler.drain_routes()) {
                self.inner.events.emit(&ev);
            }
        }
    }

    /// Cooperative driver.
    ///
    /// Async tasks whose successor does not hinge on their outcome are
    /// spawned and left running; everything else waits for them first.
    /// Sync tasks act as a barrier and run on the blocking pool.
    pub async fn arun_all_tasks(&self) -> Result<(), ExecutorError> {
        let mut scheduler = self.scheduler()?;
        tracing::info!(
            target: "agentflow.engine",
            run_id = %self.inner.run_id,
            process = %scheduler.kind(),
            tasks = self.inner.table.len(),
            "run started"
        );

        let mut pending = Pending::new();
        let outcome = self.adrive(scheduler.as_mut(), &mut pending).await;
        let flushed = flush(&mut pending).await;
        for ev in self.route_events(scheduler.drain_routes()) {
            self.inner.events.aemit(&ev).await;
        }
        match outcome.and(flushed) {
            Ok(()) => {
                self.log_finished();
                Ok(())
            }
            Err(e) => {
                self.inner.events.aemit(&self.run_failed(&e)).await;
                Err(e)
            }
        }
    }

    async fn adrive(
        &self,
        scheduler: &mut dyn Scheduler,
        pending: &mut Pending,
    ) -> Result<(), ExecutorError> {
        loop {
            match scheduler.next_step()? {
                Step::Execute(id) => {
                    let is_async = self
                        .inner
                        .table
                        .with_task(id, |t| t.async_execution)
                        .unwrap_or(false);
                    if !is_async || self.waits_on(id, pending) {
                        flush(pending).await?;
                    }
                    scheduler.prepare(id);

                    if !is_async {
                        let engine = self.clone();
                        tokio::task::spawn_blocking(move || engine.run_task(id))
                            .await
                            .map_err(|e| ExecutorError::Join(e.to_string()))??;
                    } else if scheduler.routing_depends_on_outcome(id) {
                        self.arun_task(id).await?;
                    } else {
                        tracing::debug!(target: "agentflow.engine", task_id = id, in_flight = pending.len() + 1, "task deferred");
                        let engine = self.clone();
                        pending.push((id, tokio::spawn(async move { engine.arun_task(id).await })));
                    }
                }
                Step::LoadRows { task, path } => {
                    scheduler.accept_rows(task, aread_rows(&path).await)?;
                }
                Step::Consult(query) => {
                    flush(pending).await?;
                    let manager = self
                        .inner
                        .manager_agent
                        .clone()
                        .ok_or(ExecutorError::ManagerAgentMissing)?;
                    let decision = self
                        .inner
                        .decision_parser
                        .decide(manager.as_ref(), &query)
                        .await?;
                    tracing::debug!(target: "agentflow.hierarchical", round = query.round, ?decision, "manager decided");
                    scheduler.accept_decision(decision)?;
                }
                Step::Finished => return Ok(()),
            }
            for ev in self.route_events(scheduler.drain_routes()) {
                self.inner.events.aemit(&ev).await;
            }
        }
    }

    /// Whether `id` needs the outcome of a task still in flight.
    ///
    /// That is the case when `id` is itself in flight, names an in-flight
    /// task as context, or (in a workflow, where predecessors feed the
    /// prompt) is the declared successor of one.
    fn waits_on(&self, id: TaskId, pending: &Pending) -> bool {
        if pending.is_empty() {
            return false;
        }
        if pending.iter().any(|(p, _)| *p == id) {
            return true;
        }
        let table = &self.inner.table;
        let Some((name, context)) = table.with_task(id, |t| (t.name.clone(), t.context.clone()))
        else {
            return false;
        };
        let in_flight = |dep: TaskId| pending.iter().any(|(p, _)| *p == dep);
        let needs_context = context.iter().any(|item| match item {
            ContextItem::Task(reference) => table.resolve(reference).is_some_and(in_flight),
            _ => false,
        });
        let successor = self.inner.config.process == ProcessKind::Workflow
            && pending.iter().any(|(p, _)| {
                table
                    .with_task(*p, |t| t.next_tasks.iter().any(|n| *n == name))
                    .unwrap_or(false)
            });
        needs_context || successor
    }

    fn log_finished(&self) {
        let result = self.result();
        tracing::info!(
            target: "agentflow.engine",
            run_id = %self.inner.run_id,
            completed = result.completed(),
            failed = result.failed(),
            "run finished"
        );
    }

    fn run_failed(&self, e: &ExecutorError) -> EngineEvent {
        tracing::error!(target: "agentflow.engine", run_id = %self.inner.run_id, error = %e, "run aborted");
        self.event(EventKind::Error, format!("run aborted: {e}"))
    }
}

/// Wait for every in-flight task; the first failure wins.
async fn flush(pending: &mut Pending) -> Result<(), ExecutorError> {
    if pending.is_empty() {
        return Ok(());
    }
    let (ids, handles): (Vec<TaskId>, Vec<_>) = pending.drain(..).unzip();
    let mut first_err = None;
    for (id, joined) in ids.into_iter().zip(futures::future::join_all(handles).await) {
        let outcome = joined
            .map_err(|e| ExecutorError::Join(format!("task {id}: {e}")))
            .and_then(|r| r);
        if let Err(e) = outcome {
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}
