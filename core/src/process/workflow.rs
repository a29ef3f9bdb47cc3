use std::collections::{HashMap, HashSet};

use super::{ProcessKind, RouteRecord, Scheduler, Step};
use crate::error::ExecutorError;
use crate::task::{
    LoopRow, Task, TaskId, TaskStatus, TaskTable, TaskType, CURRENT_TARGET, EXIT_TARGET,
};

/// Visits the fallback scan may grant a single task.
const FALLBACK_CAP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Visit(TaskId),
    AwaitingExecution(TaskId),
    AwaitingRows(TaskId),
    Done,
}

enum Route {
    To(TaskId),
    Terminate,
    Unmatched,
}

/// Graph walk over `next_tasks` and condition maps with lazily expanded loops.
///
/// Every visit counts against `max_iter`, loop children included; the walk
/// finishes as soon as the count exceeds it.
pub struct WorkflowScheduler {
    table: TaskTable,
    max_iter: usize,
    iterations: usize,
    state: State,
    last_edge: Option<(TaskId, TaskId)>,
    fallback_visits: HashMap<TaskId, usize>,
    expanded: HashMap<TaskId, Vec<TaskId>>,
    routes: Vec<RouteRecord>,
}

impl WorkflowScheduler {
    pub fn new(table: TaskTable, max_iter: usize) -> Self {
        let ids = table.ids();
        let start = ids
            .iter()
            .copied()
            .find(|id| table.with_task(*id, |t| t.is_start).unwrap_or(false))
            .or_else(|| ids.first().copied());
        Self {
            table,
            max_iter,
            iterations: 0,
            state: start.map(State::Visit).unwrap_or(State::Done),
            last_edge: None,
            fallback_visits: HashMap::new(),
            expanded: HashMap::new(),
            routes: Vec::new(),
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn record(&mut self, from: TaskId, to: Option<TaskId>, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(target: "agentflow.workflow", from, to = ?to, reason = %reason, "route");
        self.routes.push(RouteRecord { from, to, reason });
    }

    fn routing_error(&mut self, from: TaskId, target: &str) -> State {
        tracing::warn!(target: "agentflow.workflow", from, target, "routing target does not exist");
        self.record(from, None, format!("unknown target '{target}'"));
        State::Done
    }

    fn visit(&mut self, id: TaskId) -> Option<Step> {
        self.iterations += 1;
        if self.iterations > self.max_iter {
            tracing::warn!(
                target: "agentflow.workflow",
                max_iter = self.max_iter,
                "workflow reached its iteration ceiling"
            );
            self.state = State::Done;
            return Some(Step::Finished);
        }
        let Some(task) = self.table.snapshot(id) else {
            tracing::warn!(target: "agentflow.workflow", task_id = id, "visited task is missing");
            self.state = State::Done;
            return Some(Step::Finished);
        };
        if task.task_type == TaskType::Loop {
            return self.visit_loop(&task);
        }
        self.state = State::AwaitingExecution(id);
        Some(Step::Execute(id))
    }

    fn visit_loop(&mut self, task: &Task) -> Option<Step> {
        let Some(path) = task.input_file.clone() else {
            self.table.mark_completed(task.id);
            self.state = self.follow_next_tasks(task);
            return None;
        };
        let Some(children) = self.expanded.get(&task.id).cloned() else {
            self.state = State::AwaitingRows(task.id);
            return Some(Step::LoadRows {
                task: task.id,
                path,
            });
        };
        let pending = children
            .iter()
            .copied()
            .find(|c| self.table.status(*c) != Some(TaskStatus::Completed));
        match pending {
            Some(child) => self.state = State::Visit(child),
            None => self.state = self.finish_loop(task.id, children.last().copied()),
        }
        None
    }

    fn finish_loop(&mut self, id: TaskId, last_child: Option<TaskId>) -> State {
        let last_result = last_child.and_then(|c| self.table.with_task(c, |t| t.result.clone()).flatten());
        self.table.with_task_mut(id, |t| {
            if t.result.is_none() {
                t.result = last_result;
            }
        });
        self.table.mark_completed(id);
        tracing::info!(target: "agentflow.workflow", task_id = id, "loop completed");
        let Some(task) = self.table.snapshot(id) else {
            return State::Done;
        };
        match self.route_condition(&task, "done") {
            Route::To(next) => State::Visit(next),
            Route::Terminate => State::Done,
            Route::Unmatched => self.follow_next_tasks(&task),
        }
    }

    fn expand_loop(&mut self, id: TaskId, rows: Vec<LoopRow>) -> Result<State, ExecutorError> {
        let Some(parent) = self.table.snapshot(id) else {
            return Ok(State::Done);
        };
        if rows.is_empty() {
            self.expanded.insert(id, Vec::new());
            return Ok(self.finish_loop(id, None));
        }

        let names: Vec<String> = (1..=rows.len())
            .map(|n| format!("{}_{}", parent.name, n))
            .collect();
        let mut children = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let next = names.get(i + 1).unwrap_or(&parent.name).clone();
            let mut builder = Task::builder(row.description())
                .name(names[i].clone())
                .expected_output(parent.expected_output.clone())
                .next_task(next)
                .condition("done", parent.next_tasks.clone())
                .condition("retry", [CURRENT_TARGET])
                .max_retries(parent.max_retries);
            if let Some(agent) = &parent.agent {
                builder = builder.agent(agent.clone());
            }
            let mut child = builder.build();
            child.loop_parent = Some(id);
            children.push(self.table.insert(child)?);
        }
        tracing::info!(
            target: "agentflow.workflow",
            task_id = id,
            subtasks = children.len(),
            "loop expanded"
        );

        self.table.set_status(id, TaskStatus::InProgress);
        let first = children[0];
        self.expanded.insert(id, children);
        self.record(id, Some(first), "loop expanded");
        Ok(State::Visit(first))
    }

    fn after_execution(&mut self, id: TaskId) -> State {
        let Some(task) = self.table.snapshot(id) else {
            return State::Done;
        };
        let completed = task.status == TaskStatus::Completed;
        if completed && task.resets_after_completion() {
            self.table.set_status(id, TaskStatus::NotStarted);
        }

        let route = if task.task_type == TaskType::Decision {
            let decision = task.decision().unwrap_or_default();
            self.route_condition(&task, &decision)
        } else if task.is_subtask() && !completed {
            self.route_condition(&task, "retry")
        } else {
            Route::Unmatched
        };

        match route {
            Route::To(next) => {
                self.last_edge = Some((id, next));
                State::Visit(next)
            }
            Route::Terminate => State::Done,
            Route::Unmatched
                if task.task_type == TaskType::Plain && !task.is_subtask() && !task.has_routing() =>
            {
                self.record(id, None, "end of path");
                State::Done
            }
            Route::Unmatched => self.follow_next_tasks(&task),
        }
    }

    fn route_condition(&mut self, task: &Task, decision: &str) -> Route {
        let Some(targets) = task.condition.get(decision) else {
            if task.task_type == TaskType::Decision {
                tracing::warn!(
                    target: "agentflow.workflow",
                    task = %task.name,
                    decision,
                    "decision has no matching condition"
                );
            }
            return Route::Unmatched;
        };
        let target = targets.first().map(|t| t.trim()).unwrap_or_default();
        if target.is_empty() || target == EXIT_TARGET {
            self.record(task.id, None, format!("decision '{decision}' exits"));
            return Route::Terminate;
        }
        let next = if target == CURRENT_TARGET {
            task.id
        } else {
            match self.table.id_of(target) {
                Some(next) => next,
                None => {
                    self.routing_error(task.id, target);
                    return Route::Terminate;
                }
            }
        };
        self.table.with_task_mut(next, Task::reset);
        self.record(task.id, Some(next), format!("decision '{decision}'"));
        Route::To(next)
    }

    fn follow_next_tasks(&mut self, task: &Task) -> State {
        if let Some(name) = task.next_tasks.first() {
            let Some(next) = self.table.id_of(name) else {
                return self.routing_error(task.id, name);
            };
            let replays_edge = self.last_edge == Some((next, task.id))
                && self
                    .table
                    .with_task(next, |t| t.status == TaskStatus::Completed && !t.rerun)
                    .unwrap_or(false);
            if !replays_edge {
                self.table.with_task_mut(next, Task::reset);
                self.last_edge = Some((task.id, next));
                self.record(task.id, Some(next), "next task");
                return State::Visit(next);
            }
            tracing::debug!(target: "agentflow.workflow", from = task.id, to = next, "skipping replay of two-node cycle");
        }
        self.fallback_scan(task.id)
    }

    fn fallback_scan(&mut self, from: TaskId) -> State {
        let snapshots = self.table.snapshot_all();
        let targets: HashSet<&str> = snapshots
            .iter()
            .flat_map(|t| {
                t.next_tasks
                    .iter()
                    .chain(t.condition.values().flatten())
                    .map(String::as_str)
            })
            .collect();
        for task in &snapshots {
            if task.status != TaskStatus::NotStarted || !targets.contains(task.name.as_str()) {
                continue;
            }
            let visits = self.fallback_visits.entry(task.id).or_default();
            if *visits < FALLBACK_CAP {
                *visits += 1;
                let id = task.id;
                self.record(from, Some(id), "fallback scan");
                return State::Visit(id);
            }
        }
        self.record(from, None, "no reachable task left");
        State::Done
    }

    /// Text block listing the results of tasks that route into `id`.
    fn predecessor_context(&self, id: TaskId) -> Option<String> {
        let (name, retain_full) = self
            .table
            .with_task(id, |t| (t.name.clone(), t.retain_full_context))?;
        let mut inputs: Vec<(Option<u64>, String, String)> = self
            .table
            .ids()
            .into_iter()
            .filter(|p| *p != id)
            .filter_map(|p| {
                self.table
                    .with_task(p, |t| {
                        if !t.next_tasks.contains(&name) {
                            return None;
                        }
                        let raw = t.result.as_ref()?.raw.clone();
                        Some((t.completed_seq(), t.name.clone(), raw))
                    })
                    .flatten()
            })
            .collect();
        if inputs.is_empty() {
            return None;
        }
        if !retain_full {
            inputs.sort_by_key(|(seq, _, _)| *seq);
            inputs.drain(..inputs.len() - 1);
        }
        let mut text = String::from("Input data from previous tasks:");
        for (_, pred, raw) in inputs {
            text.push_str(&format!("\n{pred}: {raw}"));
        }
        Some(text)
    }
}

impl Scheduler for WorkflowScheduler {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Workflow
    }

    fn next_step(&mut self) -> Result<Step, ExecutorError> {
        loop {
            match self.state {
                State::Done => return Ok(Step::Finished),
                State::AwaitingRows(id) => {
                    let path = self.table.with_task(id, |t| t.input_file.clone()).flatten();
                    match path {
                        Some(path) => return Ok(Step::LoadRows { task: id, path }),
                        None => self.state = State::Done,
                    }
                }
                State::AwaitingExecution(id) => self.state = self.after_execution(id),
                State::Visit(id) => {
                    if let Some(step) = self.visit(id) {
                        return Ok(step);
                    }
                }
            }
        }
    }

    fn accept_rows(
        &mut self,
        task: TaskId,
        rows: Result<Vec<LoopRow>, ExecutorError>,
    ) -> Result<(), ExecutorError> {
        if self.state != State::AwaitingRows(task) {
            tracing::warn!(target: "agentflow.workflow", task_id = task, "rows delivered for a loop that is not waiting");
            return Ok(());
        }
        match rows {
            Ok(rows) => {
                self.state = self.expand_loop(task, rows)?;
            }
            Err(e) => {
                tracing::error!(target: "agentflow.workflow", task_id = task, error = %e, "loop source failed");
                self.table.set_status(task, TaskStatus::Failed);
                self.record(task, None, e.to_string());
                self.state = State::Done;
            }
        }
        Ok(())
    }

    fn prepare(&mut self, id: TaskId) {
        let context = self.predecessor_context(id);
        self.table
            .with_task_mut(id, |t| t.set_workflow_context(context));
    }

    fn drain_routes(&mut self) -> Vec<RouteRecord> {
        std::mem::take(&mut self.routes)
    }

    fn routing_depends_on_outcome(&self, id: TaskId) -> bool {
        self.table
            .with_task(id, |t| {
                !(t.task_type == TaskType::Plain
                    && !t.is_subtask()
                    && !t.next_tasks.is_empty()
                    && !t.rerun)
            })
            .unwrap_or(true)
    }
}
