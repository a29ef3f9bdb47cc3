use super::decision::{ManagerAction, ManagerInstructions, ManagerQuery, TaskSummary};
use super::{ProcessKind, RouteRecord, Scheduler, Step};
use crate::error::ExecutorError;
use crate::task::{Task, TaskId, TaskStatus, TaskTable};

const MANAGER_TASK_NAME: &str = "manager_task";

#[derive(Debug, Clone, PartialEq)]
enum State {
    Consult,
    AwaitingDecision(ManagerQuery),
    Dispatch(TaskId),
    AwaitingExecution(TaskId),
    Done,
}

/// Lets a manager agent pick the next task and its assignee each round.
///
/// The manager task is registered in the table for bookkeeping; the manager
/// itself is consulted through [`Step::Consult`] rather than executed, so no
/// `Step::Execute(manager_task)` is ever yielded: running it as a task would
/// send the manager a plain prompt whose reply nothing reads.
pub struct HierarchicalScheduler {
    table: TaskTable,
    agents: Vec<String>,
    manager_task: TaskId,
    max_rounds: usize,
    rounds: usize,
    completed: usize,
    state: State,
    routes: Vec<RouteRecord>,
}

impl HierarchicalScheduler {
    pub fn new(
        table: TaskTable,
        agents: Vec<String>,
        manager_agent: String,
        max_rounds: usize,
    ) -> Result<Self, ExecutorError> {
        let mut name = MANAGER_TASK_NAME.to_string();
        let mut n = 1;
        while table.id_of(&name).is_some() {
            name = format!("{MANAGER_TASK_NAME}_{n}");
            n += 1;
        }
        let manager = Task::builder("Coordinate the team and decide which task runs next")
            .name(name)
            .agent(manager_agent)
            .expected_output("All tasks completed")
            .build();
        let manager_task = table.insert(manager)?;
        table.set_status(manager_task, TaskStatus::InProgress);

        Ok(Self {
            table,
            agents,
            manager_task,
            max_rounds,
            rounds: 0,
            completed: 0,
            state: State::Consult,
            routes: Vec::new(),
        })
    }

    pub fn manager_task(&self) -> TaskId {
        self.manager_task
    }

    /// Non-manager tasks completed through this scheduler.
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    fn worker_ids(&self) -> Vec<TaskId> {
        self.table
            .ids()
            .into_iter()
            .filter(|id| *id != self.manager_task)
            .collect()
    }

    fn summaries(&self) -> Vec<TaskSummary> {
        self.worker_ids()
            .into_iter()
            .filter_map(|id| {
                self.table.with_task(id, |t| TaskSummary {
                    task_id: t.id,
                    name: t.name.clone(),
                    description: t.description.clone(),
                    status: t.status,
                    agent: t.agent.clone(),
                })
            })
            .collect()
    }

    fn finish(&mut self, status: TaskStatus) {
        if status == TaskStatus::Completed {
            self.table.mark_completed(self.manager_task);
        } else {
            self.table.set_status(self.manager_task, status);
        }
        self.state = State::Done;
    }

    fn consult(&mut self) -> Step {
        let tasks = self.summaries();
        if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            tracing::info!(target: "agentflow.hierarchical", completed = self.completed, "all tasks completed");
            self.finish(TaskStatus::Completed);
            return Step::Finished;
        }
        if self.rounds >= self.max_rounds {
            tracing::warn!(
                target: "agentflow.hierarchical",
                max_rounds = self.max_rounds,
                "manager round ceiling reached with tasks outstanding"
            );
            self.finish(TaskStatus::Failed);
            return Step::Finished;
        }
        self.rounds += 1;
        let query = ManagerQuery {
            round: self.rounds,
            manager_task: self.manager_task,
            agents: self.agents.clone(),
            tasks,
        };
        self.state = State::AwaitingDecision(query.clone());
        Step::Consult(query)
    }
}

impl Scheduler for HierarchicalScheduler {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Hierarchical
    }

    fn next_step(&mut self) -> Result<Step, ExecutorError> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Done => return Ok(Step::Finished),
                State::Consult => return Ok(self.consult()),
                State::AwaitingDecision(query) => {
                    self.state = State::AwaitingDecision(query.clone());
                    return Ok(Step::Consult(query));
                }
                State::Dispatch(id) => {
                    self.state = State::AwaitingExecution(id);
                    return Ok(Step::Execute(id));
                }
                State::AwaitingExecution(id) => {
                    if self.table.status(id) == Some(TaskStatus::Completed) {
                        self.completed += 1;
                    }
                    self.state = State::Consult;
                }
            }
        }
    }

    fn accept_decision(&mut self, decision: ManagerInstructions) -> Result<(), ExecutorError> {
        if !matches!(self.state, State::AwaitingDecision(_)) {
            tracing::warn!(target: "agentflow.hierarchical", "manager decision arrived unprompted");
            return Ok(());
        }
        if decision.action == ManagerAction::Stop {
            tracing::info!(target: "agentflow.hierarchical", rounds = self.rounds, "manager stopped the run");
            self.routes.push(RouteRecord {
                from: self.manager_task,
                to: None,
                reason: "manager stop".to_string(),
            });
            self.finish(TaskStatus::Completed);
            return Ok(());
        }

        let Some(id) = decision.task_id else {
            self.state = State::Done;
            return Err(ExecutorError::ManagerChoiceMissing);
        };
        if id == self.manager_task || !self.table.contains(id) {
            self.state = State::Done;
            return Err(ExecutorError::InvalidManagerChoice(id));
        }

        let wanted = decision.agent_name.trim();
        if !wanted.is_empty() && self.agents.iter().any(|a| a == wanted) {
            self.table.with_task_mut(id, |t| {
                if t.agent.as_deref() != Some(wanted) {
                    tracing::debug!(target: "agentflow.hierarchical", task_id = id, agent = wanted, "rebinding task");
                    t.agent = Some(wanted.to_string());
                }
            });
        }

        self.routes.push(RouteRecord {
            from: self.manager_task,
            to: Some(id),
            reason: format!("manager round {}", self.rounds),
        });
        self.state = if self.table.status(id) == Some(TaskStatus::Completed) {
            State::Consult
        } else {
            State::Dispatch(id)
        };
        Ok(())
    }

    fn drain_routes(&mut self) -> Vec<RouteRecord> {
        std::mem::take(&mut self.routes)
    }

    fn routing_depends_on_outcome(&self, _id: TaskId) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TaskTable, HierarchicalScheduler) {
        let table = TaskTable::new();
        table
            .insert(Task::builder("research").name("research").agent("analyst").build())
            .unwrap();
        table
            .insert(Task::builder("write").name("write").agent("writer").build())
            .unwrap();
        let s = HierarchicalScheduler::new(
            table.clone(),
            vec!["analyst".into(), "writer".into()],
            "boss".into(),
            5,
        )
        .unwrap();
        (table, s)
    }

    fn consult(s: &mut HierarchicalScheduler) -> ManagerQuery {
        match s.next_step().unwrap() {
            Step::Consult(q) => q,
            other => panic!("expected consult, got {other:?}"),
        }
    }

    #[test]
    fn stop_ends_with_tasks_outstanding() {
        let (table, mut s) = setup();
        let q = consult(&mut s);
        assert_eq!(q.tasks.len(), 2);
        s.accept_decision(ManagerInstructions::stop()).unwrap();
        assert_eq!(s.next_step().unwrap(), Step::Finished);
        assert_eq!(table.status(s.manager_task()), Some(TaskStatus::Completed));
        assert_eq!(table.status(0), Some(TaskStatus::NotStarted));
    }

    #[test]
    fn executes_choice_and_rebinds_agent() {
        let (table, mut s) = setup();
        consult(&mut s);
        s.accept_decision(ManagerInstructions::execute(1, "analyst"))
            .unwrap();
        assert_eq!(s.next_step().unwrap(), Step::Execute(1));
        assert_eq!(table.with_task(1, |t| t.agent.clone()).flatten().as_deref(), Some("analyst"));
        table.mark_completed(1);

        let q = consult(&mut s);
        assert_eq!(q.round, 2);
        assert_eq!(s.completed_count(), 1);
        s.accept_decision(ManagerInstructions::execute(0, "ghost")).unwrap();
        assert_eq!(s.next_step().unwrap(), Step::Execute(0));
        assert_eq!(table.with_task(0, |t| t.agent.clone()).flatten().as_deref(), Some("analyst"));
        table.mark_completed(0);
        assert_eq!(s.next_step().unwrap(), Step::Finished);
        assert_eq!(table.status(s.manager_task()), Some(TaskStatus::Completed));
    }

    #[test]
    fn unknown_or_manager_id_is_rejected() {
        let (_table, mut s) = setup();
        consult(&mut s);
        let manager = s.manager_task();
        let err = s
            .accept_decision(ManagerInstructions::execute(manager, ""))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidManagerChoice(id) if id == manager));
        assert_eq!(s.next_step().unwrap(), Step::Finished);
    }

    #[test]
    fn execute_without_task_id_is_rejected() {
        let (_table, mut s) = setup();
        consult(&mut s);
        let bare = ManagerInstructions {
            task_id: None,
            agent_name: "analyst".into(),
            action: ManagerAction::Execute,
        };
        let err = s.accept_decision(bare).unwrap_err();
        assert!(matches!(err, ExecutorError::ManagerChoiceMissing));
        assert_eq!(s.next_step().unwrap(), Step::Finished);
    }

    #[test]
    fn round_ceiling_fails_manager_task() {
        let (table, mut s) = setup();
        for _ in 0..5 {
            consult(&mut s);
            // Never completes: the manager keeps picking a task that stays incomplete.
            s.accept_decision(ManagerInstructions::execute(0, "")).unwrap();
            assert_eq!(s.next_step().unwrap(), Step::Execute(0));
        }
        assert_eq!(s.next_step().unwrap(), Step::Finished);
        assert_eq!(table.status(s.manager_task()), Some(TaskStatus::Failed));
    }

    #[test]
    fn manager_name_avoids_collisions() {
        let table = TaskTable::new();
        table
            .insert(Task::builder("x").name(MANAGER_TASK_NAME).build())
            .unwrap();
        let s = HierarchicalScheduler::new(table.clone(), vec![], "boss".into(), 3).unwrap();
        assert_eq!(table.name_of(s.manager_task()).as_deref(), Some("manager_task_1"));
    }
}
