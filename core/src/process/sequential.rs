use super::{ProcessKind, Scheduler, Step};
use crate::error::ExecutorError;
use crate::task::{TaskId, TaskStatus, TaskTable};

/// Yields every task not yet completed, in table order.
pub struct SequentialScheduler {
    table: TaskTable,
    order: Vec<TaskId>,
    cursor: usize,
}

impl SequentialScheduler {
    pub fn new(table: TaskTable) -> Self {
        let order = table.ids();
        Self {
            table,
            order,
            cursor: 0,
        }
    }
}

impl Scheduler for SequentialScheduler {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Sequential
    }

    fn next_step(&mut self) -> Result<Step, ExecutorError> {
        while let Some(&id) = self.order.get(self.cursor) {
            self.cursor += 1;
            if self.table.status(id) != Some(TaskStatus::Completed) {
                return Ok(Step::Execute(id));
            }
        }
        Ok(Step::Finished)
    }
}
