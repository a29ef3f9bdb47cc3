use async_trait::async_trait;

use crate::task::{TaskMetadata, TaskOutput};

/// Host callbacks around each task execution. Failures are logged, never propagated.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    fn on_task_start(&self, _task: &TaskMetadata) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_task_complete(&self, _task: &TaskMetadata, _output: &TaskOutput) -> anyhow::Result<()> {
        Ok(())
    }

    async fn aon_task_start(&self, task: &TaskMetadata) -> anyhow::Result<()> {
        self.on_task_start(task)
    }

    async fn aon_task_complete(
        &self,
        task: &TaskMetadata,
        output: &TaskOutput,
    ) -> anyhow::Result<()> {
        self.on_task_complete(task, output)
    }
}
