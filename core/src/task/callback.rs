use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::output::TaskOutput;
use super::task::TaskMetadata;

/// Callback receiving only the task output.
#[async_trait]
pub trait OutputCallback: Send + Sync {
    fn call(&self, output: &TaskOutput) -> anyhow::Result<()>;

    async fn acall(&self, output: &TaskOutput) -> anyhow::Result<()> {
        self.call(output)
    }
}

/// Callback receiving the output plus a metadata record of the task.
#[async_trait]
pub trait MetadataCallback: Send + Sync {
    fn call(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()>;

    async fn acall(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        self.call(output, metadata)
    }
}

/// Callback invoked after a task is marked completed.
///
/// The variant is chosen at registration time.
#[derive(Clone)]
pub enum TaskCallback {
    Output(Arc<dyn OutputCallback>),
    WithMetadata(Arc<dyn MetadataCallback>),
}

impl TaskCallback {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskOutput) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Output(Arc::new(SyncOutputFn(f)))
    }

    pub fn with_metadata_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskOutput, &TaskMetadata) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::WithMetadata(Arc::new(SyncMetadataFn(f)))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Output(Arc::new(AsyncOutputFn(f)))
    }

    pub fn with_metadata_async<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskOutput, TaskMetadata) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::WithMetadata(Arc::new(AsyncMetadataFn(f)))
    }

    pub fn invoke(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        match self {
            Self::Output(cb) => cb.call(output),
            Self::WithMetadata(cb) => cb.call(output, metadata),
        }
    }

    pub async fn ainvoke(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        match self {
            Self::Output(cb) => cb.acall(output).await,
            Self::WithMetadata(cb) => cb.acall(output, metadata).await,
        }
    }
}

impl std::fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output(_) => f.write_str("TaskCallback::Output"),
            Self::WithMetadata(_) => f.write_str("TaskCallback::WithMetadata"),
        }
    }
}

struct SyncOutputFn<F>(F);

#[async_trait]
impl<F> OutputCallback for SyncOutputFn<F>
where
    F: Fn(&TaskOutput) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, output: &TaskOutput) -> anyhow::Result<()> {
        (self.0)(output)
    }
}

struct SyncMetadataFn<F>(F);

#[async_trait]
impl<F> MetadataCallback for SyncMetadataFn<F>
where
    F: Fn(&TaskOutput, &TaskMetadata) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        (self.0)(output, metadata)
    }
}

// Async callbacks driven from the blocking path run on a local executor.
struct AsyncOutputFn<F>(F);

#[async_trait]
impl<F, Fut> OutputCallback for AsyncOutputFn<F>
where
    F: Fn(TaskOutput) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn call(&self, output: &TaskOutput) -> anyhow::Result<()> {
        futures::executor::block_on((self.0)(output.clone()))
    }

    async fn acall(&self, output: &TaskOutput) -> anyhow::Result<()> {
        (self.0)(output.clone()).await
    }
}

struct AsyncMetadataFn<F>(F);

#[async_trait]
impl<F, Fut> MetadataCallback for AsyncMetadataFn<F>
where
    F: Fn(TaskOutput, TaskMetadata) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn call(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        futures::executor::block_on((self.0)(output.clone(), metadata.clone()))
    }

    async fn acall(&self, output: &TaskOutput, metadata: &TaskMetadata) -> anyhow::Result<()> {
        (self.0)(output.clone(), metadata.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskStatus, TaskType};
    use std::sync::Mutex;

    fn metadata() -> TaskMetadata {
        TaskMetadata {
            task_id: 4,
            name: "summarize".into(),
            agent_name: Some("writer".into()),
            task_type: TaskType::Plain,
            status: TaskStatus::Completed,
            description: "Summarize".into(),
            expected_output: "A summary".into(),
            retry_count: 0,
            async_execution: false,
        }
    }

    #[test]
    fn metadata_variant_receives_task_record() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let cb = TaskCallback::with_metadata_fn(move |_out, meta| {
            *sink.lock().unwrap() = Some(meta.name.clone());
            Ok(())
        });
        cb.invoke(&TaskOutput::new("d", "r", "writer"), &metadata())
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("summarize"));
    }

    #[test]
    fn async_callback_runs_from_blocking_path() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = TaskCallback::from_async(move |out: TaskOutput| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(out.raw);
                Ok(())
            }
        });
        cb.invoke(&TaskOutput::new("d", "done", "writer"), &metadata())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn async_callback_awaits_on_async_path() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = TaskCallback::with_metadata_async(move |out: TaskOutput, meta: TaskMetadata| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(format!("{}:{}", meta.task_id, out.raw));
                Ok(())
            }
        });
        cb.ainvoke(&TaskOutput::new("d", "ok", "writer"), &metadata())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["4:ok".to_string()]);
    }
}
