use async_trait::async_trait;

use super::types::{KnowledgeHit, MemoryRecord};

/// Long-term memory consulted before a task runs and written after it completes.
#[async_trait]
pub trait Memory: Send + Sync {
    fn name(&self) -> &str;

    /// Prior material relevant to a task description; empty when nothing matches.
    fn build_context_for_task(
        &self,
        description: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<String>;

    fn store_long_term(&self, record: &MemoryRecord) -> anyhow::Result<()>;

    async fn abuild_context_for_task(
        &self,
        description: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<String> {
        self.build_context_for_task(description, user_id)
    }

    async fn astore_long_term(&self, record: &MemoryRecord) -> anyhow::Result<()> {
        self.store_long_term(record)
    }
}

/// Searchable knowledge base behind `ContextItem::Knowledge`.
#[async_trait]
pub trait Knowledge: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, query: &str, user_id: Option<&str>) -> anyhow::Result<Vec<KnowledgeHit>>;

    async fn asearch(
        &self,
        query: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<Vec<KnowledgeHit>> {
        self.search(query, user_id)
    }
}
