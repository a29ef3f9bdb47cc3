//! Prompt context assembly from a task's context items.

use std::collections::HashSet;
use std::sync::Arc;

use super::table::TaskTable;
use super::types::{ContextItem, KnowledgeQuery, TaskRef, TaskStatus};
use crate::memory::{render_hits, Knowledge};

/// Resolves context items against the live task table.
///
/// Must not be called while holding a task lock: task references lock the
/// referenced task.
pub struct ContextResolver<'a> {
    table: &'a TaskTable,
    knowledge: Option<&'a Arc<dyn Knowledge>>,
    user_id: Option<&'a str>,
}

impl<'a> ContextResolver<'a> {
    pub fn new(table: &'a TaskTable) -> Self {
        Self {
            table,
            knowledge: None,
            user_id: None,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Option<&'a Arc<dyn Knowledge>>) -> Self {
        self.knowledge = knowledge;
        self
    }

    /// Fallback user for knowledge queries that do not name one.
    pub fn with_user(mut self, user_id: Option<&'a str>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Resolve `items` into one deduplicated block.
    ///
    /// Without `retain_full`, only the last item contributes.
    pub fn resolve(&self, items: &[ContextItem], retain_full: bool) -> String {
        let parts = selected(items, retain_full)
            .iter()
            .map(|item| self.resolve_item(item))
            .collect();
        join_unique(parts)
    }

    pub async fn aresolve(&self, items: &[ContextItem], retain_full: bool) -> String {
        let mut parts = Vec::new();
        for item in selected(items, retain_full) {
            parts.push(self.aresolve_item(item).await);
        }
        join_unique(parts)
    }

    pub fn resolve_item(&self, item: &ContextItem) -> String {
        match item {
            ContextItem::Knowledge(query) => {
                let Some(kb) = self.knowledge else {
                    return String::new();
                };
                let user = query.user_id.as_deref().or(self.user_id);
                knowledge_text(query, kb.search(&query.query, user))
            }
            other => self.resolve_local(other),
        }
    }

    pub async fn aresolve_item(&self, item: &ContextItem) -> String {
        match item {
            ContextItem::Knowledge(query) => {
                let Some(kb) = self.knowledge else {
                    return String::new();
                };
                let user = query.user_id.as_deref().or(self.user_id);
                knowledge_text(query, kb.asearch(&query.query, user).await)
            }
            other => self.resolve_local(other),
        }
    }

    fn resolve_local(&self, item: &ContextItem) -> String {
        match item {
            ContextItem::Text(text) => text.clone(),
            ContextItem::List(values) => values.join(" "),
            ContextItem::Task(reference) => self.task_result(reference),
            ContextItem::Knowledge(_) => String::new(),
        }
    }

    fn task_result(&self, reference: &TaskRef) -> String {
        let Some(id) = self.table.resolve(reference) else {
            tracing::debug!(target: "agentflow.context", reference = ?reference, "context task not found");
            return String::new();
        };
        self.table
            .with_task(id, |t| match (&t.status, &t.result) {
                (TaskStatus::Completed, Some(result)) => result.raw.clone(),
                _ => String::new(),
            })
            .unwrap_or_default()
    }
}

fn selected(items: &[ContextItem], retain_full: bool) -> &[ContextItem] {
    if retain_full || items.len() <= 1 {
        items
    } else {
        &items[items.len() - 1..]
    }
}

fn knowledge_text(
    query: &KnowledgeQuery,
    result: anyhow::Result<Vec<crate::memory::KnowledgeHit>>,
) -> String {
    match result {
        Ok(hits) => render_hits(&hits),
        Err(e) => {
            tracing::warn!(target: "agentflow.context", query = %query.query, error = %e, "knowledge search failed");
            String::new()
        }
    }
}

/// Join non-empty fragments with blank lines, keeping the first occurrence of each.
pub fn join_unique(parts: Vec<String>) -> String {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for part in parts {
        let trimmed = part.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        kept.push(trimmed.to_string());
    }
    kept.join("\n\n")
}
