//! Append-only long-term memory kept in a JSON-lines file.
//!
//! Each completed task becomes one [`MemoryRecord`] line. Recall scores stored
//! records by keyword overlap with the new task's description and returns the
//! best matches as a context block.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use agentflow_core::memory::{Memory, MemoryRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::knowledge::keyword::{keywords, overlap};

pub struct JsonlMemoryStore {
    path: PathBuf,
    search_limit: usize,
    min_score: f32,
    // Serializes appends from the blocking path.
    write_lock: Mutex<()>,
}

impl JsonlMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            search_limit: 3,
            min_score: 0.2,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    pub fn with_min_score(mut self, score: f32) -> Self {
        self.min_score = score;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records readable from the file; malformed lines are skipped.
    pub fn records(&self) -> Result<Vec<MemoryRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read memory {}", self.path.display()))
            }
        };
        Ok(parse_records(&raw))
    }

    fn recall(&self, records: Vec<MemoryRecord>, description: &str, user_id: Option<&str>) -> String {
        let terms = keywords(description);
        let mut scored: Vec<(f32, MemoryRecord)> = records
            .into_iter()
            .filter(|r| user_id.is_none() || r.user_id.as_deref() == user_id)
            .map(|r| (overlap(&terms, &r.text), r))
            .filter(|(score, _)| *score >= self.min_score && *score > 0.0)
            .collect();
        // Newest first among equal scores.
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        scored.truncate(self.search_limit);
        if scored.is_empty() {
            return String::new();
        }

        let mut out = String::from("Relevant memories:");
        for (_, rec) in &scored {
            out.push_str(&format!("\n- [{}] {}", rec.task_name, rec.text.trim()));
        }
        out
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

fn parse_records(raw: &str) -> Vec<MemoryRecord> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str::<MemoryRecord>(l) {
            Ok(rec) => Some(rec),
            Err(e) => {
                tracing::warn!(target: "agentflow.memory", error = %e, "skipping malformed memory line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Memory for JsonlMemoryStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn build_context_for_task(&self, description: &str, user_id: Option<&str>) -> Result<String> {
        let records = self.records()?;
        Ok(self.recall(records, description, user_id))
    }

    fn store_long_term(&self, record: &MemoryRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_parent()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open memory {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        tracing::debug!(target: "agentflow.memory", task = %record.task_name, "stored memory");
        Ok(())
    }

    async fn abuild_context_for_task(
        &self,
        description: &str,
        user_id: Option<&str>,
    ) -> Result<String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read memory {}", self.path.display()))
            }
        };
        Ok(self.recall(parse_records(&raw), description, user_id))
    }

    async fn astore_long_term(&self, record: &MemoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.ensure_parent()?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open memory {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use agentflow_core::task::TaskOutput;

    fn record(name: &str, text: &str, user: Option<&str>) -> MemoryRecord {
        MemoryRecord::from_output(0, name, &TaskOutput::new("d", text, "writer"), user)
    }

    #[test]
    fn stores_and_recalls_by_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMemoryStore::new(dir.path().join("mem/records.jsonl"));
        store.store_long_term(&record("prices", "Quarterly pricing review for widgets", None)).unwrap();
        store.store_long_term(&record("garden", "Planting tomatoes in spring", None)).unwrap();

        let ctx = store.build_context_for_task("Update the widgets pricing", None).unwrap();
        assert!(ctx.starts_with("Relevant memories:"));
        assert!(ctx.contains("[prices] Quarterly pricing review for widgets"));
        assert!(!ctx.contains("tomatoes"));
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn missing_file_and_no_match_give_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMemoryStore::new(dir.path().join("none.jsonl"));
        assert_eq!(store.build_context_for_task("anything at all", None).unwrap(), "");
    }

    #[test]
    fn recall_is_scoped_to_the_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMemoryStore::new(dir.path().join("m.jsonl"));
        store.store_long_term(&record("a", "alice budget notes", Some("alice"))).unwrap();
        assert_eq!(store.build_context_for_task("budget notes", Some("bob")).unwrap(), "");
        assert!(store
            .build_context_for_task("budget notes", Some("alice"))
            .unwrap()
            .contains("alice budget notes"));
    }

    #[tokio::test]
    async fn async_path_reads_blocking_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMemoryStore::new(dir.path().join("m.jsonl"));
        store.astore_long_term(&record("deploy", "deploy checklist for staging", None)).await.unwrap();
        store.store_long_term(&record("other", "unrelated", None)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(store.path())
            .and_then(|mut f| writeln!(f, "not json"))
            .unwrap();

        let ctx = store.abuild_context_for_task("staging deploy", None).await.unwrap();
        assert!(ctx.contains("deploy checklist"));
        assert_eq!(store.records().unwrap().len(), 2);
    }
}
