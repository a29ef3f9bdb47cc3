use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskOutput};

/// One entry written to long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub text: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub agent: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn from_output(
        task_id: TaskId,
        task_name: &str,
        output: &TaskOutput,
        user_id: Option<&str>,
    ) -> Self {
        Self {
            text: output.to_string(),
            task_id,
            task_name: task_name.to_string(),
            agent: output.agent.clone(),
            user_id: user_id.map(str::to_string),
            created_at: output.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub text: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub source: Option<String>,
}

impl KnowledgeHit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: 0.0,
            source: None,
        }
    }
}

/// Inline search hits into a context fragment.
pub fn render_hits(hits: &[KnowledgeHit]) -> String {
    hits.iter()
        .map(|h| h.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_hits_skips_blank_entries() {
        let hits = vec![
            KnowledgeHit::new("rust is fast"),
            KnowledgeHit::new("   "),
            KnowledgeHit::new("tokio schedules tasks\n"),
        ];
        assert_eq!(render_hits(&hits), "rust is fast\ntokio schedules tasks");
    }

    #[test]
    fn record_captures_stringified_output() {
        let mut out = TaskOutput::new("d", "raw", "writer");
        out.json_dict = Some(serde_json::json!({"a": 1}));
        let rec = MemoryRecord::from_output(3, "draft", &out, Some("u1"));
        assert!(rec.text.contains("\"a\": 1"));
        assert_eq!(rec.user_id.as_deref(), Some("u1"));
        assert_eq!(rec.agent, "writer");
    }
}
