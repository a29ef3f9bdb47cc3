use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;

use agentflow_core::memory::{Knowledge, KnowledgeHit};
use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    /// Restricts the document to one user; shared when unset.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// In-memory knowledge base ranked by keyword overlap with the query.
pub struct KeywordKnowledge {
    docs: RwLock<Vec<KnowledgeDocument>>,
    limit: usize,
}

impl KeywordKnowledge {
    pub fn new(limit: usize) -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            limit: limit.max(1),
        }
    }

    /// Load documents from a JSON array file.
    pub fn from_file(path: &Path, limit: usize) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read knowledge file {}", path.display()))?;
        let docs: Vec<KnowledgeDocument> = serde_json::from_str(&raw)
            .with_context(|| format!("parse knowledge file {}", path.display()))?;
        let kb = Self::new(limit);
        for doc in docs {
            kb.add(doc);
        }
        Ok(kb)
    }

    pub fn add(&self, doc: KnowledgeDocument) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.push(doc);
    }

    pub fn add_text(&self, text: impl Into<String>, source: Option<&str>) {
        self.add(KnowledgeDocument {
            text: text.into(),
            source: source.map(str::to_string),
            user_id: None,
        });
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of query keywords present in `text`.
pub(crate) fn overlap(query: &HashSet<String>, text: &str) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let words = keywords(text);
    let shared = query.iter().filter(|w| words.contains(*w)).count();
    shared as f32 / query.len() as f32
}

impl Knowledge for KeywordKnowledge {
    fn name(&self) -> &str {
        "keyword"
    }

    fn search(&self, query: &str, user_id: Option<&str>) -> anyhow::Result<Vec<KnowledgeHit>> {
        let terms = keywords(query);
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<KnowledgeHit> = docs
            .iter()
            .filter(|d| d.user_id.is_none() || d.user_id.as_deref() == user_id)
            .filter_map(|d| {
                let score = overlap(&terms, &d.text);
                (score > 0.0).then(|| KnowledgeHit {
                    text: d.text.clone(),
                    score,
                    source: d.source.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.limit);
        tracing::debug!(target: "agentflow.knowledge", query, hits = hits.len(), "keyword search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ranks_by_overlap_and_limits() {
        let kb = KeywordKnowledge::new(2);
        kb.add_text("Tokio is an async runtime for Rust", Some("tokio.md"));
        kb.add_text("Serde serializes Rust data structures", None);
        kb.add_text("Gardening tips for spring", None);

        let hits = kb.search("async Rust runtime", None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source.as_deref(), Some("tokio.md"));
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn private_documents_need_matching_user() {
        let kb = KeywordKnowledge::new(5);
        kb.add(KnowledgeDocument {
            text: "alice prefers terse reports".into(),
            source: None,
            user_id: Some("alice".into()),
        });
        assert!(kb.search("terse reports", None).unwrap().is_empty());
        assert!(kb.search("terse reports", Some("bob")).unwrap().is_empty());
        assert_eq!(kb.search("terse reports", Some("alice")).unwrap().len(), 1);
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"text": "workflow engines route tasks"}}]"#).unwrap();
        let kb = KeywordKnowledge::from_file(file.path(), 3).unwrap();
        assert_eq!(kb.len(), 1);
        assert_eq!(kb.search("route", None).unwrap()[0].text, "workflow engines route tasks");
    }
}
