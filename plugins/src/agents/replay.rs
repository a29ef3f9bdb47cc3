//! Agent that answers from a recorded transcript instead of a model.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use agentflow_core::agent::{Agent, ChatRequest};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One recorded reply. Entries with a `task` are matched by task name;
/// the rest are handed out in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    #[serde(default)]
    pub task: Option<String>,
    pub response: String,
}

#[derive(Default)]
struct Transcript {
    by_task: HashMap<String, VecDeque<String>>,
    queue: VecDeque<String>,
}

pub struct ReplayAgent {
    name: String,
    role: String,
    transcript: Mutex<Transcript>,
    fallback: Option<String>,
}

impl ReplayAgent {
    pub fn new(name: impl Into<String>, entries: Vec<ReplayEntry>) -> Self {
        let mut transcript = Transcript::default();
        for entry in entries {
            match entry.task {
                Some(task) => transcript
                    .by_task
                    .entry(task)
                    .or_default()
                    .push_back(entry.response),
                None => transcript.queue.push_back(entry.response),
            }
        }
        Self {
            name: name.into(),
            role: String::new(),
            transcript: Mutex::new(transcript),
            fallback: None,
        }
    }

    /// Read a transcript: JSON lines of [`ReplayEntry`], or plain text lines.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read transcript {}", path.display()))?;
        let entries = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str::<ReplayEntry>(l).unwrap_or_else(|_| ReplayEntry {
                    task: None,
                    response: l.to_string(),
                })
            })
            .collect();
        Ok(Self::new(name, entries))
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Reply used once the transcript runs dry.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn remaining(&self) -> usize {
        let t = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        t.queue.len() + t.by_task.values().map(VecDeque::len).sum::<usize>()
    }
}

impl Agent for ReplayAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn chat(&self, request: &ChatRequest) -> Result<String> {
        let mut t = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        let task = request.task.as_ref().map(|m| m.name.as_str());
        let keyed = task.and_then(|name| t.by_task.get_mut(name).and_then(VecDeque::pop_front));
        if let Some(reply) = keyed.or_else(|| t.queue.pop_front()) {
            return Ok(reply);
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => anyhow::bail!(
                "transcript for agent '{}' exhausted{}",
                self.name,
                task.map(|n| format!(" at task '{n}'")).unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use agentflow_core::task::Task;
    use std::io::Write;

    #[test]
    fn keyed_replies_win_over_the_queue() {
        let agent = ReplayAgent::new(
            "writer",
            vec![
                ReplayEntry { task: None, response: "first".into() },
                ReplayEntry { task: Some("summary".into()), response: "short".into() },
            ],
        );
        let mut keyed = ChatRequest::text("summarize");
        keyed.task = Some(Task::builder("Summarize").name("summary").build().metadata());
        assert_eq!(agent.chat(&keyed).unwrap(), "short");
        assert_eq!(agent.chat(&keyed).unwrap(), "first");
        assert!(agent.chat(&ChatRequest::text("again")).is_err());
        assert_eq!(agent.remaining(), 0);
    }

    #[test]
    fn file_mixes_json_and_plain_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "plain reply\n\n{{\"response\": \"json reply\"}}").unwrap();
        let agent = ReplayAgent::from_file("w", file.path())
            .unwrap()
            .with_fallback("fallback");
        let req = ChatRequest::text("p");
        assert_eq!(agent.chat(&req).unwrap(), "plain reply");
        assert_eq!(agent.chat(&req).unwrap(), "json reply");
        assert_eq!(agent.chat(&req).unwrap(), "fallback");
    }
}
