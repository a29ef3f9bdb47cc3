#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agentflow_core::agent::{Agent, ChatRequest};
use agentflow_core::config::RetryConfig;
use agentflow_core::executor::ExecutionEngineBuilder;
use agentflow_core::hooks::{EngineEvent, EventKind, EventRegistry, TaskHooks};
use agentflow_core::process::ProcessKind;
use agentflow_core::task::{TaskMetadata, TaskOutput};
use async_trait::async_trait;

/// Answers from a queue of canned replies, then repeats `fallback`.
pub struct ScriptedAgent {
    name: String,
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(name: &str, replies: &[&str], fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: fallback.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(request.prompt().to_string());
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Replies with "done: <task name>" and records the task each prompt was for.
pub struct EchoAgent {
    name: String,
    seen: Mutex<Vec<(String, String)>>,
}

impl EchoAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// `(task name, prompt)` in call order.
    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn prompt_for(&self, task: &str) -> Option<String> {
        self.seen()
            .into_iter()
            .rev()
            .find(|(name, _)| name == task)
            .map(|(_, prompt)| prompt)
    }
}

impl Agent for EchoAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let task = request
            .task
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_default();
        self.seen
            .lock()
            .unwrap()
            .push((task.clone(), request.prompt().to_string()));
        Ok(format!("done: {task}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Start,
    End,
}

/// Sleeps for `delay` on every call and timestamps start and end per task.
pub struct TimedAgent {
    delay: Duration,
    log: Mutex<Vec<(String, Mark, Instant)>>,
}

impl TimedAgent {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            log: Mutex::new(Vec::new()),
        })
    }

    fn mark(&self, request: &ChatRequest, mark: Mark) -> String {
        let task = request
            .task
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_default();
        self.log.lock().unwrap().push((task.clone(), mark, Instant::now()));
        task
    }

    pub fn at(&self, task: &str, mark: Mark) -> Instant {
        self.log
            .lock()
            .unwrap()
            .iter()
            .find(|(t, m, _)| t == task && *m == mark)
            .map(|(_, _, at)| *at)
            .unwrap_or_else(|| panic!("no {mark:?} recorded for {task}"))
    }
}

#[async_trait]
impl Agent for TimedAgent {
    fn name(&self) -> &str {
        "timed"
    }

    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let task = self.mark(request, Mark::Start);
        std::thread::sleep(self.delay);
        self.mark(request, Mark::End);
        Ok(format!("{task} finished"))
    }

    async fn achat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let task = self.mark(request, Mark::Start);
        tokio::time::sleep(self.delay).await;
        self.mark(request, Mark::End);
        Ok(format!("{task} finished"))
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    pub started: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<(String, String)>>,
}

impl TaskHooks for RecordingHooks {
    fn on_task_start(&self, task: &TaskMetadata) -> anyhow::Result<()> {
        self.started.lock().unwrap().push(task.name.clone());
        Ok(())
    }

    fn on_task_complete(&self, task: &TaskMetadata, output: &TaskOutput) -> anyhow::Result<()> {
        self.completed
            .lock()
            .unwrap()
            .push((task.name.clone(), output.raw.clone()));
        Ok(())
    }
}

/// Registry that keeps every event of the given kinds.
pub fn collecting_events(kinds: &[EventKind]) -> (EventRegistry, Arc<Mutex<Vec<EngineEvent>>>) {
    let registry = EventRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = seen.clone();
        registry.register_fn(*kind, move |ev: &EngineEvent| sink.lock().unwrap().push(ev.clone()));
    }
    (registry, seen)
}

/// Builder with no delay between attempts.
pub fn builder(process: ProcessKind) -> ExecutionEngineBuilder {
    ExecutionEngineBuilder::new()
        .process(process)
        .retry_config(RetryConfig::immediate())
}
