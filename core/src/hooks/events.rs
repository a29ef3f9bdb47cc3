use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskId;

/// Named event channels a host can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Interaction,
    ToolCall,
    Error,
    TaskStart,
    TaskComplete,
    Routing,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Interaction,
        Self::ToolCall,
        Self::Error,
        Self::TaskStart,
        Self::TaskComplete,
        Self::Routing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::ToolCall => "tool_call",
            Self::Error => "error",
            Self::TaskStart => "task_start",
            Self::TaskComplete => "task_complete",
            Self::Routing => "routing",
        }
    }
}

/// Record passed to every event handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub ts: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EventKind, run_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            task_id: None,
            task_name: None,
            agent: None,
            message: message.into(),
            payload: None,
            ts: Utc::now(),
        }
    }

    pub fn with_task(mut self, id: TaskId, name: impl Into<String>) -> Self {
        self.task_id = Some(id);
        self.task_name = Some(name.into());
        self
    }

    pub fn with_agent(mut self, agent: Option<&str>) -> Self {
        self.agent = agent.map(str::to_string);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str {
        "handler"
    }

    fn handle(&self, event: &EngineEvent);
}

#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: &EngineEvent);
}

struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn handle(&self, event: &EngineEvent) {
        (self.0)(event)
    }
}

#[derive(Clone)]
enum Registered {
    Sync(Arc<dyn EventHandler>),
    Async(Arc<dyn AsyncEventHandler>),
}

/// Handlers keyed by event kind.
///
/// Both handler flavors fire on both execution paths; async handlers reached
/// from the blocking path are driven to completion in place.
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Registered>>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: EventKind, handler: Registered) {
        let mut map = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(kind).or_default().push(handler);
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<Registered> {
        let map = match self.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&kind).cloned().unwrap_or_default()
    }

    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.push(kind, Registered::Sync(handler));
    }

    pub fn register_async(&self, kind: EventKind, handler: Arc<dyn AsyncEventHandler>) {
        self.push(kind, Registered::Async(handler));
    }

    pub fn register_fn<F>(&self, kind: EventKind, f: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(FnHandler(f)));
    }

    /// Subscribe one handler to every event kind.
    pub fn register_all(&self, handler: Arc<dyn EventHandler>) {
        for kind in EventKind::ALL {
            self.register(kind, handler.clone());
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers_for(kind).len()
    }

    pub fn emit(&self, event: &EngineEvent) {
        for handler in self.handlers_for(event.kind) {
            match handler {
                Registered::Sync(h) => h.handle(event),
                Registered::Async(h) => futures::executor::block_on(h.handle(event)),
            }
        }
    }

    pub async fn aemit(&self, event: &EngineEvent) {
        for handler in self.handlers_for(event.kind) {
            match handler {
                Registered::Sync(h) => h.handle(event),
                Registered::Async(h) => h.handle(event).await,
            }
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<(&str, usize)> = EventKind::ALL
            .iter()
            .map(|k| (k.as_str(), self.handler_count(*k)))
            .filter(|(_, n)| *n > 0)
            .collect();
        f.debug_struct("EventRegistry").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl AsyncEventHandler for Collect {
        async fn handle(&self, event: &EngineEvent) {
            self.0.lock().unwrap().push(format!("async:{}", event.message));
        }
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let reg = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        reg.register_fn(EventKind::Error, move |e| sink.lock().unwrap().push(e.message.clone()));

        reg.emit(&EngineEvent::new(EventKind::Routing, "run", "route"));
        reg.emit(&EngineEvent::new(EventKind::Error, "run", "boom"));
        assert_eq!(*seen.lock().unwrap(), vec!["boom".to_string()]);
    }

    #[test]
    fn async_handlers_fire_from_blocking_emit() {
        let reg = EventRegistry::new();
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        reg.register_async(EventKind::Interaction, collect.clone());
        reg.emit(&EngineEvent::new(EventKind::Interaction, "run", "hi"));
        assert_eq!(*collect.0.lock().unwrap(), vec!["async:hi".to_string()]);
    }

    #[tokio::test]
    async fn aemit_awaits_async_handlers() {
        let reg = EventRegistry::new();
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        reg.register_async(EventKind::TaskComplete, collect.clone());
        reg.aemit(&EngineEvent::new(EventKind::TaskComplete, "run", "done").with_task(2, "b"))
            .await;
        assert_eq!(*collect.0.lock().unwrap(), vec!["async:done".to_string()]);
    }

    #[test]
    fn event_serializes_without_empty_fields() {
        let ev = EngineEvent::new(EventKind::ToolCall, "r1", "search");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "tool_call");
        assert!(json.get("task_id").is_none());
    }
}
