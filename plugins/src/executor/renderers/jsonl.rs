use agentflow_core::hooks::{EngineEvent, EventHandler};
use serde_json::{json, Value};

/// Prints each engine event as a versioned JSON object.
pub struct JsonlRendererPlugin {
    pretty_print: bool,
}

impl JsonlRendererPlugin {
    pub fn new(pretty_print: bool) -> Self {
        Self { pretty_print }
    }

    pub fn event_to_json(&self, event: &EngineEvent) -> Value {
        let mut obj = json!({
            "v": 1,
            "event_type": format!("task.{}", event.kind.as_str()),
            "ts": event.ts.to_rfc3339(),
            "run_id": event.run_id,
            "message": event.message,
        });
        if let Some(map) = obj.as_object_mut() {
            if let Some(id) = event.task_id {
                map.insert("task_id".into(), json!(id));
            }
            if let Some(name) = &event.task_name {
                map.insert("task_name".into(), json!(name));
            }
            if let Some(agent) = &event.agent {
                map.insert("agent".into(), json!(agent));
            }
            if let Some(payload) = &event.payload {
                map.insert("metadata".into(), payload.clone());
            }
        }
        obj
    }
}

impl EventHandler for JsonlRendererPlugin {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn handle(&self, event: &EngineEvent) {
        let json = self.event_to_json(event);
        let line = if self.pretty_print {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        };
        println!("{}", line.unwrap_or_else(|_| "{}".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::hooks::EventKind;

    #[test]
    fn event_shape() {
        let event = EngineEvent::new(EventKind::Routing, "run-7", "decision 'approve'")
            .with_task(0, "review")
            .with_payload(json!({"targets": ["finish"]}));
        let value = JsonlRendererPlugin::new(false).event_to_json(&event);
        assert_eq!(value["v"], 1);
        assert_eq!(value["event_type"], "task.routing");
        assert_eq!(value["run_id"], "run-7");
        assert_eq!(value["task_id"], 0);
        assert_eq!(value["task_name"], "review");
        assert_eq!(value["metadata"]["targets"][0], "finish");
        assert!(value.get("agent").is_none());
    }
}
