use agentflow_core::hooks::{EngineEvent, EventHandler, EventKind};

/// Prints one human-readable line per engine event to stdout.
pub struct TextRendererPlugin {
    ascii_only: bool,
}

impl TextRendererPlugin {
    pub fn new(ascii_only: bool) -> Self {
        Self { ascii_only }
    }

    pub fn format_event(&self, event: &EngineEvent) -> String {
        let label = match event.kind {
            EventKind::TaskStart => "TASK START",
            EventKind::TaskComplete => {
                if self.ascii_only {
                    "OK"
                } else {
                    "TASK COMPLETE"
                }
            }
            EventKind::Error => {
                if self.ascii_only {
                    "FAIL"
                } else {
                    "ERROR"
                }
            }
            EventKind::Routing => "ROUTE",
            EventKind::Interaction => "CHAT",
            EventKind::ToolCall => "TOOL",
        };

        let mut line = format!("{} {}", label, event.run_id);
        match (event.task_id, event.task_name.as_deref()) {
            (Some(id), Some(name)) => line.push_str(&format!(" (task {}: {})", id, name)),
            (Some(id), None) => line.push_str(&format!(" (task {})", id)),
            _ => {}
        }
        if let Some(agent) = &event.agent {
            line.push_str(&format!(" [{}]", agent));
        }
        // Interaction messages carry whole transcripts; keep the line short.
        if !event.message.is_empty() && event.kind != EventKind::Interaction {
            line.push_str(&format!(": {}", event.message));
        }

        if self.ascii_only {
            line.chars()
                .map(|c| if c.is_ascii() { c } else { '?' })
                .collect()
        } else {
            line
        }
    }
}

impl EventHandler for TextRendererPlugin {
    fn name(&self) -> &str {
        "text"
    }

    fn handle(&self, event: &EngineEvent) {
        println!("{}", self.format_event(event));
    }
}
