//! Manager decisions for the hierarchical process.
//!
//! A [`DecisionParser`] tries its strategies in order and returns the first
//! typed answer; the typed request goes first, then a plain-text request with
//! the schema spelled out in the prompt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{Agent, ChatRequest, ResponseFormat};
use crate::error::DecisionParseError;
use crate::task::{clean_json_output, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerAction {
    Execute,
    Stop,
}

/// The manager's choice for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerInstructions {
    /// Only meaningful for `execute`; a bare `stop` may omit it.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub agent_name: String,
    pub action: ManagerAction,
}

impl ManagerInstructions {
    pub fn execute(task_id: TaskId, agent_name: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id),
            agent_name: agent_name.into(),
            action: ManagerAction::Execute,
        }
    }

    pub fn stop() -> Self {
        Self {
            task_id: None,
            agent_name: String::new(),
            action: ManagerAction::Stop,
        }
    }

    pub fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "minimum": 0 },
                "agent_name": { "type": "string" },
                "action": { "type": "string", "enum": ["execute", "stop"] }
            },
            "required": ["action"]
        })
    }
}

/// Compact status line for one task shown to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub agent: Option<String>,
}

/// What the hierarchical scheduler asks the manager each round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerQuery {
    pub round: usize,
    pub manager_task: TaskId,
    pub agents: Vec<String>,
    pub tasks: Vec<TaskSummary>,
}

impl ManagerQuery {
    pub fn prompt(&self) -> String {
        let summary = serde_json::to_string_pretty(&self.tasks).unwrap_or_default();
        format!(
            "Here is the current status of all tasks except yours (manager_task):\n{summary}\n\n\
             Available agents: {}\n\n\
             Provide a JSON with the structure:\n\
             {{\n  \"task_id\": <int>,\n  \"agent_name\": \"<string>\",\n  \"action\": \"<execute or stop>\"\n}}",
            self.agents.join(", ")
        )
    }
}

/// One way of obtaining [`ManagerInstructions`] from an agent.
pub trait DecisionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn request(&self, prompt: &str) -> ChatRequest;

    fn parse(&self, raw: &str) -> Result<ManagerInstructions, DecisionParseError>;
}

/// Ask for the typed reply through the agent's structured-output channel.
pub struct TypedParse;

impl DecisionStrategy for TypedParse {
    fn name(&self) -> &'static str {
        "typed"
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        ChatRequest::text(prompt).with_response_format(ResponseFormat {
            name: "ManagerInstructions".to_string(),
            schema: ManagerInstructions::schema(),
        })
    }

    fn parse(&self, raw: &str) -> Result<ManagerInstructions, DecisionParseError> {
        serde_json::from_str(raw.trim()).map_err(|e| DecisionParseError::InvalidJson {
            strategy: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Plain-text request with the schema in the prompt; the JSON is dug out of the reply.
pub struct SchemaPromptedJsonParse;

impl DecisionStrategy for SchemaPromptedJsonParse {
    fn name(&self) -> &'static str {
        "schema_prompted"
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        let schema = serde_json::to_string_pretty(&ManagerInstructions::schema()).unwrap_or_default();
        ChatRequest::text(format!(
            "{prompt}\n\nIMPORTANT: Respond with valid JSON only, using this exact schema:\n{schema}"
        ))
    }

    fn parse(&self, raw: &str) -> Result<ManagerInstructions, DecisionParseError> {
        let cleaned = clean_json_output(raw);
        if !cleaned.starts_with('{') {
            return Err(DecisionParseError::NoJsonObject {
                strategy: self.name().to_string(),
            });
        }
        serde_json::from_str(&cleaned).map_err(|e| DecisionParseError::InvalidJson {
            strategy: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

pub struct DecisionParser {
    strategies: Vec<Box<dyn DecisionStrategy>>,
}

impl Default for DecisionParser {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(TypedParse), Box::new(SchemaPromptedJsonParse)],
        }
    }
}

impl DecisionParser {
    pub fn new(strategies: Vec<Box<dyn DecisionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn decide_blocking(
        &self,
        agent: &dyn Agent,
        query: &ManagerQuery,
    ) -> Result<ManagerInstructions, DecisionParseError> {
        let prompt = query.prompt();
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            let attempt = agent
                .chat(&strategy.request(&prompt))
                .map_err(|e| agent_error(strategy.as_ref(), e))
                .and_then(|raw| strategy.parse(&raw));
            match attempt {
                Ok(instructions) => return Ok(instructions),
                Err(e) => {
                    tracing::warn!(target: "agentflow.hierarchical", strategy = strategy.name(), error = %e, "manager decision attempt failed");
                    failures.push(e.to_string());
                }
            }
        }
        Err(DecisionParseError::Exhausted(failures.join("; ")))
    }

    pub async fn decide(
        &self,
        agent: &dyn Agent,
        query: &ManagerQuery,
    ) -> Result<ManagerInstructions, DecisionParseError> {
        let prompt = query.prompt();
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            let attempt = agent
                .achat(&strategy.request(&prompt))
                .await
                .map_err(|e| agent_error(strategy.as_ref(), e))
                .and_then(|raw| strategy.parse(&raw));
            match attempt {
                Ok(instructions) => return Ok(instructions),
                Err(e) => {
                    tracing::warn!(target: "agentflow.hierarchical", strategy = strategy.name(), error = %e, "manager decision attempt failed");
                    failures.push(e.to_string());
                }
            }
        }
        Err(DecisionParseError::Exhausted(failures.join("; ")))
    }
}

fn agent_error(strategy: &dyn DecisionStrategy, e: anyhow::Error) -> DecisionParseError {
    DecisionParseError::AgentCall {
        strategy: strategy.name().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers typed requests with `typed`, plain requests with `plain`.
    struct Manager {
        typed: &'static str,
        plain: &'static str,
        calls: Mutex<Vec<bool>>,
    }

    impl Agent for Manager {
        fn name(&self) -> &str {
            "manager"
        }

        fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
            let typed = request.response_format.is_some();
            self.calls.lock().unwrap().push(typed);
            Ok(if typed { self.typed } else { self.plain }.to_string())
        }
    }

    fn query() -> ManagerQuery {
        ManagerQuery {
            round: 1,
            manager_task: 3,
            agents: vec!["writer".into()],
            tasks: vec![TaskSummary {
                task_id: 0,
                name: "draft".into(),
                description: "Draft".into(),
                status: TaskStatus::NotStarted,
                agent: Some("writer".into()),
            }],
        }
    }

    #[test]
    fn typed_answer_short_circuits() {
        let agent = Manager {
            typed: r#"{"task_id": 0, "agent_name": "writer", "action": "execute"}"#,
            plain: "unused",
            calls: Mutex::new(Vec::new()),
        };
        let got = DecisionParser::default().decide_blocking(&agent, &query()).unwrap();
        assert_eq!(got, ManagerInstructions::execute(0, "writer"));
        assert_eq!(*agent.calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn falls_back_to_schema_prompted_parse() {
        let agent = Manager {
            typed: "I think task zero.",
            plain: "Sure!\n```json\n{\"task_id\": 0, \"agent_name\": \"\", \"action\": \"stop\"}\n```",
            calls: Mutex::new(Vec::new()),
        };
        let got = DecisionParser::default().decide_blocking(&agent, &query()).unwrap();
        assert_eq!(got.action, ManagerAction::Stop);
        assert_eq!(*agent.calls.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn both_failures_exhaust() {
        let agent = Manager {
            typed: "nope",
            plain: "still nope",
            calls: Mutex::new(Vec::new()),
        };
        let err = DecisionParser::default()
            .decide_blocking(&agent, &query())
            .unwrap_err();
        match err {
            DecisionParseError::Exhausted(msg) => {
                assert!(msg.contains("typed"));
                assert!(msg.contains("schema_prompted: response has no JSON object"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_decide_uses_same_strategies() {
        let agent = Manager {
            typed: r#"{"task_id": 2, "agent_name": "w", "action": "execute"}"#,
            plain: "",
            calls: Mutex::new(Vec::new()),
        };
        let got = DecisionParser::default().decide(&agent, &query()).await.unwrap();
        assert_eq!(got.task_id, Some(2));
    }

    #[test]
    fn bare_stop_needs_no_task_id() {
        let agent = Manager {
            typed: r#"{"action": "stop"}"#,
            plain: "unused",
            calls: Mutex::new(Vec::new()),
        };
        let got = DecisionParser::default().decide_blocking(&agent, &query()).unwrap();
        assert_eq!(got, ManagerInstructions::stop());
        assert_eq!(*agent.calls.lock().unwrap(), vec![true]);
        assert_eq!(ManagerInstructions::schema()["required"], serde_json::json!(["action"]));
    }

    #[test]
    fn prompt_lists_tasks_and_agents() {
        let p = query().prompt();
        assert!(p.contains("\"name\": \"draft\""));
        assert!(p.contains("Available agents: writer"));
    }
}
