//! Guardrails written as natural-language criteria, judged by an agent.

use std::sync::Arc;

use agentflow_core::agent::{Agent, ChatRequest, ResponseFormat};
use agentflow_core::task::{
    clean_json_output, Guardrail, GuardrailResolver, GuardrailVerdict, TaskOutput,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Judgement {
    pass: bool,
    #[serde(default)]
    feedback: String,
}

/// Resolves guardrail descriptions into [`LlmGuardrail`]s.
///
/// The judge is the task's own agent unless a dedicated one is configured.
#[derive(Default)]
pub struct LlmGuardrailResolver {
    judge: Option<Arc<dyn Agent>>,
}

impl LlmGuardrailResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judge(judge: Arc<dyn Agent>) -> Self {
        Self { judge: Some(judge) }
    }
}

impl GuardrailResolver for LlmGuardrailResolver {
    fn resolve(&self, description: &str, agent: Option<Arc<dyn Agent>>) -> Arc<dyn Guardrail> {
        Arc::new(LlmGuardrail {
            criteria: description.to_string(),
            judge: self.judge.clone().or(agent),
        })
    }
}

pub struct LlmGuardrail {
    criteria: String,
    judge: Option<Arc<dyn Agent>>,
}

impl LlmGuardrail {
    pub fn new(criteria: impl Into<String>, judge: Arc<dyn Agent>) -> Self {
        Self {
            criteria: criteria.into(),
            judge: Some(judge),
        }
    }

    fn request(&self, output: &TaskOutput) -> ChatRequest {
        let prompt = format!(
            "Check whether the output below satisfies these criteria.\n\n\
             Criteria:\n{}\n\nOutput:\n{}\n\n\
             Respond with valid JSON only: {{\"pass\": true|false, \"feedback\": \"...\"}}",
            self.criteria, output.raw
        );
        ChatRequest::text(prompt).with_response_format(ResponseFormat {
            name: "guardrail_judgement".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "pass": {"type": "boolean"},
                    "feedback": {"type": "string"}
                },
                "required": ["pass"]
            }),
        })
    }

    fn verdict(&self, reply: anyhow::Result<String>) -> GuardrailVerdict {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(target: "agentflow.guardrail", error = %e, "judge call failed");
                return GuardrailVerdict::reject(format!("guardrail check failed: {e}"));
            }
        };
        match serde_json::from_str::<Judgement>(&clean_json_output(&reply)) {
            Ok(j) if j.pass => GuardrailVerdict::Accept,
            Ok(j) if j.feedback.trim().is_empty() => {
                GuardrailVerdict::reject(format!("output does not meet: {}", self.criteria))
            }
            Ok(j) => GuardrailVerdict::Reject(j.feedback),
            Err(e) => {
                tracing::debug!(target: "agentflow.guardrail", reply = %reply, "unparseable judgement");
                GuardrailVerdict::reject(format!("unparseable guardrail judgement: {e}"))
            }
        }
    }
}

#[async_trait]
impl Guardrail for LlmGuardrail {
    fn validate(&self, output: &TaskOutput) -> GuardrailVerdict {
        let Some(judge) = &self.judge else {
            return GuardrailVerdict::reject("no agent available to check the guardrail");
        };
        self.verdict(judge.chat(&self.request(output)))
    }

    async fn avalidate(&self, output: &TaskOutput) -> GuardrailVerdict {
        let Some(judge) = &self.judge else {
            return GuardrailVerdict::reject("no agent available to check the guardrail");
        };
        self.verdict(judge.achat(&self.request(output)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Judge {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Agent for Judge {
        fn name(&self) -> &str {
            "judge"
        }

        fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(request.prompt().to_string());
            Ok(self.reply.clone())
        }
    }

    fn judge(reply: &str) -> Arc<Judge> {
        Arc::new(Judge {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn passing_judgement_accepts() {
        let j = judge("```json\n{\"pass\": true}\n```");
        let guard = LlmGuardrailResolver::new().resolve("under 20 words", Some(j.clone()));
        let verdict = guard.validate(&TaskOutput::new("d", "short text", "writer"));
        assert_eq!(verdict, GuardrailVerdict::Accept);
        let prompt = j.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("under 20 words"));
        assert!(prompt.contains("short text"));
    }

    #[test]
    fn failing_judgement_carries_feedback() {
        let guard = LlmGuardrail::new("cite sources", judge(r#"{"pass": false, "feedback": "no citations"}"#));
        let verdict = guard.validate(&TaskOutput::new("d", "claim", "writer"));
        assert_eq!(verdict, GuardrailVerdict::reject("no citations"));
    }

    #[test]
    fn garbage_reply_rejects() {
        let guard = LlmGuardrail::new("anything", judge("sure, looks fine"));
        let verdict = guard.validate(&TaskOutput::new("d", "x", "writer"));
        assert!(!verdict.is_accepted());
    }

    #[test]
    fn configured_judge_wins_over_task_agent() {
        let dedicated = judge(r#"{"pass": true}"#);
        let task_agent = judge(r#"{"pass": false}"#);
        let resolver = LlmGuardrailResolver::with_judge(dedicated.clone());
        let guard = resolver.resolve("c", Some(task_agent.clone()));
        assert!(guard.validate(&TaskOutput::new("d", "x", "w")).is_accepted());
        assert!(task_agent.prompts.lock().unwrap().is_empty());
    }
}
