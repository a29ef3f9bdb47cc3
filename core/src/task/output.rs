use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid fence regex");
}

/// Structured form a task asks its agent to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Raw,
    Json,
    /// A named model validated against a JSON schema.
    Model { name: String, schema: Value },
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Json => "JSON",
            Self::Model { .. } => "MODEL",
        }
    }
}

/// Result of executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub description: String,
    pub summary: String,
    pub raw: String,
    pub json_dict: Option<Value>,
    pub model: Option<Value>,
    pub agent: String,
    pub output_format: String,
    pub created_at: DateTime<Utc>,
}

impl TaskOutput {
    pub fn new(description: &str, raw: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            description: description.to_string(),
            summary: summarize(description),
            raw: raw.into(),
            json_dict: None,
            model: None,
            agent: agent.into(),
            output_format: OutputFormat::Raw.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Structured payload, preferring the model over plain JSON.
    pub fn structured(&self) -> Option<&Value> {
        self.model
            .as_ref()
            .or(self.json_dict.as_ref())
            .filter(|v| !v.is_null())
    }

    /// The `decision` field of the structured result, if any.
    pub fn decision_field(&self) -> Option<&str> {
        self.structured()
            .and_then(|v| v.get("decision"))
            .and_then(Value::as_str)
    }
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.structured() {
            Some(v) => {
                let pretty = serde_json::to_string_pretty(v).map_err(|_| fmt::Error)?;
                f.write_str(&pretty)
            }
            None => f.write_str(&self.raw),
        }
    }
}

fn summarize(description: &str) -> String {
    description
        .split_whitespace()
        .take(10)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Structured fields recovered from raw agent output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredOutput {
    pub json_dict: Option<Value>,
    pub model: Option<Value>,
    pub warning: Option<String>,
}

/// Reply shape requested from decision tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutput {
    pub response: String,
    pub decision: String,
}

impl DecisionOutput {
    pub fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "response": { "type": "string" },
                "decision": { "type": "string" }
            },
            "required": ["response", "decision"]
        })
    }

    pub fn validate<'a, I>(&self, keys: I) -> Result<(), String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let decision = self.decision.trim();
        let keys: Vec<&String> = keys.into_iter().collect();
        if keys.iter().any(|k| k.as_str() == decision) {
            Ok(())
        } else {
            Err(format!(
                "decision '{decision}' is not one of [{}]",
                keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
            ))
        }
    }
}

/// Strip Markdown fences and surrounding prose from a JSON reply.
pub fn clean_json_output(raw: &str) -> String {
    if let Some(caps) = FENCED_BLOCK.captures(raw) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim().to_string();
        }
    }
    let trimmed = raw.trim();
    let start = trimmed.find(|c: char| c == '{' || c == '[');
    let end = trimmed.rfind(|c: char| c == '}' || c == ']');
    match (start, end) {
        (Some(s), Some(e)) if e > s => trimmed[s..=e].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Parse `raw` according to `format`. Failures leave the fields empty and set a warning.
pub fn parse_structured(raw: &str, format: &OutputFormat) -> StructuredOutput {
    match format {
        OutputFormat::Raw => StructuredOutput::default(),
        OutputFormat::Json => match serde_json::from_str::<Value>(&clean_json_output(raw)) {
            Ok(v) => StructuredOutput {
                json_dict: Some(v),
                ..Default::default()
            },
            Err(e) => StructuredOutput {
                warning: Some(format!("failed to parse JSON output: {e}")),
                ..Default::default()
            },
        },
        OutputFormat::Model { name, schema } => {
            let value = match serde_json::from_str::<Value>(&clean_json_output(raw)) {
                Ok(v) => v,
                Err(e) => {
                    return StructuredOutput {
                        warning: Some(format!("failed to parse {name} output: {e}")),
                        ..Default::default()
                    }
                }
            };
            match validate_against_schema(&value, schema) {
                Ok(()) => StructuredOutput {
                    model: Some(value),
                    ..Default::default()
                },
                Err(msg) => StructuredOutput {
                    warning: Some(format!("{name} output failed validation: {msg}")),
                    ..Default::default()
                },
            }
        }
    }
}

/// Parse the `{response, decision}` reply of a decision task.
///
/// Plain-text replies are not an error: routing falls back to the raw text.
pub fn parse_decision<'a, I>(raw: &str, keys: I) -> StructuredOutput
where
    I: IntoIterator<Item = &'a String>,
{
    let cleaned = clean_json_output(raw);
    if !cleaned.starts_with('{') {
        return StructuredOutput::default();
    }
    match serde_json::from_str::<DecisionOutput>(&cleaned) {
        Ok(decision) => match decision.validate(keys) {
            Ok(()) => StructuredOutput {
                json_dict: serde_json::to_value(&decision).ok(),
                ..Default::default()
            },
            Err(msg) => StructuredOutput {
                warning: Some(msg),
                ..Default::default()
            },
        },
        Err(e) => StructuredOutput {
            warning: Some(format!("failed to parse decision output: {e}")),
            ..Default::default()
        },
    }
}

fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), String> {
    let compiled = jsonschema::validator_for(schema).map_err(|e| format!("invalid schema: {e}"))?;
    let messages: Vec<String> = compiled.iter_errors(value).map(|e| e.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages.join("; "))
    }
}

pub fn write_output_file(path: &Path, create_directory: bool, output: &TaskOutput) -> std::io::Result<()> {
    if create_directory {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, output.to_string())
}

pub async fn write_output_file_async(
    path: &Path,
    create_directory: bool,
    output: &TaskOutput,
) -> std::io::Result<()> {
    if create_directory {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, output.to_string()).await
}
