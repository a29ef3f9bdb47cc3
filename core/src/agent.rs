//! Executor capability consumed by the engine.
//!
//! Agents are in-process objects; how they produce text is outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskMetadata;

/// One image attached to a multimodal request: an http(s) URL or a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContent {
    Text(String),
    Multimodal { text: String, images: Vec<ImageInput> },
}

impl ChatContent {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::Multimodal { text, .. } => text,
        }
    }
}

/// Structured reply requested from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub content: ChatContent,
    pub tools: Vec<String>,
    pub response_format: Option<ResponseFormat>,
    pub task: Option<TaskMetadata>,
}

impl ChatRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            content: ChatContent::Text(prompt.into()),
            tools: Vec::new(),
            response_format: None,
            task: None,
        }
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn prompt(&self) -> &str {
        self.content.text()
    }
}

/// An executor that answers chat requests.
///
/// `achat` defaults to the blocking `chat`; agents backed by async I/O
/// override it so the cooperative driver is never blocked.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name, also used to bind tasks to this agent.
    fn name(&self) -> &str;

    fn role(&self) -> &str {
        ""
    }

    /// Standing instructions, used when deriving a task from the agent.
    fn instructions(&self) -> Option<&str> {
        None
    }

    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String>;

    async fn achat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        self.chat(request)
    }
}
