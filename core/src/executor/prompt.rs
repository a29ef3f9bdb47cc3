use std::path::Path;

use base64::Engine as _;

use crate::agent::{ChatContent, ImageInput, ResponseFormat};
use crate::task::{DecisionOutput, OutputFormat, Task, TaskType};

const FINAL_ANSWER_INSTRUCTION: &str =
    "Please provide only the final result of your work. Do not add any conversation or extra explanation.";

/// Assemble the text prompt for one execution of `task`.
pub fn build_prompt(task: &Task, context: &str, memory: &str) -> String {
    let mut prompt = format!(
        "You need to do the following task: {}.",
        task.effective_description().trim_end_matches('.')
    );
    if !task.expected_output.trim().is_empty() {
        prompt.push_str(&format!(
            "\nExpected Output: {}.",
            task.expected_output.trim().trim_end_matches('.')
        ));
    }
    if !context.trim().is_empty() {
        prompt.push_str(&format!("\n\nContext:\n\n{context}"));
    }
    if !memory.trim().is_empty() {
        prompt.push_str(&format!("\n\nRelevant memory:\n\n{memory}"));
    }
    prompt.push_str("\n\n");
    prompt.push_str(FINAL_ANSWER_INSTRUCTION);
    prompt
}

/// Structured reply requested from the agent, if the task wants one.
pub fn response_format(task: &Task) -> Option<ResponseFormat> {
    match &task.output_format {
        OutputFormat::Model { name, schema } => Some(ResponseFormat {
            name: name.clone(),
            schema: schema.clone(),
        }),
        OutputFormat::Raw if task.task_type == TaskType::Decision && !task.condition.is_empty() => {
            Some(ResponseFormat {
                name: "DecisionOutput".to_string(),
                schema: DecisionOutput::schema(),
            })
        }
        _ => None,
    }
}

pub fn build_content(prompt: String, images: Vec<ImageInput>) -> ChatContent {
    if images.is_empty() {
        ChatContent::Text(prompt)
    } else {
        ChatContent::Multimodal {
            text: prompt,
            images,
        }
    }
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn data_url(path: &Path, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_for(path),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Resolve image sources: URLs pass through, local files become data URLs.
///
/// Unreadable files are skipped with a warning.
pub fn image_inputs(sources: &[String]) -> Vec<ImageInput> {
    sources
        .iter()
        .filter_map(|src| {
            if is_remote(src) {
                return Some(ImageInput { url: src.clone() });
            }
            let path = Path::new(src);
            match std::fs::read(path) {
                Ok(bytes) => Some(ImageInput {
                    url: data_url(path, &bytes),
                }),
                Err(e) => {
                    tracing::warn!(target: "agentflow.task", image = %src, error = %e, "image could not be read");
                    None
                }
            }
        })
        .collect()
}

pub async fn aimage_inputs(sources: &[String]) -> Vec<ImageInput> {
    let mut out = Vec::with_capacity(sources.len());
    for src in sources {
        if is_remote(src) {
            out.push(ImageInput { url: src.clone() });
            continue;
        }
        let path = Path::new(src);
        match tokio::fs::read(path).await {
            Ok(bytes) => out.push(ImageInput {
                url: data_url(path, &bytes),
            }),
            Err(e) => {
                tracing::warn!(target: "agentflow.task", image = %src, error = %e, "image could not be read");
            }
        }
    }
    out
}
