//! Row sources feeding loop tasks.

use std::path::Path;

use serde_json::Value;

use crate::error::ExecutorError;

/// One row of a loop source: the task text plus any auxiliary columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRow {
    pub text: String,
    pub extra: Vec<String>,
}

impl LoopRow {
    /// Description handed to the generated subtask.
    pub fn description(&self) -> String {
        let extra: Vec<&str> = self
            .extra
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if extra.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n{}", self.text, extra.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    Delimited(char),
    Lines,
    Json,
}

impl RowFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => Self::Delimited(','),
            Some("tsv") => Self::Delimited('\t'),
            Some("json") => Self::Json,
            _ => Self::Lines,
        }
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<LoopRow>, ExecutorError> {
    let content = std::fs::read_to_string(path).map_err(|e| source_error(path, e.to_string()))?;
    parse_rows(&content, RowFormat::from_path(path)).map_err(|e| source_error(path, e))
}

pub async fn aread_rows(path: &Path) -> Result<Vec<LoopRow>, ExecutorError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| source_error(path, e.to_string()))?;
    parse_rows(&content, RowFormat::from_path(path)).map_err(|e| source_error(path, e))
}

fn source_error(path: &Path, reason: String) -> ExecutorError {
    ExecutorError::LoopSource {
        path: path.display().to_string(),
        reason,
    }
}

pub fn parse_rows(content: &str, format: RowFormat) -> Result<Vec<LoopRow>, String> {
    match format {
        RowFormat::Delimited(sep) => Ok(parse_delimited(content, sep)),
        RowFormat::Lines => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| LoopRow {
                text: l.to_string(),
                extra: Vec::new(),
            })
            .collect()),
        RowFormat::Json => parse_json(content),
    }
}

fn parse_delimited(content: &str, sep: char) -> Vec<LoopRow> {
    let mut rows = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                push_record(&mut rows, std::mem::take(&mut record));
            }
            c if c == sep => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut rows, record);
    }
    rows
}

fn push_record(rows: &mut Vec<LoopRow>, record: Vec<String>) {
    let mut fields = record.into_iter().map(|f| f.trim().to_string());
    let Some(text) = fields.next() else {
        return;
    };
    let extra: Vec<String> = fields.collect();
    if text.is_empty() && extra.iter().all(|e| e.is_empty()) {
        return;
    }
    rows.push(LoopRow { text, extra });
}

fn parse_json(content: &str) -> Result<Vec<LoopRow>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let Value::Array(items) = value else {
        return Err("expected a JSON array of rows".to_string());
    };
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if s.trim().is_empty() => {}
            Value::String(s) => rows.push(LoopRow {
                text: s.trim().to_string(),
                extra: Vec::new(),
            }),
            Value::Object(mut map) => {
                let text = ["task", "description", "text"]
                    .iter()
                    .find_map(|k| map.remove(*k))
                    .map(|v| scalar_text(&v))
                    .unwrap_or_default();
                let extra = map.values().map(scalar_text).collect();
                rows.push(LoopRow { text, extra });
            }
            other => rows.push(LoopRow {
                text: scalar_text(&other),
                extra: Vec::new(),
            }),
        }
    }
    Ok(rows)
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
