use serde::{Deserialize, Serialize};

use crate::process::ProcessKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "agentflow_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub process: ProcessKind,

    /// Attempts the execution loop makes before giving up on a task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Scheduling iteration ceiling for the workflow process.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    /// Consultation ceiling for the hierarchical process.
    #[serde(default = "default_max_manager_rounds")]
    pub max_manager_rounds: usize,

    /// Default user id passed to knowledge searches.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_iter() -> usize {
    10
}

fn default_max_manager_rounds() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process: ProcessKind::default(),
            max_retries: default_max_retries(),
            max_iter: default_max_iter(),
            max_manager_rounds: default_max_manager_rounds(),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_strategy() -> String {
    "fixed".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// No delay between attempts; handy for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: String,
    #[serde(default)]
    pub pretty_print: bool,
    #[serde(default)]
    pub ascii_only: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_output_format(),
            pretty_print: false,
            ascii_only: false,
        }
    }
}

fn default_output_format() -> String {
    "text".to_string()
}
