//! Stable re-exports for consumers (`plugins` and external crates).
//!
//! Prefer importing from `agentflow_core::api` instead of reaching into internal modules.

pub use crate::agent::{Agent, ChatContent, ChatRequest, ImageInput, ResponseFormat};
pub use crate::config::{
    load_default, load_from_path, AppConfig, EngineConfig, LoggingConfig, OutputConfig,
    RetryConfig,
};
pub use crate::definition::{ContextSpec, TaskDefinition, WorkflowDefinition};
pub use crate::error::{DecisionParseError, ExecutorError, RegistryError};
pub use crate::executor::{
    ExecutionEngine, ExecutionEngineBuilder, ExecutionResult, FixedDelay, RetryStrategy,
    TaskDetails,
};
pub use crate::hooks::{
    AsyncEventHandler, EngineEvent, EventHandler, EventKind, EventRegistry, TaskHooks,
};
pub use crate::logging::init_tracing;
pub use crate::memory::{Knowledge, KnowledgeHit, Memory, MemoryRecord};
pub use crate::process::{
    DecisionParser, ManagerAction, ManagerInstructions, ManagerQuery, ProcessKind, Scheduler,
    SchedulerLimits, Step,
};
pub use crate::registry::{Endpoint, EndpointTarget, ServerRegistry};
pub use crate::task::{
    CompletionChecker, ContextItem, Guardrail, GuardrailPayload, GuardrailResolver,
    GuardrailVerdict, OutputFormat, Task, TaskBuilder, TaskCallback, TaskGuardrail, TaskId,
    TaskMetadata, TaskOutput, TaskRef, TaskStatus, TaskTable, TaskType,
};
