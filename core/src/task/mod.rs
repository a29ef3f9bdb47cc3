mod callback;
mod completion;
mod context;
mod guardrail;
mod loop_source;
mod output;
mod table;
mod task;
mod types;

pub use callback::{MetadataCallback, OutputCallback, TaskCallback};
pub use completion::{CompletionChecker, DefaultCompletionChecker, FnCompletionChecker};
pub use context::{join_unique, ContextResolver};
pub use guardrail::{
    apply_payload, FnGuardrail, Guardrail, GuardrailPayload, GuardrailResolver, GuardrailStep,
    GuardrailVerdict, TaskGuardrail,
};
pub use loop_source::{aread_rows, parse_rows, read_rows, LoopRow, RowFormat};
pub use output::{
    clean_json_output, parse_decision, parse_structured, write_output_file,
    write_output_file_async, DecisionOutput, OutputFormat, StructuredOutput, TaskOutput,
};
pub use table::TaskTable;
pub use task::{Task, TaskBuilder, TaskMetadata, MIN_MAX_RETRIES};
pub use types::{
    ContextItem, KnowledgeQuery, TaskId, TaskRef, TaskStatus, TaskType, CURRENT_TARGET,
    EXIT_TARGET,
};
