mod common;

use agentflow_core::error::ExecutorError;
use agentflow_core::process::ProcessKind;
use agentflow_core::task::{Task, TaskStatus};
use common::{builder, EchoAgent, ScriptedAgent};
use pretty_assertions::assert_eq;

fn team() -> (std::sync::Arc<EchoAgent>, std::sync::Arc<EchoAgent>) {
    (EchoAgent::new("researcher"), EchoAgent::new("writer"))
}

#[test]
fn stop_ends_the_loop_with_work_outstanding() {
    let (researcher, writer) = team();
    let manager = ScriptedAgent::new(
        "boss",
        &[
            r#"{"task_id": 0, "agent_name": "writer", "action": "execute"}"#,
            r#"{"task_id": 0, "agent_name": "", "action": "stop"}"#,
        ],
        "{}",
    );
    let engine = builder(ProcessKind::Hierarchical)
        .agent(researcher.clone())
        .agent(writer.clone())
        .manager_agent(manager.clone())
        .task(Task::builder("Outline the article").name("outline").agent("researcher").build())
        .task(Task::builder("Write the article").name("article").build())
        .build()
        .unwrap();

    let result = engine.start().unwrap();
    assert_eq!(manager.calls(), 2);
    assert_eq!(result.task_status[&0], TaskStatus::Completed);
    assert_eq!(result.task_status[&1], TaskStatus::NotStarted);
    assert_eq!(result.task_status[&2], TaskStatus::Completed);
    assert_eq!(engine.tasks()[2].name, "manager_task");

    // The manager moved the outline to the writer.
    assert!(researcher.seen().is_empty());
    assert_eq!(writer.seen().len(), 1);
    assert_eq!(engine.task_details(0).unwrap().agent.as_deref(), Some("writer"));

    let prompt = &manager.prompts()[0];
    assert!(prompt.contains("\"name\": \"outline\""));
    assert!(prompt.contains("Available agents: researcher, writer"));
}

#[test]
fn bare_stop_reply_ends_the_loop() {
    let (researcher, writer) = team();
    let manager = ScriptedAgent::new("boss", &[], r#"{"action": "stop"}"#);
    let engine = builder(ProcessKind::Hierarchical)
        .agent(researcher.clone())
        .agent(writer.clone())
        .manager_agent(manager.clone())
        .task(Task::builder("Outline").name("outline").build())
        .task(Task::builder("Write").name("article").build())
        .build()
        .unwrap();

    let result = engine.start().unwrap();
    assert_eq!(manager.calls(), 1);
    assert_eq!(result.task_status[&0], TaskStatus::NotStarted);
    assert_eq!(result.task_status[&1], TaskStatus::NotStarted);
    assert_eq!(result.task_status[&2], TaskStatus::Completed);
    assert!(researcher.seen().is_empty());
    assert!(writer.seen().is_empty());
}

#[test]
fn fenced_reply_falls_back_to_schema_prompt() {
    let (researcher, writer) = team();
    let manager = ScriptedAgent::new(
        "boss",
        &[
            "Sure! ```json\n{\"task_id\": 0, \"agent_name\": \"researcher\", \"action\": \"execute\"}\n```",
            "```json\n{\"task_id\": 0, \"agent_name\": \"researcher\", \"action\": \"execute\"}\n```",
        ],
        r#"{"task_id": 0, "agent_name": "", "action": "stop"}"#,
    );
    let engine = builder(ProcessKind::Hierarchical)
        .agent(researcher.clone())
        .agent(writer)
        .manager_agent(manager.clone())
        .task(Task::builder("Outline").name("outline").build())
        .build()
        .unwrap();

    let result = engine.start().unwrap();
    assert_eq!(result.task_status[&0], TaskStatus::Completed);
    assert_eq!(researcher.seen().len(), 1);
    // Typed attempt failed, schema-prompted attempt succeeded; then every task was done.
    assert_eq!(manager.calls(), 2);
    assert!(manager.prompts()[1].contains("Respond with valid JSON only"));
}

#[test]
fn unusable_manager_reply_aborts_the_run() {
    let manager = ScriptedAgent::new("boss", &[], "I would rather not decide.");
    let engine = builder(ProcessKind::Hierarchical)
        .agent(EchoAgent::new("writer"))
        .manager_agent(manager.clone())
        .task(Task::builder("Write").name("write").build())
        .build()
        .unwrap();

    let err = engine.start().unwrap_err();
    assert!(matches!(err, ExecutorError::ManagerDecision(_)), "{err}");
    assert_eq!(manager.calls(), 2);
}

#[test]
fn round_ceiling_fails_the_manager_task() {
    let manager = ScriptedAgent::new(
        "boss",
        &[],
        r#"{"task_id": 0, "agent_name": "", "action": "execute"}"#,
    );
    let stubborn = ScriptedAgent::new("writer", &[], "");
    let engine = builder(ProcessKind::Hierarchical)
        .agent(stubborn.clone())
        .manager_agent(manager.clone())
        .max_manager_rounds(3)
        .max_retries(1)
        .task(Task::builder("Write").name("write").build())
        .build()
        .unwrap();

    let result = engine.start().unwrap();
    assert_eq!(manager.calls(), 3);
    assert_eq!(stubborn.calls(), 3);
    assert_eq!(result.task_status[&1], TaskStatus::Failed);
}

#[tokio::test]
async fn hierarchical_run_is_driven_the_same_way_async() {
    let (researcher, writer) = team();
    let manager = ScriptedAgent::new(
        "boss",
        &[
            r#"{"task_id": 1, "agent_name": "writer", "action": "execute"}"#,
            r#"{"task_id": 0, "agent_name": "researcher", "action": "execute"}"#,
        ],
        r#"{"task_id": 0, "agent_name": "", "action": "stop"}"#,
    );
    let engine = builder(ProcessKind::Hierarchical)
        .agent(researcher.clone())
        .agent(writer.clone())
        .manager_agent(manager.clone())
        .task(Task::builder("Outline").name("outline").async_execution(true).build())
        .task(Task::builder("Write").name("article").async_execution(true).build())
        .build()
        .unwrap();

    let result = engine.astart().await.unwrap();
    assert_eq!(result.completed(), 3);
    assert_eq!(manager.calls(), 2);
    assert_eq!(writer.seen()[0].0, "article");
    assert_eq!(researcher.seen()[0].0, "outline");
}
