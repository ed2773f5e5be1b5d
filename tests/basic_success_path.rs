//! A single-skill task succeeds end to end through the pipeline.

use std::sync::Arc;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::pipeline::{EventPipeline, InMemoryHistoryStore, TaskSubmission};
use relay_agent::session::manager::AgentFactory;
use relay_agent::session::SessionManager;
use relay_agent::testing::{StubChatCompleter, StubSandboxAdapter};

fn pipeline_with(completer: Arc<StubChatCompleter>, sandbox: Arc<StubSandboxAdapter>) -> EventPipeline {
    let deps = relay_agent::testing::agent_deps_with(completer, sandbox);
    let factory: AgentFactory = Arc::new(move |id: String| Agent::new(id, deps.clone()));
    let sessions = SessionManager::new(10, 1_800_000, factory);
    EventPipeline::new(sessions, Arc::new(InMemoryHistoryStore::default()), false)
}

#[tokio::test]
async fn summarize_task_succeeds_with_expected_state_and_metadata() {
    let pipeline = pipeline_with(
        StubChatCompleter::scripted_success(),
        Arc::new(StubSandboxAdapter::always_succeeds("SUMMARY")),
    );

    let result = pipeline
        .handle_task_execute(TaskSubmission {
            task_id: None,
            task: "Summarize: Hello".to_string(),
            session_id: Some("s1".to_string()),
        })
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some("SUMMARY"));
    assert_eq!(result.state.conversation_length, 2);
    assert_eq!(result.state.execution_count, 1);
    assert_eq!(result.metadata.skill_calls, 1);
}
