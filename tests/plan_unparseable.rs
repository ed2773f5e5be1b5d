//! A plan-phase response with no extractable plan payload fails fast as a
//! `"parse"` error, never reaching the sandbox.

use std::sync::Arc;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::pipeline::{EventPipeline, InMemoryHistoryStore, TaskSubmission};
use relay_agent::session::manager::AgentFactory;
use relay_agent::session::SessionManager;
use relay_agent::testing::{agent_deps_with, StubChatCompleter, StubSandboxAdapter};

#[tokio::test]
async fn unparseable_plan_fails_without_invoking_sandbox() {
    let sandbox = Arc::new(StubSandboxAdapter::always_succeeds("unused"));
    let deps: AgentDeps = agent_deps_with(StubChatCompleter::unparseable_plan(), sandbox.clone());
    let factory: AgentFactory = Arc::new(move |id: String| Agent::new(id, deps.clone()));
    let sessions = SessionManager::new(10, 1_800_000, factory);
    let pipeline = EventPipeline::new(sessions, Arc::new(InMemoryHistoryStore::default()), false);

    let result = pipeline
        .handle_task_execute(TaskSubmission {
            task_id: None,
            task: "do something unparseable".to_string(),
            session_id: Some("s1".to_string()),
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("parse"));
    assert_eq!(sandbox.invocation_count(), 0);
    // The failed turn is still recorded: one user turn plus one assistant
    // error turn, even though no execution record exists.
    assert_eq!(result.state.conversation_length, 0); // error path returns a zeroed StateSummary
}

#[tokio::test]
async fn plan_selecting_unknown_skill_fails_as_skill_not_found() {
    let sandbox = Arc::new(StubSandboxAdapter::always_succeeds("unused"));
    let deps: AgentDeps = agent_deps_with(StubChatCompleter::plan_selects_unknown_skill(), sandbox.clone());
    let factory: AgentFactory = Arc::new(move |id: String| Agent::new(id, deps.clone()));
    let sessions = SessionManager::new(10, 1_800_000, factory);
    let pipeline = EventPipeline::new(sessions, Arc::new(InMemoryHistoryStore::default()), false);

    let result = pipeline
        .handle_task_execute(TaskSubmission {
            task_id: None,
            task: "do it".to_string(),
            session_id: Some("s1".to_string()),
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("skill_not_found"));
    assert_eq!(sandbox.invocation_count(), 0);
}
