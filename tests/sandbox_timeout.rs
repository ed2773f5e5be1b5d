//! A sandbox that outruns its timeout surfaces as a `"timeout"`-tagged
//! task failure with a sane elapsed time, rather than hanging the
//! pipeline or panicking.

use std::sync::Arc;
use std::time::Duration;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::pipeline::{EventPipeline, InMemoryHistoryStore, TaskSubmission};
use relay_agent::session::manager::AgentFactory;
use relay_agent::session::SessionManager;
use relay_agent::testing::{agent_deps_with_skills, StubChatCompleter, StubSandboxAdapter};

#[tokio::test]
async fn sandbox_timeout_surfaces_as_failed_task_with_timeout_kind() {
    // The stub sandbox sleeps for 300ms before answering; a 100ms task
    // timeout means the agent's `SandboxJob::timeout` expires first, so the
    // stub itself returns `CoreError::Timeout` rather than a plain failure.
    let mut deps: AgentDeps = agent_deps_with_skills(
        StubChatCompleter::scripted_success(),
        Arc::new(StubSandboxAdapter::always_times_out(Duration::from_millis(
            300,
        ))),
        vec![relay_agent::skills::SkillManifest::for_test(
            "summarize",
            "Summarize text content",
        )],
    );
    deps.task_timeout_ms = 100;

    let factory: AgentFactory = Arc::new(move |id: String| Agent::new(id, deps.clone()));
    let sessions = SessionManager::new(10, 1_800_000, factory);
    let pipeline = EventPipeline::new(sessions, Arc::new(InMemoryHistoryStore::default()), false);

    let result = pipeline
        .handle_task_execute(TaskSubmission {
            task_id: None,
            task: "Summarize: Hello".to_string(),
            session_id: Some("s1".to_string()),
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("timeout"));
    assert!(result.elapsed_ms >= 90, "elapsed_ms = {}", result.elapsed_ms);
}
