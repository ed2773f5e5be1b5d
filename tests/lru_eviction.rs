//! Acquiring past the session cap evicts the least-recently-used session,
//! never the one just admitted.

use std::sync::Arc;
use std::time::Duration;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::session::manager::AgentFactory;
use relay_agent::session::SessionManager;
use relay_agent::testing::{agent_deps_with, StubChatCompleter, StubSandboxAdapter};

fn factory_with(sandbox: Arc<StubSandboxAdapter>) -> AgentFactory {
    let deps: AgentDeps = agent_deps_with(StubChatCompleter::scripted_success(), sandbox);
    Arc::new(move |id: String| Agent::new(id, deps.clone()))
}

#[tokio::test]
async fn touching_a_session_protects_it_from_eviction() {
    let sandbox = Arc::new(StubSandboxAdapter::always_succeeds("OK"));
    let manager = SessionManager::new(3, 1_800_000, factory_with(sandbox.clone()));

    manager.acquire("s1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.acquire("s2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.acquire("s3").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Touch s2 -- it is now the most recently active of {s1, s2, s3}.
    manager.acquire("s2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.acquire("s4").await.unwrap();

    let live = manager.active_sessions().await;
    assert_eq!(live.len(), 3);
    assert!(live.contains(&"s2".to_string()));
    assert!(live.contains(&"s3".to_string()));
    assert!(live.contains(&"s4".to_string()));
    assert!(!live.contains(&"s1".to_string()));

    // Eviction must release the evicted session's sandbox resources, not
    // just drop it from the table.
    assert_eq!(sandbox.cleaned_up_sessions(), vec!["s1".to_string()]);
}
