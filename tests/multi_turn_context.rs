//! A second task against the same session carries the first task's turns
//! into the plan-phase prompt, so the model can resolve references like
//! "it" against prior context -- scenario 6 in the spec's testable
//! properties: after "Remember the number 42" (-> "OK") then "What number
//! did I give you?", the second plan prompt's history block must end with
//! `assistant: OK` preceded by `user: Remember the number 42`, not with the
//! just-asked current task.

use std::sync::Arc;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::testing::{agent_deps_with, StubChatCompleter, StubSandboxAdapter};

#[tokio::test]
async fn second_plan_prompt_history_ends_with_prior_turn_not_current_task() {
    let completer = StubChatCompleter::new(vec![
        r#"<plan>{"selected_skills": ["summarize"], "reasoning": "first task"}</plan>"#.to_string(),
        "```python\nresult = executor.execute('summarize', {'text': '42'})\n```".to_string(),
        r#"<plan>{"selected_skills": ["summarize"], "reasoning": "second task"}</plan>"#.to_string(),
        "```python\nresult = executor.execute('summarize', {'text': 'recall'})\n```".to_string(),
    ]);
    let deps: AgentDeps = agent_deps_with(
        completer.clone(),
        Arc::new(StubSandboxAdapter::always_succeeds("OK")),
    );
    let mut agent = Agent::new("s1", deps);

    agent.run("Remember the number 42").await.unwrap();
    agent.run("What number did I give you?").await.unwrap();

    // Call index 2 is the plan-phase prompt for the second `run`.
    let second_plan_prompt = completer.captured_prompt(2).unwrap();

    let history_block = second_plan_prompt
        .split("<conversation_history>\n")
        .nth(1)
        .and_then(|rest| rest.split("</conversation_history>").next())
        .expect("prompt must contain a conversation_history block");
    let lines: Vec<&str> = history_block.lines().collect();

    // Exactly the first task's user/assistant pair, in order -- not the
    // current task, which hasn't been answered yet.
    assert_eq!(
        lines,
        vec!["user: Remember the number 42", "assistant: OK"]
    );
    assert!(!second_plan_prompt.contains("What number did I give you?"));

    assert_eq!(agent.state().conversation_turns.len(), 4);
}
