//! Shared test doubles for [`crate::llm::ChatCompleter`] and
//! [`crate::sandbox::SandboxAdapter`]: hand-written structs implementing
//! the trait directly rather than going through a mocking framework, so
//! scenario tests can script exact responses and timing.
//!
//! Deliberately *not* `#[cfg(test)]`-gated: integration tests under
//! `tests/` link against this crate as an ordinary dependency, so a
//! `cfg(test)` module in the library build would be invisible to them.
//! Kept out of the crate's public docs via `#[doc(hidden)]` instead.

#![doc(hidden)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::AgentDeps;
use crate::error::CoreError;
use crate::llm::{ChatCompleter, ChatOptions, ChatResponse, Message, TokenUsage};
use crate::ptc::PtcGenerator;
use crate::sandbox::{ExecResult, SandboxAdapter, SandboxInfo, SandboxJob};
use crate::skills::{SkillManifest, SkillRegistry};

/// Serves one fixed response per call in order, then repeats the last one.
/// A real `Agent::run` makes exactly two calls (plan, implement); scenario
/// tests script both.
pub struct StubChatCompleter {
    responses: Vec<String>,
    calls: AtomicUsize,
    /// Every prompt this completer has ever seen, in call order, joined
    /// per-call. Lets tests assert on exact prompt shape (e.g. the
    /// `<conversation_history>` block) without duplicating `PtcGenerator`'s
    /// prompt-assembly logic in the test itself.
    captured: std::sync::Mutex<Vec<String>>,
}

impl StubChatCompleter {
    #[must_use]
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            calls: AtomicUsize::new(0),
            captured: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// The prompt content passed to the `n`th `complete` call (0-indexed).
    #[must_use]
    pub fn captured_prompt(&self, n: usize) -> Option<String> {
        self.captured.lock().expect("captured lock poisoned").get(n).cloned()
    }

    /// Plan phase selects `summarize`; implement phase emits a fenced
    /// program that invokes it once.
    #[must_use]
    pub fn scripted_success() -> Arc<Self> {
        Self::new(vec![
            r#"<plan>{"selected_skills": ["summarize"], "reasoning": "it's a summarization task"}</plan>"#
                .to_string(),
            "```python\nresult = executor.execute('summarize', {'text': 'Hello'})\n```"
                .to_string(),
        ])
    }

    /// Plan phase returns text with no extractable plan payload at all.
    #[must_use]
    pub fn unparseable_plan() -> Arc<Self> {
        Self::new(vec!["sorry, I don't know".to_string()])
    }

    /// Plan phase names a skill absent from the registry.
    #[must_use]
    pub fn plan_selects_unknown_skill() -> Arc<Self> {
        Self::new(vec![
            r#"<plan>{"selected_skills": ["does-not-exist"], "reasoning": "oops"}</plan>"#
                .to_string(),
        ])
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatCompleter for StubChatCompleter {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, CoreError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        self.captured
            .lock()
            .expect("captured lock poisoned")
            .push(messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n"));
        let content = self
            .responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(ChatResponse {
            content,
            model: "stub-model".to_string(),
            usage: TokenUsage::default(),
        })
    }
}

/// Always returns the same exit code and stdout/stderr; counts
/// invocations so tests can assert the sandbox was never reached.
pub struct StubSandboxAdapter {
    exit_code: i32,
    stdout: String,
    stderr: String,
    invocations: AtomicUsize,
    delay: Option<std::time::Duration>,
    cleaned_up: std::sync::Mutex<Vec<String>>,
}

impl StubSandboxAdapter {
    #[must_use]
    pub fn always_succeeds(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            invocations: AtomicUsize::new(0),
            delay: None,
            cleaned_up: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn always_fails(stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
            invocations: AtomicUsize::new(0),
            delay: None,
            cleaned_up: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Sleeps past the caller's configured timeout before answering, so
    /// tests can exercise the `min(TaskTimeout, sandbox timeout)` path
    /// without spawning a real process.
    #[must_use]
    pub fn always_times_out(after: std::time::Duration) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: "Execution timeout".to_string(),
            invocations: AtomicUsize::new(0),
            delay: Some(after),
            cleaned_up: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Session ids `cleanup` has been called with, in call order. Lets
    /// tests assert that eviction/release actually released sandbox
    /// resources rather than just dropping the session from the table.
    #[must_use]
    pub fn cleaned_up_sessions(&self) -> Vec<String> {
        self.cleaned_up.lock().expect("cleaned_up lock poisoned").clone()
    }
}

#[async_trait]
impl SandboxAdapter for StubSandboxAdapter {
    async fn execute(&self, job: SandboxJob) -> Result<ExecResult, CoreError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            if tokio::time::timeout(job.timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(CoreError::Timeout {
                    elapsed_ms: job.timeout.as_millis() as u64,
                });
            }
        }
        Ok(ExecResult {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exit_code: self.exit_code,
        })
    }

    async fn cleanup(&self, session_id: &str) {
        self.cleaned_up
            .lock()
            .expect("cleaned_up lock poisoned")
            .push(session_id.to_string());
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn info(&self) -> SandboxInfo {
        SandboxInfo {
            backend: "stub",
            max_concurrent: usize::MAX,
            active: self.invocations.load(Ordering::SeqCst),
        }
    }
}

/// Builds a full [`AgentDeps`] around one completer and one sandbox,
/// backed by a one-skill in-memory registry (`summarize`) so the default
/// scripted plans validate against it.
#[must_use]
pub fn agent_deps_with(completer: Arc<StubChatCompleter>, sandbox: Arc<dyn SandboxAdapter>) -> AgentDeps {
    agent_deps_with_skills(
        completer,
        sandbox,
        vec![SkillManifest::for_test("summarize", "Summarize text content")],
    )
}

/// As [`agent_deps_with`], but with a caller-supplied skill set (e.g. an
/// empty registry, to exercise `SkillNotFound`).
#[must_use]
pub fn agent_deps_with_skills(
    completer: Arc<StubChatCompleter>,
    sandbox: Arc<dyn SandboxAdapter>,
    manifests: Vec<SkillManifest>,
) -> AgentDeps {
    AgentDeps {
        ptc: Arc::new(PtcGenerator::new(completer, 5)),
        sandbox,
        skills: Arc::new(SkillRegistry::in_memory(manifests)),
        task_timeout_ms: 60_000,
        extra_module_paths: vec![],
    }
}
