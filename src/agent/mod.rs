//! Per-session orchestrator: owns one [`crate::session::SessionState`] and
//! turns a task string into a [`RunResult`] by driving the PTC generator
//! and the sandbox adapter, once per call -- plan, execute, record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::llm::ChatCompleter;
use crate::pipeline::TaskMetadata;
use crate::ptc::PtcGenerator;
use crate::sandbox::{SandboxAdapter, SandboxJob};
use crate::session::{ConversationTurn, SessionState};
use crate::skills::SkillRegistry;

/// Shared, process-wide collaborators every `Agent` is built from. Cheap to
/// clone (everything inside is an `Arc`), so the session manager's
/// [`crate::session::manager::AgentFactory`] closure can capture one copy
/// and hand out fresh `Agent`s per session id.
#[derive(Clone)]
pub struct AgentDeps {
    pub ptc: Arc<PtcGenerator>,
    pub sandbox: Arc<dyn SandboxAdapter>,
    pub skills: Arc<SkillRegistry>,
    pub task_timeout_ms: u64,
    pub extra_module_paths: Vec<String>,
}

impl AgentDeps {
    /// Builds a fully in-process set of dependencies: a stub completer
    /// returning a fixed plan+program pair, a stub sandbox adapter
    /// returning a fixed success result, and an empty skill registry with
    /// one manifest (`"noop"`) pre-seeded so generated plans can reference
    /// it. Used by the session manager's and pipeline's own unit tests.
    #[must_use]
    pub fn test_stubs() -> Self {
        crate::testing::agent_deps_with(
            crate::testing::StubChatCompleter::scripted_success(),
            Arc::new(crate::testing::StubSandboxAdapter::always_succeeds("OK")),
        )
    }
}

/// Output of one successful [`Agent::run`] call, as consumed by
/// [`crate::pipeline::EventPipeline`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub output: String,
    pub elapsed_ms: u64,
    pub state: RunStateSummary,
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone)]
pub struct RunStateSummary {
    pub conversation_length: usize,
    pub execution_count: usize,
    pub variables_count: usize,
}

/// Owns exactly one [`SessionState`] and the shared collaborators needed to
/// fulfil a task against it. Never handed out for concurrent use directly;
/// [`crate::session::SessionManager::acquire`] wraps every `Agent` in its
/// own `tokio::sync::Mutex` so `run` calls on one session serialize.
pub struct Agent {
    state: SessionState,
    deps: AgentDeps,
}

impl Agent {
    #[must_use]
    pub fn new(session_id: impl Into<String>, deps: AgentDeps) -> Self {
        Self {
            state: SessionState::new(session_id),
            deps,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drives one task to completion: plan, execute, record. Never panics;
    /// every failure path still appends an assistant turn describing the
    /// error and returns `Err` for the pipeline to translate into a
    /// `success=false` `TaskResult`.
    #[instrument(skip(self, task), fields(session_id = %self.state.session_id))]
    pub async fn run(&mut self, task: &str) -> Result<RunResult, CoreError> {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();

        self.state.touch();
        // Snapshot the history *before* appending this task's own turn, so
        // the PTC generator's context window ends with the previous
        // assistant turn rather than with the question currently being
        // asked.
        let history_before_task = self.state.conversation_turns.clone();
        self.state.conversation_turns.push(ConversationTurn::user(task));

        let outcome = self.plan_and_execute(task, &trace_id, &history_before_task).await;

        let result = match outcome {
            Ok((output, skill_calls, llm_calls)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.state
                    .execution_records
                    .push(crate::session::ExecutionRecord {
                        task: task.to_string(),
                        output: Some(output.clone()),
                        error: None,
                        at: chrono::Utc::now(),
                        elapsed_ms,
                    });
                self.state
                    .conversation_turns
                    .push(ConversationTurn::assistant(&output));

                Ok(RunResult {
                    output,
                    elapsed_ms,
                    state: self.state_summary(),
                    metadata: TaskMetadata {
                        llm_calls,
                        skill_calls,
                        total_tokens: 0,
                    },
                })
            }
            Err(err) => {
                self.state
                    .conversation_turns
                    .push(ConversationTurn::assistant(format!("Error: {err}")));
                Err(err)
            }
        };

        result
    }

    async fn plan_and_execute(
        &mut self,
        task: &str,
        trace_id: &str,
        history_before_task: &[ConversationTurn],
    ) -> Result<(String, usize, u32), CoreError> {
        let variables: serde_json::Map<String, Value> = self
            .state
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let skills = self.deps.skills.snapshot();
        let ptc = self
            .deps
            .ptc
            .generate(task, history_before_task, &variables, &skills)
            .await?;

        let skill_calls = crate::sandbox::wrap::count_skill_calls(&ptc.program);

        let job = SandboxJob {
            session_id: self.state.session_id.clone(),
            source: ptc.program,
            timeout: Duration::from_millis(self.deps.task_timeout_ms),
            extra_module_paths: self.deps.extra_module_paths.clone(),
            trace_id: trace_id.to_string(),
        };

        info!(trace_id, skills = ?ptc.selected_skills, "submitting generated program to sandbox");

        let exec = self.deps.sandbox.execute(job).await?;

        if !exec.success() {
            return Err(CoreError::Execution(if exec.stderr.trim().is_empty() {
                "execution timeout".to_string()
            } else {
                exec.stderr.clone()
            }));
        }

        if let Some(vars) = extract_trailing_vars(&exec.stdout) {
            self.state.variables.extend(vars);
        }

        // plan phase + implement phase = two LLM calls per run.
        Ok((exec.stdout, skill_calls, 2))
    }

    fn state_summary(&self) -> RunStateSummary {
        RunStateSummary {
            conversation_length: self.state.conversation_turns.len(),
            execution_count: self.state.execution_records.len(),
            variables_count: self.state.variables.len(),
        }
    }

    /// Releases the sandbox resources held for this session, then clears
    /// all accumulated conversation/execution/variable state. Called by
    /// the session manager under the agent's own mutex, so it never races
    /// a concurrent `run`.
    #[instrument(skip(self), fields(session_id = %self.state.session_id))]
    pub async fn cleanup(&mut self) -> Result<(), CoreError> {
        self.deps.sandbox.cleanup(&self.state.session_id).await;
        self.state.clear();
        Ok(())
    }
}

/// The open-question convention documented in `DESIGN.md`: a program that
/// wants to surface variables back to the session writes one trailing
/// stdout line shaped `__VARS__ {"name": value, ...}`. Absence of the line
/// means no variables changed.
fn extract_trailing_vars(stdout: &str) -> Option<HashMap<String, Value>> {
    let line = stdout.lines().rev().find(|l| l.starts_with("__VARS__ "))?;
    let json = line.trim_start_matches("__VARS__ ").trim();
    match serde_json::from_str::<HashMap<String, Value>>(json) {
        Ok(map) => Some(map),
        Err(err) => {
            warn!(error = %err, "ignoring malformed trailing __VARS__ line");
            None
        }
    }
}

/// Pulled in only so `ChatCompleter` stays a named import and this module
/// documents which trait objects it expects its deps to provide; the real
/// wiring happens in `AgentDeps`.
#[allow(dead_code)]
fn _assert_traits(_c: &dyn ChatCompleter, _s: &dyn SandboxAdapter) {}
