//! Event-driven task pipeline: accepts `task.execute` submissions, routes
//! them to the session-owned [`crate::agent::Agent`], and fans
//! `task.completed`/`task.failed` to an audit sink.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::session::SessionManager;

const HISTORY_GROUP: &str = "agent:execution";
const HISTORY_KEY: &str = "history";
const HISTORY_CAP: usize = 100;

/// A task submission, as received from the transport layer.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    pub task_id: Option<String>,
    pub task: String,
    pub session_id: Option<String>,
}

/// State summary embedded in every [`TaskResult`].
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub conversation_length: usize,
    pub execution_count: usize,
    pub variables_count: usize,
}

/// Counters describing how a task was fulfilled.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskMetadata {
    pub llm_calls: u32,
    pub skill_calls: usize,
    pub total_tokens: u32,
}

/// What the pipeline returns to the caller of `task.execute`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Machine-readable error tag (`"timeout"`, `"parse"`, ...) from
    /// [`CoreError::kind`], absent on success.
    pub error_kind: Option<String>,
    pub elapsed_ms: u64,
    pub session_id: String,
    pub task_id: String,
    pub state: StateSummary,
    pub metadata: TaskMetadata,
}

/// One completed task, as written to the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub task_id: String,
    pub session_id: String,
    pub task: String,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// External key/value contract the audit sink writes through. Production
/// code depends on the trait; tests mock it via `mockall::automock` rather
/// than hand-writing a double.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get(&self, group_id: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn set(&self, group_id: &str, key: &str, value: Vec<u8>) -> Result<(), CoreError>;
}

/// In-memory reference implementation, sufficient for tests and
/// single-process deployments. Durable backends are an external
/// collaborator outside this crate.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    data: Mutex<std::collections::HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get(&self, group_id: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self
            .data
            .lock()
            .await
            .get(&(group_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, group_id: &str, key: &str, value: Vec<u8>) -> Result<(), CoreError> {
        self.data
            .lock()
            .await
            .insert((group_id.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// Routes task submissions to sessions and fans completion events to the
/// audit sink.
pub struct EventPipeline {
    sessions: Arc<SessionManager>,
    history: Arc<dyn HistoryStore>,
    /// When set, failed `TaskResult.error` includes the wrapped source
    /// chain via [`CoreError::message`] instead of just the top-level
    /// message. Mirrors `Settings::dev_mode`.
    dev_mode: bool,
}

impl EventPipeline {
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>, history: Arc<dyn HistoryStore>, dev_mode: bool) -> Self {
        Self {
            sessions,
            history,
            dev_mode,
        }
    }

    /// Handles a `task.execute` event: acquires (or mints) the session's
    /// agent, runs the task, and publishes the resulting completion event.
    #[instrument(skip(self, submission))]
    pub async fn handle_task_execute(&self, submission: TaskSubmission) -> Result<TaskResult, CoreError> {
        let task_id = submission.task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_id = submission
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if submission.task.trim().is_empty() {
            return Err(CoreError::Validation("task must not be empty".to_string()));
        }

        let agent = self.sessions.acquire(&session_id).await?;
        let started = std::time::Instant::now();
        let outcome = {
            let mut agent = agent.lock().await;
            agent.run(&submission.task).await
        };

        let result = match outcome {
            Ok(run_result) => TaskResult {
                success: true,
                output: Some(run_result.output),
                error: None,
                error_kind: None,
                elapsed_ms: run_result.elapsed_ms,
                session_id: session_id.clone(),
                task_id: task_id.clone(),
                state: StateSummary {
                    conversation_length: run_result.state.conversation_length,
                    execution_count: run_result.state.execution_count,
                    variables_count: run_result.state.variables_count,
                },
                metadata: run_result.metadata,
            },
            Err(err) => TaskResult {
                success: false,
                output: None,
                error: Some(err.message(self.dev_mode)),
                error_kind: Some(err.kind().to_string()),
                elapsed_ms: started.elapsed().as_millis() as u64,
                session_id: session_id.clone(),
                task_id: task_id.clone(),
                state: StateSummary {
                    conversation_length: 0,
                    execution_count: 0,
                    variables_count: 0,
                },
                metadata: TaskMetadata::default(),
            },
        };

        let record = CompletionRecord {
            task_id: task_id.clone(),
            session_id: session_id.clone(),
            task: submission.task.clone(),
            success: result.success,
            output: result.output.clone(),
            error: result.error.clone(),
        };

        if result.success {
            self.handle_task_completed(record).await;
        } else {
            self.handle_task_failed(&record).await;
        }

        Ok(result)
    }

    /// Audit sink for successful completions: prepends to a bounded,
    /// `task_id`-deduplicated history list.
    #[instrument(skip(self, record))]
    async fn handle_task_completed(&self, record: CompletionRecord) {
        if let Err(err) = self.append_history(record).await {
            warn!(error = %err, "failed to persist completion history");
        }
    }

    #[instrument(skip(self, record))]
    async fn handle_task_failed(&self, record: &CompletionRecord) {
        warn!(task_id = %record.task_id, session_id = %record.session_id, error = ?record.error, "task failed");
    }

    async fn append_history(&self, record: CompletionRecord) -> Result<(), CoreError> {
        let raw = self.history.get(HISTORY_GROUP, HISTORY_KEY).await?;
        let mut history: VecDeque<CompletionRecord> = raw
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();

        if history.iter().any(|r| r.task_id == record.task_id) {
            return Ok(());
        }

        history.push_front(record);
        history.truncate(HISTORY_CAP);

        let encoded = serde_json::to_vec(&history)
            .map_err(|e| CoreError::Execution(format!("failed to encode history: {e}")))?;
        self.history.set(HISTORY_GROUP, HISTORY_KEY, encoded).await
    }
}
