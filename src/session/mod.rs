//! Session state: the data an [`crate::agent::Agent`] owns and mutates on
//! every `run` call.

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use manager::SessionManager;

/// Who produced a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

/// A record of one completed (successful or failed) task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// The mutable state owned by exactly one [`crate::agent::Agent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub conversation_turns: Vec<ConversationTurn>,
    pub execution_records: Vec<ExecutionRecord>,
    pub variables: HashMap<String, serde_json::Value>,
}

/// Returns the most recent `window` entries of `turns`, without mutating
/// it. The one place this truncation rule is implemented; both
/// [`SessionState::recent_turns`] and [`crate::ptc::PtcGenerator`]'s
/// context assembly call through here rather than re-deriving it.
#[must_use]
pub fn recent_turns(turns: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    let start = turns.len().saturating_sub(window);
    &turns[start..]
}

impl SessionState {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            last_activity_at: now,
            conversation_turns: Vec::new(),
            execution_records: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Truncate the conversation turns to the most recent `window` entries,
    /// without mutating the session's stored history.
    #[must_use]
    pub fn recent_turns(&self, window: usize) -> &[ConversationTurn] {
        recent_turns(&self.conversation_turns, window)
    }

    /// Clears all accumulated state, as if the session were brand new,
    /// without resetting `created_at` / `session_id`.
    pub fn clear(&mut self) {
        self.conversation_turns.clear();
        self.execution_records.clear();
        self.variables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_turns_truncates_to_window() {
        let mut s = SessionState::new("s1");
        for i in 0..10 {
            s.conversation_turns.push(ConversationTurn::user(format!("{i}")));
        }
        assert_eq!(s.recent_turns(3).len(), 3);
        assert_eq!(s.recent_turns(3)[0].content, "7");
        assert_eq!(s.recent_turns(100).len(), 10);
    }

    #[test]
    fn lifecycle_invariant_last_activity_ge_created() {
        let s = SessionState::new("s1");
        assert!(s.last_activity_at >= s.created_at);
    }

    proptest::proptest! {
        /// Whatever window is requested, `recent_turns` never returns more
        /// entries than either the window or the full history, and the
        /// returned slice is always the history's tail.
        #[test]
        fn recent_turns_never_exceeds_window_or_history(count in 0usize..20, window in 0usize..20) {
            let mut s = SessionState::new("s1");
            for i in 0..count {
                s.conversation_turns.push(ConversationTurn::user(format!("{i}")));
            }
            let recent = s.recent_turns(window);
            proptest::prop_assert!(recent.len() <= window.min(count));
            if !recent.is_empty() {
                proptest::prop_assert_eq!(recent.last().unwrap().content.as_str(), format!("{}", count - 1));
            }
        }
    }
}
