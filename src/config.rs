//! Configuration and settings management.
//!
//! Loads settings from environment variables and defines configuration
//! defaults. Every knob in this module maps directly to one environment
//! variable recognized by the core.

use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Which flavor of chat-completion API the configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// System messages travel out-of-band from the turn list (Anthropic Messages API shape).
    AnthropicLike,
    /// System messages are inlined as an ordinary message (OpenAI chat-completions shape).
    #[default]
    OpenAiCompatible,
}

/// Settings loaded from the process environment, with typed defaults for
/// everything the core needs to run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Idle session timeout, milliseconds. Env: `SESSION_TIMEOUT`.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Concurrent session cap. Env: `MAX_SESSIONS`.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Per-task wall-clock budget, milliseconds. Env: `TASK_TIMEOUT`.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Reserved for future iteration caps on the plan/implement loop. Env: `MAX_ITERATIONS`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Which provider variant to build at startup. Env: `DEFAULT_LLM_PROVIDER`.
    #[serde(default)]
    pub default_llm_provider: ProviderKind,

    /// Model identifier passed with every completion request. Env: `DEFAULT_LLM_MODEL`.
    #[serde(default = "default_llm_model")]
    pub default_llm_model: String,

    /// Override endpoint for the configured provider. Env: `LLM_BASE_URL`.
    pub llm_base_url: Option<String>,

    /// Anthropic-style credential. Env: `ANTHROPIC_API_KEY`.
    pub anthropic_api_key: Option<String>,

    /// OpenAI-compatible credential. Env: `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,

    /// Interpreter executable used by the sandbox adapter. Env: `PYTHON_PATH`.
    #[serde(default = "default_python_path")]
    pub python_path: String,

    /// Scratch directory for generated scripts. Env: `SANDBOX_WORKSPACE`.
    #[serde(default = "default_sandbox_workspace")]
    pub sandbox_workspace: String,

    /// Root directory scanned by the skill registry. Env: `SKILLS_DIR`.
    #[serde(default = "default_skills_dir")]
    pub skills_dir: String,

    /// Conversation turns kept in PTC prompts. Env: `HISTORY_WINDOW`.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// When set, error responses may include stack/debug context. Env: `DEV_MODE`.
    #[serde(default)]
    pub dev_mode: bool,
}

const fn default_session_timeout_ms() -> u64 {
    1_800_000
}

const fn default_max_sessions() -> usize {
    1000
}

const fn default_task_timeout_ms() -> u64 {
    60_000
}

const fn default_max_iterations() -> usize {
    50
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_python_path() -> String {
    "python3".to_string()
}

fn default_sandbox_workspace() -> String {
    "/tmp/relay-agent/sandbox".to_string()
}

fn default_skills_dir() -> String {
    "skills".to_string()
}

const fn default_history_window() -> usize {
    5
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Environment variables are matched case-insensitively against the
    /// struct's field names (`SESSION_TIMEOUT` -> `session_timeout_ms` is
    /// handled by an explicit alias; everything else matches directly).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] only when a value present in the
    /// environment fails to parse into its target type. A missing optional
    /// variable is never an error.
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Environment::default().ignore_empty(true))
            .build()?;
        let mut settings: Self = s.try_deserialize().unwrap_or_else(|_| Self::defaults());

        // SCREAMING_SNAKE env var names don't all auto-map onto this
        // struct's field names, so fall back to direct lookups for the
        // ones that don't.
        macro_rules! fallback_string {
            ($field:expr, $var:literal) => {
                if let Ok(val) = std::env::var($var) {
                    if !val.is_empty() {
                        $field = Some(val);
                    }
                }
            };
        }
        macro_rules! fallback_parsed {
            ($field:expr, $var:literal) => {
                if let Ok(val) = std::env::var($var) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        fallback_parsed!(settings.session_timeout_ms, "SESSION_TIMEOUT");
        fallback_parsed!(settings.max_sessions, "MAX_SESSIONS");
        fallback_parsed!(settings.task_timeout_ms, "TASK_TIMEOUT");
        fallback_parsed!(settings.max_iterations, "MAX_ITERATIONS");
        fallback_parsed!(settings.history_window, "HISTORY_WINDOW");
        fallback_parsed!(settings.dev_mode, "DEV_MODE");
        if let Ok(val) = std::env::var("DEFAULT_LLM_PROVIDER") {
            settings.default_llm_provider = match val.to_lowercase().as_str() {
                "anthropic-like" | "anthropic_like" | "anthropic" => ProviderKind::AnthropicLike,
                _ => ProviderKind::OpenAiCompatible,
            };
        }
        if let Ok(val) = std::env::var("DEFAULT_LLM_MODEL") {
            if !val.is_empty() {
                settings.default_llm_model = val;
            }
        }
        if let Ok(val) = std::env::var("PYTHON_PATH") {
            if !val.is_empty() {
                settings.python_path = val;
            }
        }
        if let Ok(val) = std::env::var("SANDBOX_WORKSPACE") {
            if !val.is_empty() {
                settings.sandbox_workspace = val;
            }
        }
        if let Ok(val) = std::env::var("SKILLS_DIR") {
            if !val.is_empty() {
                settings.skills_dir = val;
            }
        }
        fallback_string!(settings.llm_base_url, "LLM_BASE_URL");
        fallback_string!(settings.anthropic_api_key, "ANTHROPIC_API_KEY");
        fallback_string!(settings.openai_api_key, "OPENAI_API_KEY");

        Ok(settings)
    }

    /// Build settings purely in-process, bypassing the environment --
    /// the shape tests and embedders reach for instead of mutating
    /// `std::env` globals.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            max_sessions: default_max_sessions(),
            task_timeout_ms: default_task_timeout_ms(),
            max_iterations: default_max_iterations(),
            default_llm_provider: ProviderKind::default(),
            default_llm_model: default_llm_model(),
            llm_base_url: None,
            anthropic_api_key: None,
            openai_api_key: None,
            python_path: default_python_path(),
            sandbox_workspace: default_sandbox_workspace(),
            skills_dir: default_skills_dir(),
            history_window: default_history_window(),
            dev_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::defaults();
        assert_eq!(s.session_timeout_ms, 1_800_000);
        assert_eq!(s.max_sessions, 1000);
        assert_eq!(s.task_timeout_ms, 60_000);
        assert_eq!(s.history_window, 5);
        assert!(!s.dev_mode);
    }
}
