//! Error taxonomy shared across the orchestrator core.

use thiserror::Error;

/// The seven error kinds the core can surface to a caller.
///
/// Every variant carries a human-readable message safe to return directly
/// in a [`crate::pipeline::TaskResult`]; lower-level causes are wrapped via
/// `#[source]` rather than interpolated into the message, so callers who
/// want the chain can still get it through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to parse model output: {0}")]
    Parse(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("llm provider error: {0}")]
    Provider(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CoreError {
    /// Stable machine-readable tag, used for the `error.type` field of a
    /// [`crate::pipeline::TaskResult`] and for log filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Parse(_) => "parse",
            CoreError::SkillNotFound(_) => "skill_not_found",
            CoreError::Provider(_) => "provider",
            CoreError::Execution(_) => "execution",
            CoreError::Timeout { .. } => "timeout",
            CoreError::ResourceExhausted(_) => "resource_exhausted",
            CoreError::Io(_) => "io",
            CoreError::Config(_) => "config",
        }
    }

    /// User-facing error text for a [`crate::pipeline::TaskResult`].
    ///
    /// Outside development mode this is just the top-level message --
    /// human-readable and free of the underlying source chain. In
    /// development mode (`dev_mode`/`DEV_MODE`) it also walks
    /// [`std::error::Error::source`], appending each cause, for debugging.
    #[must_use]
    pub fn message(&self, dev_mode: bool) -> String {
        if !dev_mode {
            return self.to_string();
        }

        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(source) = cause {
            message.push_str(&format!("\ncaused by: {source}"));
            cause = source.source();
        }
        message
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_omits_source_chain_outside_dev_mode() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = CoreError::from(io_err);
        assert_eq!(err.message(false), err.to_string());
        assert!(!err.message(false).contains("caused by"));
    }

    #[test]
    fn message_includes_source_chain_in_dev_mode() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = CoreError::from(io_err);
        assert!(err.message(true).contains("caused by: file missing"));
    }

    #[test]
    fn message_is_unchanged_for_sourceless_variants() {
        let err = CoreError::Validation("bad input".to_string());
        assert_eq!(err.message(true), err.to_string());
    }
}
