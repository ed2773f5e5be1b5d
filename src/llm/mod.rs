//! Provider-agnostic chat-completion abstraction: a `Message`/`ChatOptions`
//! request shape, a `ChatResponse`/`TokenUsage` reply shape, and the
//! `ChatCompleter` trait concrete providers implement.

pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A single turn offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-request tuning knobs.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub model_override: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            model_override: None,
        }
    }
}

/// Token accounting for a single completion call. Zeroed when the provider
/// doesn't report usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// The capability every LLM provider variant exposes to the rest of the
/// core. A response with empty/missing text content is a
/// [`CoreError::Provider`], never an empty success.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, CoreError>;
}

/// Estimates token usage locally via `tiktoken-rs`'s `cl100k_base` encoding,
/// for providers/tests that don't report real usage but still need a
/// non-zero number to exercise downstream accounting.
pub fn estimate_tokens(text: &str) -> u32 {
    tiktoken_rs::cl100k_base()
        .map(|bpe| bpe.encode_with_special_tokens(text).len() as u32)
        .unwrap_or_else(|_| (text.split_whitespace().count() as u32).max(1))
}
