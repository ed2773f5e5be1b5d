//! Concrete [`super::ChatCompleter`] implementations.
//!
//! Two variants: an OpenAI-compatible completer built on `async-openai`,
//! and an Anthropic-like completer built on raw `reqwest` with the system
//! prompt carried out-of-band via headers. Both retry transient failures
//! through `tokio-retry`'s exponential backoff.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client as OpenAiClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::instrument;

use super::{estimate_tokens, ChatCompleter, ChatOptions, ChatResponse, Message, Role, TokenUsage};
use crate::error::CoreError;

const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;

fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(BASE_BACKOFF_MS)
        .map(jitter)
        .take(MAX_RETRIES)
}

/// OpenAI-compatible completer: system messages are inlined as an ordinary
/// chat message before handing the request to `async-openai`.
pub struct OpenAiCompatibleCompleter {
    client: OpenAiClient<OpenAIConfig>,
    default_model: String,
}

impl OpenAiCompatibleCompleter {
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>, default_model: impl Into<String>) -> Self {
        let mut cfg = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            cfg = cfg.with_api_base(url);
        }
        Self {
            client: OpenAiClient::with_config(cfg),
            default_model: default_model.into(),
        }
    }

    fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, CoreError> {
        let built = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(Into::into),
        };
        built.map_err(|e| CoreError::Provider(format!("failed to build chat message: {e}")))
    }
}

#[async_trait]
impl ChatCompleter for OpenAiCompatibleCompleter {
    #[instrument(skip(self, messages))]
    async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, CoreError> {
        let model = options
            .model_override
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let request_messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&model)
            .messages(request_messages)
            .max_tokens(options.max_tokens)
            .temperature(options.temperature)
            .build()
            .map_err(|e| CoreError::Provider(format!("failed to build chat request: {e}")))?;

        let response = Retry::spawn(retry_strategy(), || async {
            self.client.chat().create(request.clone()).await
        })
        .await
        .map_err(|e| CoreError::Provider(format!("openai-compatible request failed: {e}")))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Provider("provider returned no choices".to_string()))?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CoreError::Provider("provider returned empty content".to_string()))?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_else(|| TokenUsage {
                prompt_tokens: estimate_tokens(
                    &messages
                        .iter()
                        .map(|m| m.content.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                completion_tokens: estimate_tokens(&content),
                total_tokens: 0,
            });

        Ok(ChatResponse {
            content,
            model: response.model,
            usage,
        })
    }
}

/// Anthropic-like completer: the system prompt travels as a top-level
/// `system` field rather than an inlined message, matching the Messages
/// API shape.
pub struct AnthropicLikeCompleter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl AnthropicLikeCompleter {
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>, default_model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or("https://api.anthropic.com/v1/messages")
                .to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.into(),
        }
    }
}

#[derive(Deserialize)]
struct AnthropicLikeResponse {
    content: Vec<AnthropicLikeContentBlock>,
    model: String,
    #[serde(default)]
    usage: Option<AnthropicLikeUsage>,
}

#[derive(Deserialize)]
struct AnthropicLikeContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicLikeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl ChatCompleter for AnthropicLikeCompleter {
    #[instrument(skip(self, messages))]
    async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatResponse, CoreError> {
        let model = options
            .model_override
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let turns: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant {
                    "assistant"
                } else {
                    "user"
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let response = Retry::spawn(retry_strategy(), || async {
            self.http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| CoreError::Provider(format!("anthropic-like request failed: {e}")))?;

        let parsed: AnthropicLikeResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Provider(format!("invalid provider response: {e}")))?;

        let content: String = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(CoreError::Provider(
                "provider returned empty content".to_string(),
            ));
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            model: parsed.model,
            usage,
        })
    }
}
