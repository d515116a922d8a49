//! Resilient generation gateway: the public entry point for chat and
//! embeddings.
//!
//! Every call is composed the same way:
//!
//! ```text
//! sanitize ─▶ breaker gate ─▶ retry loop ─▶ deadline ─▶ transport
//! ```
//!
//! - An open breaker rejects with [`GatewayError::ServiceUnavailable`]
//!   before the retry loop starts, so it consumes no attempts.
//! - Each attempt is bounded by the configured timeout.
//! - One outcome is recorded on the breaker per operation: success resets
//!   it, exhausted retries count as one failure.
//!
//! User-role chat content goes through
//! [`sanitize_user_input`](crate::sanitize::sanitize_user_input) and then
//! PII redaction; system and assistant content is sent verbatim. Embedding
//! input is always PII-redacted. [`Gateway::chat_prepared`] sends
//! in-process prompts without the user-input pass.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{ChatMessage, ChatResponse, EmbeddingResponse, Role};
use crate::provider::Transport;
use crate::resilience::{with_retry, with_timeout, RetryPolicy};
use crate::sanitize::{sanitize_pii, sanitize_user_input};

/// Breaker health as reported by [`Gateway::health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub is_available: bool,
}

pub struct Gateway {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
            timeout,
        }
    }

    /// Build a gateway with a fresh breaker sized from configuration.
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.provider.base_url.clone(),
            &config.breaker,
        ));
        Self::new(
            transport,
            breaker,
            RetryPolicy::from_config(&config.retry),
            Duration::from_millis(config.provider.timeout_ms),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Send a chat completion.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, GatewayError> {
        let sanitized: Vec<ChatMessage> = messages
            .iter()
            .map(|m| match m.role {
                Role::User => ChatMessage {
                    role: Role::User,
                    content: sanitize_pii(&sanitize_user_input(&m.content)),
                },
                _ => m.clone(),
            })
            .collect();

        self.send_chat(model, &sanitized).await
    }

    /// Send a chat completion whose messages were assembled in-process.
    ///
    /// Skips user-input sanitization; the caller is responsible for
    /// cleaning any visitor text it embeds. Breaker, retry and deadline
    /// apply as for [`Gateway::chat`].
    pub async fn chat_prepared(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, GatewayError> {
        self.send_chat(model, messages).await
    }

    async fn send_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, GatewayError> {
        if model.trim().is_empty() {
            return Err(GatewayError::Validation("model must not be empty".into()));
        }
        if messages.is_empty() {
            return Err(GatewayError::Validation(
                "messages must contain at least one entry".into(),
            ));
        }

        tracing::info!(model, message_count = messages.len(), "chat request");

        let body = self
            .guarded("chat", || {
                with_timeout(self.transport.send_chat(model, messages), self.timeout)
            })
            .await?;

        let response = parse_chat_response(&body, model);
        tracing::info!(
            model = %response.model,
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "chat completed"
        );
        Ok(response)
    }

    /// Embed a single text.
    ///
    /// An unexpected response shape yields an empty vector rather than an
    /// error; transport failures still propagate after retries.
    pub async fn embed(&self, model: &str, text: &str) -> Result<EmbeddingResponse, GatewayError> {
        if model.trim().is_empty() {
            return Err(GatewayError::Validation("model must not be empty".into()));
        }

        let input = sanitize_pii(text);
        tracing::debug!(model, text_chars = input.chars().count(), "embedding request");

        let body = self
            .guarded("embed", || {
                with_timeout(self.transport.generate_embeddings(model, &input), self.timeout)
            })
            .await?;

        let response = parse_embedding_response(&body, model);
        if response.embedding.is_empty() {
            tracing::warn!(model, "embedding response had an unexpected shape");
        } else {
            tracing::debug!(
                model = %response.model,
                dimensions = response.embedding.len(),
                tokens_used = response.tokens_used,
                "embedding generated"
            );
        }
        Ok(response)
    }

    pub fn health(&self) -> HealthReport {
        let snapshot = self.breaker.snapshot();
        HealthReport {
            provider: self.breaker.name().to_string(),
            state: snapshot.state,
            failure_count: snapshot.failure_count,
            is_available: self.breaker.would_allow(),
        }
    }

    /// Breaker gate around the retry loop.
    async fn guarded<F, Fut>(&self, operation: &str, op: F) -> Result<Value, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value, GatewayError>>,
    {
        let permit = match self.breaker.acquire() {
            Some(p) => p,
            None => {
                tracing::warn!(operation, "circuit open, rejecting call");
                return Err(GatewayError::ServiceUnavailable);
            }
        };

        match with_retry(&self.retry, operation, op).await {
            Ok(body) => {
                permit.succeed();
                Ok(body)
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "provider call failed");
                permit.fail();
                Err(e)
            }
        }
    }
}

/// Shape a chat completion body. Missing fields default to empty/zero.
pub fn parse_chat_response(body: &Value, requested_model: &str) -> ChatResponse {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();
    let usage = body.get("usage");

    ChatResponse {
        content,
        model,
        prompt_tokens: usage_field(usage, &["prompt_tokens", "promptTokens"]),
        completion_tokens: usage_field(usage, &["completion_tokens", "completionTokens"]),
        total_tokens: usage_field(usage, &["total_tokens", "totalTokens"]),
    }
}

/// Shape an embeddings body. Anything other than a numeric array at
/// `data[0].embedding` yields an empty vector.
pub fn parse_embedding_response(body: &Value, requested_model: &str) -> EmbeddingResponse {
    let embedding = body
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .and_then(|values| {
            values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
        })
        .unwrap_or_default();
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();

    EmbeddingResponse {
        embedding,
        model,
        tokens_used: usage_field(body.get("usage"), &["total_tokens", "totalTokens"]),
    }
}

fn usage_field(usage: Option<&Value>, keys: &[&str]) -> u64 {
    usage
        .and_then(|u| keys.iter().find_map(|k| u.get(*k).and_then(Value::as_u64)))
        .unwrap_or(0)
}
