//! Provider transport: the single HTTP channel to the LLM provider.
//!
//! [`Transport`] returns raw JSON bodies; response shaping happens in
//! [`gateway`](crate::gateway). [`HttpTransport`] speaks the
//! OpenAI-compatible wire format used by OpenRouter:
//!
//! - `POST {base_url}/chat/completions` with `{ model, messages }`
//! - `POST {base_url}/embeddings` with `{ model, input }`
//!
//! HTTP errors surface as [`GatewayError::Provider`] carrying the status
//! code so the retry loop can tell transient failures from client errors.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ProviderConfig;
use crate::error::GatewayError;
use crate::models::ChatMessage;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one chat completion request.
    async fn send_chat(&self, model: &str, messages: &[ChatMessage])
        -> Result<Value, GatewayError>;

    /// Issue one embeddings request for a single input.
    async fn generate_embeddings(&self, model: &str, input: &str) -> Result<Value, GatewayError>;
}

/// reqwest-backed transport with bearer authentication.
///
/// The client has no timeout of its own: deadlines are enforced per
/// attempt by the gateway. Without an API key every call fails with
/// [`GatewayError::MissingCredentials`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rag-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_key_env: "API key".to_string(),
        })
    }

    /// Build from configuration, reading the API key from the environment.
    ///
    /// A missing key is logged, not fatal.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = match config.api_key() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "provider calls will fail until a key is set");
                None
            }
        };
        let mut transport = Self::new(config.base_url.clone(), api_key)?;
        transport.api_key_env = config.api_key_env.clone();
        Ok(transport)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GatewayError::MissingCredentials(format!("{} is not set", self.api_key_env))
        })?;
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::provider(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::provider(
                Some(status.as_u16()),
                truncate_body(&body_text),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            GatewayError::provider(Some(status.as_u16()), format!("invalid JSON body: {}", e))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Value, GatewayError> {
        let body = json!({
            "model": model,
            "messages": messages,
        });
        self.post_json("chat/completions", &body).await
    }

    async fn generate_embeddings(&self, model: &str, input: &str) -> Result<Value, GatewayError> {
        let body = json!({
            "model": model,
            "input": input,
        });
        self.post_json("embeddings", &body).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() > MAX {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}…", cut)
    } else {
        body.to_string()
    }
}
